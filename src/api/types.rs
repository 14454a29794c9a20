//! API request and response types.
//!
//! Field names on the wire are camelCase.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::execution::{ExecuteOutcome, PromptContext};
use crate::files::RemoteEntry;
use crate::power::{Schedule, ScheduleDetails};
use crate::session::{Session, SessionId};

/// Request to open a session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub host: String,
    /// SSH port; the server's default port when omitted.
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
}

/// Response for session creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    pub session_id: String,
    pub username: String,
    pub hostname: String,
    pub working_dir: String,
}

impl ConnectResponse {
    pub fn new(id: SessionId, prompt: PromptContext) -> Self {
        Self {
            session_id: id.to_string(),
            username: prompt.username,
            hostname: prompt.hostname,
            working_dir: prompt.working_dir,
        }
    }
}

/// Request naming only a session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub session_id: String,
}

/// Request to execute a command line (also used for completion).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub session_id: String,
    pub command: String,
}

/// Output of a command that ran.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutputBody {
    pub output: String,
    pub working_dir: String,
    pub username: String,
    pub hostname: String,
}

/// Reply telling the client to open an editor on `path`.
#[derive(Debug, Clone, Serialize)]
pub struct EditorBody {
    pub status: &'static str,
    pub path: String,
}

/// Response for command execution.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ExecuteResponse {
    Output(CommandOutputBody),
    Editor(EditorBody),
}

impl From<ExecuteOutcome> for ExecuteResponse {
    fn from(outcome: ExecuteOutcome) -> Self {
        match outcome {
            ExecuteOutcome::Output(result) => Self::Output(CommandOutputBody {
                output: result.output,
                working_dir: result.prompt.working_dir,
                username: result.prompt.username,
                hostname: result.prompt.hostname,
            }),
            ExecuteOutcome::Editor { path } => Self::Editor(EditorBody {
                status: "editor",
                path,
            }),
        }
    }
}

/// Query string for reading a file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileQuery {
    pub session_id: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileContentResponse {
    pub content: String,
}

/// Request to replace a file's contents.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteFileRequest {
    pub session_id: String,
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub create_parents: bool,
}

/// Request naming a remote path (listing and deletion).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRequest {
    pub session_id: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListFilesResponse {
    pub files: Vec<RemoteEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub ok: bool,
    pub path: String,
    pub size: u64,
}

/// Plain success acknowledgement.
#[derive(Debug, Clone, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn new() -> Self {
        Self { ok: true }
    }
}

impl Default for OkResponse {
    fn default() -> Self {
        Self::new()
    }
}

/// Request to install a shutdown/wake schedule.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub host_ip: String,
    pub host_user: String,
    pub host_password: String,
    pub shutdown_time: String,
    pub wakeup_time: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleResponse {
    pub ok: bool,
    pub details: ScheduleDetails,
}

/// Request to remove a schedule.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteScheduleRequest {
    pub id: String,
    pub host_ip: String,
    pub host_user: String,
    pub host_password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListSchedulesResponse {
    pub schedules: Vec<Schedule>,
}

/// List sessions response.
#[derive(Debug, Clone, Serialize)]
pub struct ListSessionsResponse {
    /// Total number of sessions.
    pub count: usize,
    /// Session summaries.
    pub sessions: Vec<SessionSummary>,
}

/// Brief session summary for listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub host: String,
    pub username: String,
    pub age_seconds: u64,
    pub idle_seconds: f64,
}

impl SessionSummary {
    pub fn from_session(session: &Session) -> Self {
        Self {
            session_id: session.id.to_string(),
            host: session.host.clone(),
            username: session.username.clone(),
            age_seconds: session.age().as_secs(),
            idle_seconds: session.idle_duration().as_secs_f64(),
        }
    }
}

/// Generic API error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Error code (e.g., "SESSION_NOT_FOUND").
    pub code: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }
}

/// HTTP status and error code for a bridge error.
pub fn classify_error(error: &BridgeError) -> (StatusCode, &'static str) {
    match error {
        BridgeError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
        BridgeError::ScheduleNotFound(_) => (StatusCode::NOT_FOUND, "SCHEDULE_NOT_FOUND"),
        BridgeError::UnsupportedCommand(_) => (StatusCode::BAD_REQUEST, "UNSUPPORTED_COMMAND"),
        BridgeError::InvalidCommand(_) => (StatusCode::BAD_REQUEST, "INVALID_COMMAND"),
        BridgeError::InvalidTime(_) => (StatusCode::BAD_REQUEST, "INVALID_TIME"),
        BridgeError::BinaryFile(_) => (StatusCode::UNPROCESSABLE_ENTITY, "BINARY_FILE"),
        BridgeError::AuthenticationFailure { .. } => {
            (StatusCode::UNAUTHORIZED, "AUTHENTICATION_FAILED")
        }
        BridgeError::Connection { .. } => (StatusCode::BAD_GATEWAY, "CONNECTION_FAILED"),
        BridgeError::Transport(_) => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR"),
        BridgeError::RemoteCommand { .. } => (StatusCode::BAD_GATEWAY, "REMOTE_COMMAND_FAILED"),
        BridgeError::Sftp(_) => (StatusCode::BAD_GATEWAY, "SFTP_ERROR"),
        BridgeError::SessionClosed => (StatusCode::GONE, "SESSION_CLOSED"),
        BridgeError::SessionLimitReached(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "SESSION_LIMIT_REACHED")
        }
        BridgeError::MissingCredentials => (StatusCode::CONFLICT, "CREDENTIALS_MISSING"),
        BridgeError::InvalidPhaseTransition { .. }
        | BridgeError::Io(_)
        | BridgeError::Json(_)
        | BridgeError::LockPoisoned => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    }
}

impl From<&BridgeError> for ErrorResponse {
    fn from(error: &BridgeError) -> Self {
        let (_, code) = classify_error(error);
        Self::new(code, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::CommandOutput;
    use std::time::Duration;

    #[test]
    fn test_connect_request_default_port() {
        let json = r#"{"host": "10.0.0.2", "username": "pi", "password": "pw"}"#;
        let req: ConnectRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.host, "10.0.0.2");
        assert!(req.port.is_none());
    }

    #[test]
    fn test_write_file_request_camel_case() {
        let json = r#"{"sessionId": "ab", "path": "/tmp/x", "content": "hi", "createParents": true}"#;
        let req: WriteFileRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.session_id, "ab");
        assert!(req.create_parents);

        let json = r#"{"sessionId": "ab", "path": "/tmp/x", "content": ""}"#;
        let req: WriteFileRequest = serde_json::from_str(json).unwrap();
        assert!(!req.create_parents);
    }

    #[test]
    fn test_schedule_request_fields() {
        let json = r#"{
            "hostIp": "10.0.0.9",
            "hostUser": "root",
            "hostPassword": "pw",
            "shutdownTime": "23:00",
            "wakeupTime": "06:00"
        }"#;
        let req: ScheduleRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.host_ip, "10.0.0.9");
        assert_eq!(req.shutdown_time, "23:00");
    }

    #[test]
    fn test_execute_response_output() {
        let outcome = ExecuteOutcome::Output(CommandOutput {
            output: "hi".into(),
            prompt: PromptContext::default(),
            duration: Duration::from_millis(5),
        });
        let json = serde_json::to_value(ExecuteResponse::from(outcome)).unwrap();
        assert_eq!(json["output"], "hi");
        assert_eq!(json["workingDir"], "~");
        assert_eq!(json["username"], "user");
        assert_eq!(json["hostname"], "localhost");
        assert!(json.get("status").is_none());
    }

    #[test]
    fn test_execute_response_editor() {
        let outcome = ExecuteOutcome::Editor {
            path: "/tmp/x".into(),
        };
        let json = serde_json::to_value(ExecuteResponse::from(outcome)).unwrap();
        assert_eq!(json, serde_json::json!({"status": "editor", "path": "/tmp/x"}));
    }

    #[test]
    fn test_error_response_serialization() {
        let err = BridgeError::SessionNotFound("ab".into());
        let json = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
        assert_eq!(json["code"], "SESSION_NOT_FOUND");
        assert!(json["error"].as_str().unwrap().contains("ab"));
    }

    #[test]
    fn test_classify_error() {
        assert_eq!(
            classify_error(&BridgeError::UnsupportedCommand("less".into())).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            classify_error(&BridgeError::AuthenticationFailure {
                user: "pi".into(),
                host: "h".into()
            })
            .0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            classify_error(&BridgeError::SessionLimitReached(4)).0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            classify_error(&BridgeError::BinaryFile("/bin/ls".into())),
            (StatusCode::UNPROCESSABLE_ENTITY, "BINARY_FILE")
        );
        assert_eq!(
            classify_error(&BridgeError::LockPoisoned).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
