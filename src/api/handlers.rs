//! REST API handlers.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    Json,
};
use tracing::{error, warn};

use super::types::{
    classify_error, CommandRequest, ConnectRequest, ConnectResponse, DeleteScheduleRequest,
    ErrorResponse, ExecuteResponse, FileContentResponse, FileQuery, ListFilesResponse,
    ListSchedulesResponse, ListSessionsResponse, OkResponse, PathRequest, ScheduleRequest,
    ScheduleResponse, SessionRequest, SessionSummary, UploadResponse, WriteFileRequest,
};
use crate::channel::DrainPolicy;
use crate::completion::{Completion, CompletionEngine};
use crate::error::BridgeError;
use crate::execution::CommandExecutor;
use crate::files::{FileOperations, StagedUpload};
use crate::power::{ClockTime, CredentialStore, HostCredentials, PowerManager};
use crate::session::{Connector, SessionId, SessionRegistry};
use crate::transport::{HostTarget, Transport, DEFAULT_SSH_PORT};

/// Default cap on request bodies, uploads included.
pub const DEFAULT_BODY_LIMIT: usize = 64 * 1024 * 1024;

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub connector: Arc<Connector>,
    pub executor: Arc<CommandExecutor>,
    pub completion: Arc<CompletionEngine>,
    pub files: Arc<FileOperations>,
    pub power: Arc<PowerManager>,
    pub credentials: Arc<CredentialStore>,
    /// Where uploads are staged; the system temp dir when `None`.
    pub upload_dir: Option<PathBuf>,
    /// SSH port used when a request does not name one.
    pub default_port: u16,
    /// Maximum request body size in bytes.
    pub body_limit: usize,
}

impl AppState {
    /// Wire every service to one transport and one registry.
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<SessionRegistry>,
        policy: DrainPolicy,
        credentials: CredentialStore,
    ) -> Self {
        Self {
            connector: Arc::new(Connector::new(
                Arc::clone(&transport),
                Arc::clone(&registry),
                policy,
            )),
            executor: Arc::new(CommandExecutor::new(Arc::clone(&registry))),
            completion: Arc::new(CompletionEngine::new(Arc::clone(&registry))),
            files: Arc::new(FileOperations::new(Arc::clone(&registry))),
            power: Arc::new(PowerManager::new(transport)),
            credentials: Arc::new(credentials),
            registry,
            upload_dir: None,
            default_port: DEFAULT_SSH_PORT,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = Some(dir.into());
        self
    }

    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }
}

fn api_error(err: BridgeError) -> ApiError {
    let (status, _) = classify_error(&err);
    if status.is_server_error() {
        warn!(status = status.as_u16(), error = %err, "request failed");
    }
    (status, Json(ErrorResponse::from(&err)))
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::bad_request(message)),
    )
}

fn parse_session_id(raw: &str) -> Result<SessionId, ApiError> {
    raw.parse().map_err(api_error)
}

fn parse_time(raw: &str) -> Result<ClockTime, ApiError> {
    raw.parse().map_err(api_error)
}

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

/// API information endpoint.
pub async fn api_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "shell-bridge",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// Open a session.
pub async fn connect(
    State(state): State<AppState>,
    Json(req): Json<ConnectRequest>,
) -> ApiResult<ConnectResponse> {
    if req.host.trim().is_empty() || req.username.trim().is_empty() {
        return Err(bad_request("host and username are required"));
    }
    let target = HostTarget::new(
        req.host.trim(),
        req.port.unwrap_or(state.default_port),
        req.username.trim(),
        req.password,
    );

    let (id, prompt) = state.connector.connect(&target).await.map_err(api_error)?;
    Ok(Json(ConnectResponse::new(id, prompt)))
}

/// Close a session. Unknown sessions are ignored.
pub async fn disconnect(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> ApiResult<OkResponse> {
    // An id that does not parse cannot name a live session either.
    if let Ok(id) = req.session_id.parse::<SessionId>() {
        state.connector.disconnect(&id).await.map_err(api_error)?;
    }
    Ok(Json(OkResponse::new()))
}

/// List live sessions.
pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<ListSessionsResponse> {
    let mut sessions: Vec<SessionSummary> = state
        .registry
        .list()
        .map_err(api_error)?
        .iter()
        .map(|session| SessionSummary::from_session(session))
        .collect();
    sessions.sort_by(|a, b| b.idle_seconds.total_cmp(&a.idle_seconds));

    Ok(Json(ListSessionsResponse {
        count: sessions.len(),
        sessions,
    }))
}

/// Execute a command in a session.
pub async fn execute(
    State(state): State<AppState>,
    Json(req): Json<CommandRequest>,
) -> ApiResult<ExecuteResponse> {
    let id = parse_session_id(&req.session_id)?;
    let outcome = state
        .executor
        .execute(&id, &req.command)
        .await
        .map_err(api_error)?;
    Ok(Json(outcome.into()))
}

/// Tab-complete a partial command line.
pub async fn complete(
    State(state): State<AppState>,
    Json(req): Json<CommandRequest>,
) -> ApiResult<Completion> {
    let id = parse_session_id(&req.session_id)?;
    let completion = state
        .completion
        .complete(&id, &req.command)
        .await
        .map_err(api_error)?;
    Ok(Json(completion))
}

pub async fn read_file(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> ApiResult<FileContentResponse> {
    let id = parse_session_id(&query.session_id)?;
    let content = state
        .files
        .read_file(&id, &query.path)
        .await
        .map_err(api_error)?;
    Ok(Json(FileContentResponse { content }))
}

pub async fn write_file(
    State(state): State<AppState>,
    Json(req): Json<WriteFileRequest>,
) -> ApiResult<OkResponse> {
    let id = parse_session_id(&req.session_id)?;
    if req.path.is_empty() {
        return Err(bad_request("path is required"));
    }
    state
        .files
        .write_file(&id, &req.path, &req.content, req.create_parents)
        .await
        .map_err(api_error)?;
    Ok(Json(OkResponse::new()))
}

pub async fn list_files(
    State(state): State<AppState>,
    Json(req): Json<PathRequest>,
) -> ApiResult<ListFilesResponse> {
    let id = parse_session_id(&req.session_id)?;
    let path = if req.path.is_empty() { "." } else { &req.path };
    let files = state.files.list_dir(&id, path).await.map_err(api_error)?;
    Ok(Json(ListFilesResponse { files }))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Json(req): Json<PathRequest>,
) -> ApiResult<OkResponse> {
    let id = parse_session_id(&req.session_id)?;
    if req.path.is_empty() || req.path == "/" {
        return Err(bad_request("refusing to delete an empty path or /"));
    }
    state.files.delete(&id, &req.path).await.map_err(api_error)?;
    Ok(Json(OkResponse::new()))
}

/// Multipart upload with `sessionId`, `path` and `file` fields.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<UploadResponse> {
    let mut session_id = None;
    let mut path = String::new();
    let mut staged = None;
    let mut file_name = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "sessionId" => {
                session_id = Some(field.text().await.map_err(|e| bad_request(e.body_text()))?);
            }
            "path" => {
                path = field.text().await.map_err(|e| bad_request(e.body_text()))?;
            }
            "file" => {
                file_name = field.file_name().map(str::to_string);
                let mut upload =
                    StagedUpload::create(state.upload_dir.as_deref()).map_err(api_error)?;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| bad_request(e.body_text()))?
                {
                    upload.append(&chunk).map_err(api_error)?;
                }
                upload.finish().map_err(api_error)?;
                staged = Some(upload);
            }
            other => warn!(field = other, "ignoring unknown upload field"),
        }
    }

    let session_id = session_id.ok_or_else(|| bad_request("missing sessionId field"))?;
    let staged = staged.ok_or_else(|| bad_request("missing file field"))?;
    let id = parse_session_id(&session_id)?;

    let (remote, size) = state
        .files
        .upload(&id, &path, file_name.as_deref(), staged.path())
        .await
        .map_err(api_error)?;
    Ok(Json(UploadResponse {
        ok: true,
        path: remote,
        size,
    }))
}

/// Install a shutdown/wake schedule and remember the host login.
pub async fn schedule_shutdown(
    State(state): State<AppState>,
    Json(req): Json<ScheduleRequest>,
) -> ApiResult<ScheduleResponse> {
    let shutdown = parse_time(&req.shutdown_time)?;
    let wakeup = parse_time(&req.wakeup_time)?;

    let credentials = HostCredentials::new(req.host_ip, req.host_user, req.host_password);
    if let Err(e) = state.credentials.save(&credentials) {
        error!(error = %e, "failed to save host credentials");
        return Err(api_error(e));
    }

    let details = state
        .power
        .schedule(&credentials.target(state.default_port), shutdown, wakeup)
        .await
        .map_err(api_error)?;
    Ok(Json(ScheduleResponse { ok: true, details }))
}

/// Schedules on the host whose login was last saved.
pub async fn list_schedules(State(state): State<AppState>) -> ApiResult<ListSchedulesResponse> {
    let credentials = state.credentials.require().map_err(api_error)?;
    let schedules = state
        .power
        .list(&credentials.target(state.default_port))
        .await
        .map_err(api_error)?;
    Ok(Json(ListSchedulesResponse { schedules }))
}

pub async fn delete_schedule(
    State(state): State<AppState>,
    Json(req): Json<DeleteScheduleRequest>,
) -> ApiResult<OkResponse> {
    let target = HostTarget::new(
        req.host_ip,
        state.default_port,
        req.host_user,
        req.host_password,
    );
    state
        .power
        .remove(&target, &req.id)
        .await
        .map_err(api_error)?;
    Ok(Json(OkResponse::new()))
}
