//! Error types for shell-bridge.

use thiserror::Error;

/// Main error type for shell-bridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Credentials were rejected by the remote host.
    #[error("authentication failed for {user}@{host}")]
    AuthenticationFailure { user: String, host: String },

    /// The remote host could not be reached (refused, unresolvable, timed out).
    #[error("connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    /// Session with the given ID was not found.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The registry already holds the maximum number of sessions.
    #[error("session limit reached ({0} open sessions)")]
    SessionLimitReached(usize),

    /// Interactive or full-screen program that cannot be driven line by line.
    #[error("unsupported interactive command: {0}")]
    UnsupportedCommand(String),

    /// Command rejected before it reached the channel.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Invalid execution phase transition.
    #[error("invalid phase transition from {from:?} to {to:?}")]
    InvalidPhaseTransition {
        from: crate::execution::ExecutionPhase,
        to: crate::execution::ExecutionPhase,
    },

    /// Read or write failure on an established connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// The channel was closed while it was in use.
    #[error("session closed")]
    SessionClosed,

    /// SFTP sub-channel failure.
    #[error("SFTP error: {0}")]
    Sftp(String),

    /// A direct remote command exited with a failure status.
    #[error("remote command `{command}` failed (exit {exit_code:?}): {stderr}")]
    RemoteCommand {
        command: String,
        exit_code: Option<u32>,
        stderr: String,
    },

    /// A remote file is not valid UTF-8 and cannot be returned as text.
    #[error("not a text file: {0}")]
    BinaryFile(String),

    /// Malformed `HH:MM` time value.
    #[error("invalid time: {0}")]
    InvalidTime(String),

    /// No power schedule with the given ID.
    #[error("schedule not found: {0}")]
    ScheduleNotFound(String),

    /// Host credentials are required but none have been saved yet.
    #[error("no host credentials configured")]
    MissingCredentials,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,
}

impl BridgeError {
    /// Whether the error leaves the session unusable.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::SessionClosed)
    }
}

/// Convenience Result type for shell-bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_not_found_display() {
        let err = BridgeError::SessionNotFound("0f3a".into());
        assert!(err.to_string().contains("0f3a"));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_authentication_failure_display() {
        let err = BridgeError::AuthenticationFailure {
            user: "pi".into(),
            host: "10.0.0.2".into(),
        };
        assert_eq!(err.to_string(), "authentication failed for pi@10.0.0.2");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BridgeError = io_err.into();
        assert!(matches!(err, BridgeError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_remote_command_display() {
        let err = BridgeError::RemoteCommand {
            command: "cat -- '/nope'".into(),
            exit_code: Some(1),
            stderr: "No such file or directory".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("cat -- '/nope'"));
        assert!(msg.contains("No such file"));
    }

    #[test]
    fn test_fatal_to_session() {
        assert!(BridgeError::SessionClosed.is_fatal_to_session());
        assert!(BridgeError::Transport("broken pipe".into()).is_fatal_to_session());
        assert!(!BridgeError::UnsupportedCommand("less".into()).is_fatal_to_session());
        assert!(!BridgeError::SessionNotFound("x".into()).is_fatal_to_session());
    }
}
