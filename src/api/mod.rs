//! HTTP API for shell-bridge.
//!
//! ## Endpoints
//!
//! ### Health & Info
//! - `GET /health` - Health check
//! - `GET /api` - API information
//!
//! ### Terminal
//! - `POST /api/terminal/connect` - Open a session
//! - `POST /api/terminal/disconnect` - Close a session
//! - `GET /api/terminal/sessions` - List live sessions
//! - `POST /api/terminal/execute` - Run a command line
//! - `POST /api/terminal/complete` - Tab completion
//! - `GET /api/terminal/file` - Read a file (`?sessionId&path`)
//! - `POST /api/terminal/file` - Write a file
//! - `POST /api/terminal/files` - List a directory
//! - `POST /api/terminal/upload` - Multipart upload
//! - `POST /api/terminal/delete` - Delete a file or directory tree
//!
//! ### Power
//! - `POST /api/power/schedule-shutdown` - Install a shutdown/wake schedule
//! - `GET /api/power/schedules` - List schedules on the saved host
//! - `POST /api/power/schedules/delete` - Remove a schedule
//!
//! Errors are returned as `{"error": message, "code": CODE}`.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use shell_bridge::api::{serve_with_state, AppState, ServerConfig};
//! use shell_bridge::channel::DrainPolicy;
//! use shell_bridge::power::CredentialStore;
//! use shell_bridge::session::SessionRegistry;
//! use shell_bridge::transport::SshTransport;
//!
//! #[tokio::main]
//! async fn main() -> shell_bridge::Result<()> {
//!     let state = AppState::new(
//!         Arc::new(SshTransport::default()),
//!         Arc::new(SessionRegistry::new()),
//!         DrainPolicy::default(),
//!         CredentialStore::new("host_credentials.json"),
//!     );
//!     serve_with_state(ServerConfig::new("127.0.0.1", 3000), state).await
//! }
//! ```

pub mod handlers;
pub mod router;
pub mod types;

// Re-export commonly used types
pub use handlers::{AppState, DEFAULT_BODY_LIMIT};
pub use router::{create_router_with_state, serve_with_state, ServerConfig};
pub use types::{classify_error, ErrorResponse};
