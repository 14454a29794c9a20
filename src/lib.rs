//! # shell-bridge
//!
//! HTTP bridge to interactive shells on remote hosts.
//!
//! Clients open SSH sessions through the API and then drive them one
//! command at a time: each command is written to a long-lived interactive
//! shell, its output is collected until the shell goes quiet, and the
//! result comes back as cleaned text plus the shell's current user, host
//! and working directory.
//!
//! ## Features
//!
//! - **Session multiplexing**: many remote shells, each serialized behind
//!   its own lock, with idle reaping and a session cap
//! - **Tab completion** through `compgen` on the live shell
//! - **File operations**: read, write, list, recursive delete and upload
//! - **Power scheduling**: crontab-driven shutdown with RTC wake-up
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use shell_bridge::channel::DrainPolicy;
//! use shell_bridge::session::{Connector, SessionRegistry};
//! use shell_bridge::transport::{HostTarget, SshTransport};
//! use shell_bridge::{CommandExecutor, ExecuteOutcome};
//!
//! #[tokio::main]
//! async fn main() -> shell_bridge::Result<()> {
//!     shell_bridge::logging::try_init().ok();
//!
//!     let registry = Arc::new(SessionRegistry::new());
//!     let connector = Connector::new(
//!         Arc::new(SshTransport::default()),
//!         registry.clone(),
//!         DrainPolicy::default(),
//!     );
//!
//!     let target = HostTarget::new("192.168.1.20", 22, "pi", "raspberry");
//!     let (id, prompt) = connector.connect(&target).await?;
//!     println!("{}@{}:{}", prompt.username, prompt.hostname, prompt.working_dir);
//!
//!     let executor = CommandExecutor::new(registry);
//!     if let ExecuteOutcome::Output(result) = executor.execute(&id, "uname -a").await? {
//!         println!("{}", result.output);
//!     }
//!
//!     connector.disconnect(&id).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod channel;
pub mod cli;
pub mod completion;
pub mod config;
pub mod error;
pub mod execution;
pub mod files;
pub mod logging;
pub mod output;
pub mod power;
pub mod session;
pub mod transport;

/// Fakes for the transport, shell and SFTP seams.
#[doc(hidden)]
pub mod testing;

// Re-export commonly used types
pub use completion::{Completion, CompletionEngine};
pub use error::{BridgeError, Result};
pub use execution::{CommandExecutor, CommandOutput, ExecuteOutcome, PromptContext};
pub use files::{FileOperations, RemoteEntry};
pub use output::OutputSanitizer;
pub use power::{ClockTime, CredentialStore, PowerManager, Schedule};
pub use session::{Connector, Session, SessionId, SessionRegistry};
pub use transport::{HostTarget, SshTransport, Transport};
