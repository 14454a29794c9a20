//! Authenticated remote command-execution connections.
//!
//! A [`Transport`] opens [`Connection`]s. One connection carries every
//! sub-channel a session needs: the interactive shell, one-shot `exec`
//! invocations and SFTP. The production implementation is [`SshTransport`];
//! tests use the fakes in [`crate::testing`].
//!
//! Host keys are accepted on first use without out-of-band verification.
//! The key fingerprint is logged so an operator can audit it, but nothing
//! stops a man-in-the-middle on the first connection.

mod ssh;

pub use ssh::{SshConnection, SshOptions, SshTransport};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::ShellIo;
use crate::files::RemoteFs;
use crate::Result;

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Where to connect and as whom.
#[derive(Clone, PartialEq, Eq)]
pub struct HostTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl HostTarget {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }

    /// `host:port` as used for the TCP connection.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Never print the password.
impl fmt::Debug for HostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Output of a one-shot remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<u32>,
}

impl ExecOutput {
    /// Exit status 0, or no status reported at all.
    pub fn success(&self) -> bool {
        matches!(self.exit_code, Some(0) | None)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    /// Convert a failed exit into [`crate::BridgeError::RemoteCommand`].
    pub fn check(self, command: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(crate::BridgeError::RemoteCommand {
                command: command.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr_text(),
            })
        }
    }
}

/// Opens authenticated connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and authenticate. No retries: failures are returned verbatim.
    async fn open(&self, target: &HostTarget) -> Result<Arc<dyn Connection>>;
}

/// One authenticated connection to a remote host.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Open a PTY-backed interactive shell channel.
    async fn open_shell(&self) -> Result<Box<dyn ShellIo>>;

    /// Run `command` on a fresh channel, optionally feeding `stdin`, and
    /// collect its complete output.
    async fn exec(&self, command: &str, stdin: Option<&[u8]>) -> Result<ExecOutput>;

    /// Open an SFTP sub-channel.
    async fn open_fs(&self) -> Result<Box<dyn RemoteFs>>;

    /// Close the connection and every sub-channel. Idempotent.
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let target = HostTarget::new("10.0.0.2", 22, "pi", "hunter2");
        let debug = format!("{:?}", target);
        assert!(debug.contains("10.0.0.2"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_address() {
        let target = HostTarget::new("nas.local", 2222, "admin", "x");
        assert_eq!(target.address(), "nas.local:2222");
    }

    #[test]
    fn test_exec_output_check() {
        let ok = ExecOutput {
            stdout: b"hello".to_vec(),
            exit_code: Some(0),
            ..Default::default()
        };
        assert_eq!(ok.clone().check("echo hello").unwrap().stdout_text(), "hello");

        let failed = ExecOutput {
            stderr: b"cat: /x: No such file or directory\n".to_vec(),
            exit_code: Some(1),
            ..Default::default()
        };
        match failed.check("cat /x") {
            Err(crate::BridgeError::RemoteCommand {
                exit_code, stderr, ..
            }) => {
                assert_eq!(exit_code, Some(1));
                assert_eq!(stderr, "cat: /x: No such file or directory");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_missing_exit_status_counts_as_success() {
        let output = ExecOutput::default();
        assert!(output.success());
    }
}
