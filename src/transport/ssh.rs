//! SSH implementation of [`Transport`] built on russh.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Handler};
use russh::keys::PublicKey;
use russh::{ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{Connection, ExecOutput, HostTarget, Transport};
use crate::channel::{ShellIo, SshShell};
use crate::error::BridgeError;
use crate::files::{RemoteFs, SftpFs};
use crate::Result;

/// Connection-level limits.
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Cap on TCP connect + key exchange + authentication.
    pub connect_timeout: Duration,
    /// Keepalive interval; three missed replies drop the connection.
    pub keepalive_interval: Duration,
    /// Cap on a single one-shot `exec`.
    pub exec_timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
            exec_timeout: Duration::from_secs(60),
        }
    }
}

/// Accepts whatever host key the server presents and logs its fingerprint.
struct TrustOnFirstUse {
    host: String,
}

impl Handler for TrustOnFirstUse {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        info!(
            host = %self.host,
            fingerprint = %server_public_key.fingerprint(Default::default()),
            "accepting host key without verification"
        );
        Ok(true)
    }
}

/// Opens password-authenticated SSH connections.
#[derive(Debug, Clone, Default)]
pub struct SshTransport {
    options: SshOptions,
}

impl SshTransport {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    async fn handshake(&self, target: &HostTarget) -> Result<Handle<TrustOnFirstUse>> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(self.options.keepalive_interval * 4),
            keepalive_interval: Some(self.options.keepalive_interval),
            keepalive_max: 3,
            ..Default::default()
        });
        let handler = TrustOnFirstUse {
            host: target.host.clone(),
        };

        let mut handle = client::connect(config, target.address(), handler)
            .await
            .map_err(|e| BridgeError::Connection {
                host: target.address(),
                reason: e.to_string(),
            })?;

        let auth = handle
            .authenticate_password(&target.username, &target.password)
            .await
            .map_err(|e| BridgeError::Connection {
                host: target.address(),
                reason: format!("authentication exchange failed: {}", e),
            })?;

        if !auth.success() {
            return Err(BridgeError::AuthenticationFailure {
                user: target.username.clone(),
                host: target.host.clone(),
            });
        }

        Ok(handle)
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn open(&self, target: &HostTarget) -> Result<Arc<dyn Connection>> {
        let limit = self.options.connect_timeout;
        debug!(
            host = %target.host,
            port = target.port,
            user = %target.username,
            "opening SSH connection"
        );

        let handle = timeout(limit, self.handshake(target))
            .await
            .map_err(|_| BridgeError::Connection {
                host: target.address(),
                reason: format!("timed out after {}s", limit.as_secs()),
            })??;

        info!(host = %target.host, user = %target.username, "SSH connection established");
        Ok(Arc::new(SshConnection {
            handle,
            host: target.host.clone(),
            exec_timeout: self.options.exec_timeout,
            closed: AtomicBool::new(false),
        }))
    }
}

/// An authenticated russh client handle.
pub struct SshConnection {
    handle: Handle<TrustOnFirstUse>,
    host: String,
    exec_timeout: Duration,
    closed: AtomicBool,
}

impl SshConnection {
    async fn session_channel(&self) -> Result<russh::Channel<client::Msg>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BridgeError::SessionClosed);
        }
        self.handle
            .channel_open_session()
            .await
            .map_err(|e| BridgeError::Transport(format!("failed to open channel: {}", e)))
    }
}

#[async_trait]
impl Connection for SshConnection {
    async fn open_shell(&self) -> Result<Box<dyn ShellIo>> {
        let channel = self.session_channel().await?;
        channel
            .request_pty(true, "xterm", 200, 50, 0, 0, &[])
            .await
            .map_err(|e| BridgeError::Transport(format!("PTY request failed: {}", e)))?;
        channel
            .request_shell(true)
            .await
            .map_err(|e| BridgeError::Transport(format!("shell request failed: {}", e)))?;

        Ok(Box::new(SshShell::spawn(channel)))
    }

    async fn exec(&self, command: &str, stdin: Option<&[u8]>) -> Result<ExecOutput> {
        let mut channel = self.session_channel().await?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| BridgeError::Transport(format!("exec failed: {}", e)))?;

        if let Some(input) = stdin {
            channel
                .data(input)
                .await
                .map_err(|e| BridgeError::Transport(format!("failed to send stdin: {}", e)))?;
        }
        channel
            .eof()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;

        let collect = async {
            let mut output = ExecOutput::default();
            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { data } => output.stdout.extend_from_slice(&data),
                    ChannelMsg::ExtendedData { data, ext: 1 } => {
                        output.stderr.extend_from_slice(&data)
                    }
                    ChannelMsg::ExitStatus { exit_status } => output.exit_code = Some(exit_status),
                    _ => {}
                }
            }
            output
        };

        let output = timeout(self.exec_timeout, collect).await.map_err(|_| {
            BridgeError::Transport(format!(
                "`{}` did not finish within {}s",
                command,
                self.exec_timeout.as_secs()
            ))
        })?;
        debug!(host = %self.host, exit = ?output.exit_code, "exec finished");
        Ok(output)
    }

    async fn open_fs(&self) -> Result<Box<dyn RemoteFs>> {
        let channel = self.session_channel().await?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| BridgeError::Sftp(format!("subsystem request failed: {}", e)))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| BridgeError::Sftp(format!("initialization failed: {}", e)))?;

        Ok(Box::new(SftpFs::new(sftp)))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let disconnect = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en");
        match timeout(Duration::from_secs(5), disconnect).await {
            Ok(Ok(())) => {
                info!(host = %self.host, "SSH connection closed");
                Ok(())
            }
            Ok(Err(e)) => Err(BridgeError::Transport(e.to_string())),
            Err(_) => {
                warn!(host = %self.host, "timeout closing SSH connection, dropping it");
                Ok(())
            }
        }
    }
}
