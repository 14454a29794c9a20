//! Interactive channel adapter.
//!
//! Turns a raw bidirectional byte stream to a remote shell into something
//! that can be driven one command at a time: a bootstrap that makes the
//! prompt and echo predictable, `send`, and idle-timeout draining.
//!
//! Exactly one command may be in flight per channel. Callers serialize
//! access through the per-session lock in [`crate::session::Session`].

mod drain;
mod ssh;

pub use drain::{
    drain, DrainLimits, DrainPolicy, DrainState, Drainer, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_MAX_BYTES, DEFAULT_MAX_DURATION, DEFAULT_POLL_INTERVAL,
};
pub use ssh::SshShell;

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::Result;

/// Commands sent once after the shell starts, in order.
pub const BOOTSTRAP_COMMANDS: &[&str] = &[
    "export TERM=dumb",
    "export PS1='$ ' PS2=''",
    "stty -echo",
    "set -o emacs",
];

/// Byte stream to a remote shell.
#[async_trait]
pub trait ShellIo: Send {
    /// Write raw bytes.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Return whatever is available right now without waiting.
    ///
    /// `Ok(None)` means nothing is buffered. Fails with
    /// [`crate::BridgeError::SessionClosed`] once the stream is gone.
    fn try_read(&mut self) -> Result<Option<Vec<u8>>>;
}

/// One remote shell, bootstrapped and ready for line-oriented use.
pub struct InteractiveChannel {
    io: Box<dyn ShellIo>,
    policy: DrainPolicy,
    bootstrapped: bool,
}

impl InteractiveChannel {
    pub fn new(io: Box<dyn ShellIo>, policy: DrainPolicy) -> Self {
        Self {
            io,
            policy,
            bootstrapped: false,
        }
    }

    pub fn policy(&self) -> &DrainPolicy {
        &self.policy
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    /// Send the bootstrap sequence and throw away whatever it printed
    /// (login banner, MOTD, the initial prompt).
    pub async fn bootstrap(&mut self) -> Result<()> {
        for command in BOOTSTRAP_COMMANDS {
            self.send(command).await?;
            tokio::time::sleep(self.policy.bootstrap_pause).await;
        }
        let discarded = self.drain_available(self.policy.idle_timeout).await?;
        debug!(bytes = discarded.len(), "shell bootstrap complete");

        self.bootstrapped = true;
        Ok(())
    }

    /// Write `text` followed by a newline.
    pub async fn send(&mut self, text: &str) -> Result<()> {
        trace!(text, "channel send");
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        self.io.write(line.as_bytes()).await
    }

    /// Collect output until nothing has arrived for `idle_timeout`, or
    /// until the policy's time budget or byte cap runs out.
    pub async fn drain_available(&mut self, idle_timeout: Duration) -> Result<Vec<u8>> {
        let limits = self.policy.limits(idle_timeout);
        drain(self.io.as_mut(), limits, self.policy.poll_interval).await
    }

    /// Throw away whatever is already buffered, without waiting. Returns
    /// the number of bytes dropped.
    pub fn discard_pending(&mut self) -> Result<usize> {
        let mut dropped = 0;
        while let Some(chunk) = self.io.try_read()? {
            dropped += chunk.len();
        }
        if dropped > 0 {
            debug!(bytes = dropped, "discarded stale output");
        }
        Ok(dropped)
    }

    /// Discard stale output, `send`, then drain with the given idle window.
    pub async fn round_trip(&mut self, text: &str, idle_timeout: Duration) -> Result<Vec<u8>> {
        self.discard_pending()?;
        self.send(text).await?;
        self.drain_available(idle_timeout).await
    }
}
