//! Background reaping of idle sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::SessionRegistry;

/// How often to sweep and how long a session may sit unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperConfig {
    /// Sessions idle at least this long are closed. Zero disables reaping.
    pub idle_timeout: Duration,
    /// Sweep period.
    pub interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            interval: Duration::from_secs(60),
        }
    }
}

impl ReaperConfig {
    pub fn is_enabled(&self) -> bool {
        !self.idle_timeout.is_zero() && !self.interval.is_zero()
    }
}

/// Spawn the sweep loop. Returns `None` when reaping is disabled.
pub fn spawn_reaper(
    registry: Arc<SessionRegistry>,
    config: ReaperConfig,
) -> Option<JoinHandle<()>> {
    if !config.is_enabled() {
        debug!("idle session reaping disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match registry.remove_idle(config.idle_timeout).await {
                Ok(0) => {}
                Ok(n) => debug!(reaped = n, "idle sweep finished"),
                Err(e) => error!(error = %e, "idle sweep failed"),
            }
        }
    }))
}
