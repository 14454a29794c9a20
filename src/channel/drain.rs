//! Idle-timeout draining.
//!
//! A remote shell gives no reliable end-of-output marker, so "the command
//! is done" is approximated by "nothing arrived for `idle_timeout`". A
//! command that pauses longer than that between bursts is truncated; the
//! rest of its output shows up at the start of the next drain.
//!
//! A command that never goes quiet (`ping`, `tail -f`, `yes`) is cut off by
//! a total time budget and a byte cap instead. The remote command keeps
//! running; only the collection stops.

use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use super::ShellIo;
use crate::Result;

/// Default idle window after which a drain stops.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default pause between empty reads.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default upper bound on a single drain, however chatty the command.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(30);

/// Default cap on bytes collected by a single drain.
pub const DEFAULT_MAX_BYTES: usize = 1024 * 1024;

/// Timing knobs for an interactive channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainPolicy {
    /// Idle window for command output.
    pub idle_timeout: Duration,
    /// Sleep between empty reads.
    pub poll_interval: Duration,
    /// Idle window for the prompt-context probe.
    pub probe_timeout: Duration,
    /// Pause after each bootstrap command.
    pub bootstrap_pause: Duration,
    /// Total time budget of one drain.
    pub max_duration: Duration,
    /// Byte cap of one drain.
    pub max_bytes: usize,
}

impl DrainPolicy {
    /// Limits for a drain that ends after `idle_timeout` of silence.
    pub fn limits(&self, idle_timeout: Duration) -> DrainLimits {
        DrainLimits {
            idle_timeout,
            max_duration: self.max_duration,
            max_bytes: self.max_bytes,
        }
    }
}

/// When a single drain stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainLimits {
    pub idle_timeout: Duration,
    pub max_duration: Duration,
    pub max_bytes: usize,
}

impl DrainLimits {
    /// Only the idle window applies.
    pub fn idle(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            max_duration: Duration::MAX,
            max_bytes: usize::MAX,
        }
    }
}

impl Default for DrainPolicy {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            probe_timeout: Duration::from_millis(300),
            bootstrap_pause: Duration::from_millis(100),
            max_duration: DEFAULT_MAX_DURATION,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// Drainer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    /// Data arrived on the last check (or nothing has been checked yet).
    Polling,
    /// Nothing has arrived since `idle_since`.
    Waiting { idle_since: Instant },
    /// The idle window elapsed or a limit was hit.
    Done,
}

/// Pure drain state machine. Time is passed in, never read.
#[derive(Debug)]
pub struct Drainer {
    state: DrainState,
    idle_timeout: Duration,
    deadline: Option<Instant>,
    max_bytes: usize,
    truncated: bool,
    buffer: Vec<u8>,
}

impl Drainer {
    /// A drainer started at `started`.
    pub fn new(limits: DrainLimits, started: Instant) -> Self {
        Self {
            state: DrainState::Polling,
            idle_timeout: limits.idle_timeout,
            deadline: started.checked_add(limits.max_duration),
            max_bytes: limits.max_bytes,
            truncated: false,
            buffer: Vec::new(),
        }
    }

    pub fn state(&self) -> DrainState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == DrainState::Done
    }

    /// Whether a limit, not silence, ended the drain.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// A chunk was read at `now`. Resets the idle window unless a limit
    /// is reached. Bytes past the cap are dropped.
    pub fn on_data(&mut self, chunk: &[u8], now: Instant) -> DrainState {
        if self.is_done() {
            return self.state;
        }
        let room = self.max_bytes.saturating_sub(self.buffer.len());
        self.buffer.extend_from_slice(&chunk[..chunk.len().min(room)]);

        self.state = if self.buffer.len() >= self.max_bytes || self.past_deadline(now) {
            self.truncated = true;
            DrainState::Done
        } else {
            DrainState::Polling
        };
        self.state
    }

    /// A check found nothing at `now`. Returns the new state.
    pub fn on_empty(&mut self, now: Instant) -> DrainState {
        if !self.is_done() && self.past_deadline(now) {
            self.truncated = true;
            self.state = DrainState::Done;
            return self.state;
        }
        self.state = match self.state {
            DrainState::Polling => DrainState::Waiting { idle_since: now },
            DrainState::Waiting { idle_since }
                if now.duration_since(idle_since) >= self.idle_timeout =>
            {
                DrainState::Done
            }
            other => other,
        };
        self.state
    }

    pub fn output_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn into_output(self) -> Vec<u8> {
        self.buffer
    }

    fn past_deadline(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}

/// Read everything `io` produces until it has been silent for the idle
/// window, or until the time budget or byte cap of `limits` is used up.
///
/// Uses `tokio::time`, so tests running on a paused clock complete
/// instantly and deterministically.
pub async fn drain(
    io: &mut dyn ShellIo,
    limits: DrainLimits,
    poll_interval: Duration,
) -> Result<Vec<u8>> {
    let mut drainer = Drainer::new(limits, Instant::now());

    loop {
        let state = match io.try_read()? {
            Some(chunk) => {
                let state = drainer.on_data(&chunk, Instant::now());
                tokio::task::yield_now().await;
                state
            }
            None => {
                let state = drainer.on_empty(Instant::now());
                if state != DrainState::Done {
                    tokio::time::sleep(poll_interval).await;
                }
                state
            }
        };
        if state == DrainState::Done {
            break;
        }
    }

    if drainer.is_truncated() {
        warn!(
            bytes = drainer.output_len(),
            "output still arriving, drain stopped at its limit"
        );
    }
    Ok(drainer.into_output())
}
