//! Session registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::MutexGuard;
use tracing::{info, warn};

use super::SessionId;
use crate::channel::InteractiveChannel;
use crate::error::BridgeError;
use crate::transport::Connection;
use crate::Result;

/// One open remote shell: a connection plus its interactive channel.
///
/// The session exclusively owns both. Channel use goes through
/// [`Session::lock_channel`], which serializes commands on this session
/// while leaving other sessions untouched.
pub struct Session {
    /// Unique identifier.
    pub id: SessionId,
    /// Remote host as given at connect time.
    pub host: String,
    /// Login user.
    pub username: String,
    /// Time when session was created.
    pub created_at: Instant,
    connection: Arc<dyn Connection>,
    channel: tokio::sync::Mutex<InteractiveChannel>,
    last_activity: Mutex<Instant>,
}

impl Session {
    pub fn new(
        id: SessionId,
        host: impl Into<String>,
        username: impl Into<String>,
        connection: Arc<dyn Connection>,
        channel: InteractiveChannel,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            host: host.into(),
            username: username.into(),
            created_at: now,
            connection,
            channel: tokio::sync::Mutex::new(channel),
            last_activity: Mutex::new(now),
        }
    }

    /// The connection, for one-shot exec and SFTP work.
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Wait for exclusive use of the interactive channel.
    pub async fn lock_channel(&self) -> MutexGuard<'_, InteractiveChannel> {
        let guard = self.channel.lock().await;
        self.touch();
        guard
    }

    /// Update the last activity timestamp.
    pub fn touch(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Instant::now();
        }
    }

    /// Get the idle duration since last activity.
    pub fn idle_duration(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    /// Time since the session was opened.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Process-wide table of open sessions.
///
/// Constructed once at startup and shared through `Arc`. The map lock is
/// only held for insert/lookup/remove, never across network I/O.
///
/// Without the idle reaper (see [`super::reaper`]) a client that never
/// calls disconnect keeps its SSH connection open for the life of the
/// process.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    max_sessions: usize,
}

impl SessionRegistry {
    /// Create an empty registry with no session cap.
    pub fn new() -> Self {
        Self::with_limit(0)
    }

    /// Create an empty registry holding at most `max_sessions` sessions
    /// (0 means unlimited).
    pub fn with_limit(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Fail with `SessionLimitReached` if no slot is free.
    pub fn ensure_capacity(&self) -> Result<()> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| BridgeError::LockPoisoned)?;
        if self.max_sessions > 0 && sessions.len() >= self.max_sessions {
            return Err(BridgeError::SessionLimitReached(sessions.len()));
        }
        Ok(())
    }

    /// Register a connection and its channel under a fresh ID.
    pub fn create(
        &self,
        host: &str,
        username: &str,
        connection: Arc<dyn Connection>,
        channel: InteractiveChannel,
    ) -> Result<SessionId> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| BridgeError::LockPoisoned)?;

        if self.max_sessions > 0 && sessions.len() >= self.max_sessions {
            return Err(BridgeError::SessionLimitReached(sessions.len()));
        }

        let mut id = SessionId::new();
        while sessions.contains_key(&id) {
            id = SessionId::new();
        }

        let session = Session::new(id, host, username, connection, channel);
        sessions.insert(id, Arc::new(session));
        info!(session = %id, host, user = username, "session registered");
        Ok(id)
    }

    /// Look up a session.
    pub fn get(&self, id: &SessionId) -> Result<Arc<Session>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| BridgeError::LockPoisoned)?;
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| BridgeError::SessionNotFound(id.to_string()))
    }

    /// Check if a session exists.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions
            .read()
            .map(|s| s.contains_key(id))
            .unwrap_or(false)
    }

    /// Get the number of sessions in the registry.
    pub fn count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Snapshot of all sessions.
    pub fn list(&self) -> Result<Vec<Arc<Session>>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| BridgeError::LockPoisoned)?;
        Ok(sessions.values().cloned().collect())
    }

    /// Remove a session and close its connection.
    ///
    /// Returns `Ok(false)` for an unknown ID: removing twice is a no-op.
    pub async fn remove(&self, id: &SessionId) -> Result<bool> {
        let removed = {
            let mut sessions = self
                .sessions
                .write()
                .map_err(|_| BridgeError::LockPoisoned)?;
            sessions.remove(id)
        };

        match removed {
            Some(session) => {
                close_session(&session).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop a session after an error that left its channel unusable.
    ///
    /// Returns whether the session was removed.
    pub async fn evict_if_fatal(&self, id: &SessionId, error: &BridgeError) -> bool {
        if !error.is_fatal_to_session() {
            return false;
        }
        warn!(session = %id, error = %error, "closing broken session");
        self.remove(id).await.unwrap_or(false)
    }

    /// Close and remove every session idle for at least `max_idle`.
    ///
    /// Returns the number of sessions removed.
    pub async fn remove_idle(&self, max_idle: Duration) -> Result<usize> {
        let expired: Vec<Arc<Session>> = {
            let mut sessions = self
                .sessions
                .write()
                .map_err(|_| BridgeError::LockPoisoned)?;
            let ids: Vec<SessionId> = sessions
                .values()
                .filter(|s| s.idle_duration() >= max_idle)
                .map(|s| s.id)
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &expired {
            info!(
                session = %session.id,
                idle_secs = session.idle_duration().as_secs(),
                "reaping idle session"
            );
            close_session(session).await;
        }
        Ok(expired.len())
    }

    /// Close every session. Used at shutdown.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Arc<Session>> = match self.sessions.write() {
            Ok(mut sessions) => sessions.drain().map(|(_, s)| s).collect(),
            Err(_) => return 0,
        };
        for session in &drained {
            close_session(session).await;
        }
        drained.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn close_session(session: &Session) {
    if let Err(e) = session.connection.close().await {
        warn!(session = %session.id, error = %e, "error closing connection");
    }
    info!(session = %session.id, host = %session.host, "session closed");
}
