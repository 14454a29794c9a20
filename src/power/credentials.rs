//! Persisted host credentials for the power endpoints.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::BridgeError;
use crate::transport::HostTarget;
use crate::Result;

/// Default location of the credential document.
pub const DEFAULT_CREDENTIALS_PATH: &str = "host_credentials.json";

/// The single saved host login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCredentials {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl HostCredentials {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn target(&self, port: u16) -> HostTarget {
        HostTarget::new(&self.host, port, &self.username, &self.password)
    }
}

impl fmt::Debug for HostCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCredentials")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// JSON file holding one [`HostCredentials`] record, overwritten on save.
pub struct CredentialStore {
    path: PathBuf,
    cached: RwLock<Option<HostCredentials>>,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saved credentials, or `None` if nothing has been saved yet.
    pub fn load(&self) -> Result<Option<HostCredentials>> {
        if let Some(credentials) = self
            .cached
            .read()
            .map_err(|_| BridgeError::LockPoisoned)?
            .clone()
        {
            return Ok(Some(credentials));
        }

        if !self.path.exists() {
            debug!(path = %self.path.display(), "no saved host credentials");
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let credentials: HostCredentials = serde_json::from_str(&content)?;

        *self.cached.write().map_err(|_| BridgeError::LockPoisoned)? = Some(credentials.clone());
        Ok(Some(credentials))
    }

    /// Saved credentials or [`BridgeError::MissingCredentials`].
    pub fn require(&self) -> Result<HostCredentials> {
        self.load()?.ok_or(BridgeError::MissingCredentials)
    }

    /// Replace the saved record.
    pub fn save(&self, credentials: &HostCredentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(credentials)?;
        write_private(&self.path, content.as_bytes())?;

        *self.cached.write().map_err(|_| BridgeError::LockPoisoned)? = Some(credentials.clone());
        info!(path = %self.path.display(), host = %credentials.host, "saved host credentials");
        Ok(())
    }
}

/// Write `data` to a file only the owner can read. A new file is created
/// with mode 0600; an existing one is narrowed to 0600 before any byte is
/// written.
#[cfg(unix)]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(data)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, data)
}
