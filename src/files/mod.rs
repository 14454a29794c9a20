//! Remote file operations.
//!
//! Reads and writes go through one-shot `exec` channels (`cat`); listing,
//! deletion and uploads go through SFTP. Neither touches the session's
//! interactive shell, so file work never queues behind a running command.

mod ops;

pub use ops::{upload_target, FileOperations, StagedUpload};

use std::path::Path;

use async_trait::async_trait;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::BridgeError;
use crate::Result;

/// Entry type as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    // Declared first so directories sort before files.
    Dir,
    File,
}

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub size: u64,
    /// Seconds since the Unix epoch, when the server reports it.
    pub modified_time: Option<u64>,
    pub path: String,
}

impl RemoteEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// File-transfer sub-channel.
#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// List `path`, without `.` and `..`, in server order.
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Whether `path` is a directory, following symbolic links.
    async fn is_dir(&self, path: &str) -> Result<bool>;

    /// Whether `path` itself is a directory. A symbolic link never is,
    /// whatever it points at.
    async fn is_dir_nofollow(&self, path: &str) -> Result<bool>;

    async fn remove_file(&self, path: &str) -> Result<()>;

    /// Remove an empty directory.
    async fn remove_dir(&self, path: &str) -> Result<()>;

    /// Copy the local file at `local` to `remote`, replacing it. Returns
    /// the number of bytes written.
    async fn upload(&self, local: &Path, remote: &str) -> Result<u64>;

    async fn close(&self) -> Result<()>;
}

/// Join a directory and a child name with exactly one slash.
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// [`RemoteFs`] over an SFTP session.
pub struct SftpFs {
    sftp: SftpSession,
}

impl SftpFs {
    pub fn new(sftp: SftpSession) -> Self {
        Self { sftp }
    }
}

fn sftp_error(path: &str, e: impl std::fmt::Display) -> BridgeError {
    BridgeError::Sftp(format!("{}: {}", path, e))
}

#[async_trait]
impl RemoteFs for SftpFs {
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let entries = self
            .sftp
            .read_dir(path)
            .await
            .map_err(|e| sftp_error(path, e))?;

        let mut listing = Vec::new();
        for entry in entries {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let metadata = entry.metadata();
            let kind = if metadata.file_type().is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::File
            };
            listing.push(RemoteEntry {
                path: join_remote(path, &name),
                name,
                kind,
                size: metadata.size.unwrap_or(0),
                modified_time: metadata.mtime.map(u64::from),
            });
        }
        Ok(listing)
    }

    async fn is_dir(&self, path: &str) -> Result<bool> {
        let metadata = self
            .sftp
            .metadata(path)
            .await
            .map_err(|e| sftp_error(path, e))?;
        Ok(metadata.file_type().is_dir())
    }

    async fn is_dir_nofollow(&self, path: &str) -> Result<bool> {
        let metadata = self
            .sftp
            .symlink_metadata(path)
            .await
            .map_err(|e| sftp_error(path, e))?;
        Ok(metadata.file_type().is_dir())
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        self.sftp
            .remove_file(path)
            .await
            .map_err(|e| sftp_error(path, e))
    }

    async fn remove_dir(&self, path: &str) -> Result<()> {
        self.sftp
            .remove_dir(path)
            .await
            .map_err(|e| sftp_error(path, e))
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<u64> {
        let mut source = tokio::fs::File::open(local).await?;
        let mut target = self
            .sftp
            .open_with_flags(
                remote,
                OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            )
            .await
            .map_err(|e| sftp_error(remote, e))?;

        let written = tokio::io::copy(&mut source, &mut target).await?;
        target.flush().await?;
        target.shutdown().await?;
        debug!(path = remote, bytes = written, "upload complete");
        Ok(written)
    }

    async fn close(&self) -> Result<()> {
        self.sftp
            .close()
            .await
            .map_err(|e| BridgeError::Sftp(e.to_string()))
    }
}
