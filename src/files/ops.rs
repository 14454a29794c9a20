//! File operations bound to registered sessions.

use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::{join_remote, RemoteEntry, RemoteFs};
use crate::error::BridgeError;
use crate::execution::shell_quote;
use crate::session::{SessionId, SessionRegistry};
use crate::Result;

/// Reads, writes, lists, deletes and uploads files on a session's host.
pub struct FileOperations {
    registry: Arc<SessionRegistry>,
}

impl FileOperations {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Full contents of a remote file, via `cat` on a fresh exec channel.
    ///
    /// Content that is not valid UTF-8 fails with
    /// [`BridgeError::BinaryFile`] rather than being altered.
    pub async fn read_file(&self, id: &SessionId, path: &str) -> Result<String> {
        let session = self.registry.get(id)?;
        session.touch();

        let command = format!("cat -- {}", shell_quote(path));
        let output = session.connection().exec(&command, None).await?.check(&command)?;
        debug!(session = %id, path, bytes = output.stdout.len(), "read file");
        String::from_utf8(output.stdout).map_err(|_| BridgeError::BinaryFile(path.to_string()))
    }

    /// Replace a remote file with `content`, optionally creating missing
    /// parent directories first.
    pub async fn write_file(
        &self,
        id: &SessionId,
        path: &str,
        content: &str,
        create_parents: bool,
    ) -> Result<()> {
        let session = self.registry.get(id)?;
        session.touch();
        let connection = session.connection();

        if create_parents {
            if let Some(parent) = parent_dir(path) {
                let mkdir = format!("mkdir -p -- {}", shell_quote(parent));
                connection.exec(&mkdir, None).await?.check(&mkdir)?;
            }
        }

        let command = format!("cat > {}", shell_quote(path));
        connection
            .exec(&command, Some(content.as_bytes()))
            .await?
            .check(&command)?;
        info!(session = %id, path, bytes = content.len(), "wrote file");
        Ok(())
    }

    /// Directory listing, directories first, then by name.
    pub async fn list_dir(&self, id: &SessionId, path: &str) -> Result<Vec<RemoteEntry>> {
        let session = self.registry.get(id)?;
        session.touch();

        let fs = session.connection().open_fs().await?;
        let listing = fs.read_dir(path).await;
        close_fs(fs.as_ref()).await;

        let mut entries = listing?;
        sort_entries(&mut entries);
        Ok(entries)
    }

    /// Delete a file, or a directory and everything below it.
    ///
    /// Failures inside the tree are logged and skipped; only the final
    /// removal of `path` itself decides the result.
    pub async fn delete(&self, id: &SessionId, path: &str) -> Result<()> {
        let session = self.registry.get(id)?;
        session.touch();

        let fs = session.connection().open_fs().await?;
        let result = delete_path(fs.as_ref(), path).await;
        close_fs(fs.as_ref()).await;

        if result.is_ok() {
            info!(session = %id, path, "deleted");
        }
        result
    }

    /// Transfer a staged local file to the remote host.
    ///
    /// When `path` names an existing remote directory and a file name is
    /// known, the file lands inside that directory. Returns the remote path
    /// and the number of bytes written.
    pub async fn upload(
        &self,
        id: &SessionId,
        path: &str,
        file_name: Option<&str>,
        local: &Path,
    ) -> Result<(String, u64)> {
        let session = self.registry.get(id)?;
        session.touch();

        let fs = session.connection().open_fs().await?;
        let result = async {
            let remote = match file_name {
                Some(name) if !path.is_empty() && fs.is_dir(path).await.unwrap_or(false) => {
                    join_remote(path, name)
                }
                _ => upload_target(path, file_name),
            };
            let written = fs.upload(local, &remote).await?;
            Ok((remote, written))
        }
        .await;
        close_fs(fs.as_ref()).await;

        if let Ok((remote, written)) = &result {
            info!(session = %id, path = %remote, bytes = written, "uploaded");
        }
        result
    }
}

/// Remote path for an upload when the server was not asked about `path`.
///
/// A trailing slash or an empty path means "directory": the file name is
/// appended.
pub fn upload_target(path: &str, file_name: Option<&str>) -> String {
    match file_name {
        Some(name) if path.is_empty() => name.to_string(),
        Some(name) if path.ends_with('/') => join_remote(path, name),
        _ => path.to_string(),
    }
}

fn parent_dir(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", _)) => None,
        Some((parent, _)) => Some(parent),
        None => None,
    }
}

fn sort_entries(entries: &mut [RemoteEntry]) {
    entries.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
}

async fn close_fs(fs: &dyn RemoteFs) {
    if let Err(e) = fs.close().await {
        debug!(error = %e, "closing SFTP channel failed");
    }
}

/// A symbolic link is removed as a link; its target is left alone.
async fn delete_path(fs: &dyn RemoteFs, path: &str) -> Result<()> {
    if fs.is_dir_nofollow(path).await? {
        remove_contents(fs, path).await;
        fs.remove_dir(path).await
    } else {
        fs.remove_file(path).await
    }
}

/// Empty `dir` bottom-up, swallowing individual failures.
fn remove_contents<'a>(
    fs: &'a dyn RemoteFs,
    dir: &'a str,
) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        let entries = match fs.read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = dir, error = %e, "cannot list directory, skipping");
                return;
            }
        };

        for entry in entries {
            if entry.is_dir() {
                remove_contents(fs, &entry.path).await;
                if let Err(e) = fs.remove_dir(&entry.path).await {
                    warn!(path = %entry.path, error = %e, "cannot remove directory");
                }
            } else if let Err(e) = fs.remove_file(&entry.path).await {
                warn!(path = %entry.path, error = %e, "cannot remove file");
            }
        }
    })
}

/// An upload body parked in a local temporary file.
///
/// The file is deleted when this value is dropped, whether or not the
/// transfer succeeded.
pub struct StagedUpload {
    file: NamedTempFile,
    size: u64,
}

impl StagedUpload {
    /// An empty temporary file in `dir` (or the system temporary
    /// directory), filled with [`StagedUpload::append`].
    pub fn create(dir: Option<&Path>) -> Result<Self> {
        let file = match dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                NamedTempFile::new_in(dir)?
            }
            None => NamedTempFile::new()?,
        };
        Ok(Self { file, size: 0 })
    }

    pub fn append(&mut self, chunk: &[u8]) -> Result<()> {
        self.file.write_all(chunk)?;
        self.size += chunk.len() as u64;
        Ok(())
    }

    /// Flush buffered data so the file can be read back by path.
    pub fn finish(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    /// Stage `bytes` in one go.
    pub fn stage(dir: Option<&Path>, bytes: &[u8]) -> Result<Self> {
        let mut staged = Self::create(dir)?;
        staged.append(bytes)?;
        staged.finish()?;
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{DrainPolicy, InteractiveChannel};
    use crate::testing::{FakeConnection, RecordingFs, ScriptedShell};
    use crate::transport::ExecOutput;
    use crate::BridgeError;

    fn setup(connection: FakeConnection) -> (FileOperations, SessionId, Arc<FakeConnection>) {
        let registry = Arc::new(SessionRegistry::new());
        let connection = Arc::new(connection);
        let channel =
            InteractiveChannel::new(Box::new(ScriptedShell::new()), DrainPolicy::default());
        let id = registry
            .create("10.0.0.2", "pi", connection.clone(), channel)
            .unwrap();
        (FileOperations::new(registry), id, connection)
    }

    #[tokio::test]
    async fn test_read_file_uses_cat() {
        let connection = FakeConnection::new().on_exec(
            "cat -- '/etc/hostname'",
            ExecOutput {
                stdout: b"raspberrypi\n".to_vec(),
                exit_code: Some(0),
                ..Default::default()
            },
        );
        let (ops, id, connection) = setup(connection);

        let content = ops.read_file(&id, "/etc/hostname").await.unwrap();
        assert_eq!(content, "raspberrypi\n");
        assert_eq!(connection.exec_log()[0].command, "cat -- '/etc/hostname'");
    }

    #[tokio::test]
    async fn test_read_missing_file_fails() {
        let connection = FakeConnection::new().on_exec(
            "cat --",
            ExecOutput {
                stderr: b"cat: /nope: No such file or directory\n".to_vec(),
                exit_code: Some(1),
                ..Default::default()
            },
        );
        let (ops, id, _) = setup(connection);

        let err = ops.read_file(&id, "/nope").await.unwrap_err();
        assert!(matches!(err, BridgeError::RemoteCommand { exit_code: Some(1), .. }));
    }

    #[tokio::test]
    async fn test_read_binary_file_is_refused() {
        let connection = FakeConnection::new().on_exec(
            "cat -- '/usr/bin/ls'",
            ExecOutput {
                stdout: vec![0x7f, b'E', b'L', b'F', 0xff, 0xfe, 0x00],
                exit_code: Some(0),
                ..Default::default()
            },
        );
        let (ops, id, _) = setup(connection);

        let err = ops.read_file(&id, "/usr/bin/ls").await.unwrap_err();
        assert!(matches!(err, BridgeError::BinaryFile(ref p) if p == "/usr/bin/ls"));
    }

    #[tokio::test]
    async fn test_write_file_with_parents() {
        let (ops, id, connection) = setup(FakeConnection::new());

        ops.write_file(&id, "/srv/app/conf/app.toml", "port = 80\n", true)
            .await
            .unwrap();

        let log = connection.exec_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].command, "mkdir -p -- '/srv/app/conf'");
        assert_eq!(log[1].command, "cat > '/srv/app/conf/app.toml'");
        assert_eq!(log[1].stdin.as_deref(), Some(&b"port = 80\n"[..]));
    }

    #[tokio::test]
    async fn test_write_file_without_parents() {
        let (ops, id, connection) = setup(FakeConnection::new());

        ops.write_file(&id, "notes.txt", "hi", false).await.unwrap();
        let log = connection.exec_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].command, "cat > 'notes.txt'");
    }

    #[tokio::test]
    async fn test_list_dir_sorts_dirs_first() {
        let fs = RecordingFs::new()
            .with_file("/home/pi/zeta.txt", b"z")
            .with_dir("/home/pi/src")
            .with_file("/home/pi/alpha.txt", b"aa")
            .with_dir("/home/pi/bin");
        let (ops, id, _) = setup(FakeConnection::new().with_fs(fs.clone()));

        let entries = ops.list_dir(&id, "/home/pi").await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["bin", "src", "alpha.txt", "zeta.txt"]);
        assert_eq!(entries[2].size, 2);
        assert_eq!(entries[2].path, "/home/pi/alpha.txt");
        assert!(fs.is_closed());
    }

    #[tokio::test]
    async fn test_recursive_delete_removes_leaves_first() {
        let fs = RecordingFs::new()
            .with_file("/d/f1", b"1")
            .with_file("/d/sub/f2", b"2");
        let (ops, id, _) = setup(FakeConnection::new().with_fs(fs.clone()));

        ops.delete(&id, "/d").await.unwrap();

        assert_eq!(fs.removed(), vec!["/d/f1", "/d/sub/f2", "/d/sub", "/d"]);
        assert!(!fs.exists("/d"));
    }

    #[tokio::test]
    async fn test_recursive_delete_is_best_effort() {
        let fs = RecordingFs::new()
            .with_file("/d/locked", b"x")
            .with_file("/d/ok", b"y")
            .fail_removal("/d/locked");
        let (ops, id, _) = setup(FakeConnection::new().with_fs(fs.clone()));

        // The locked file keeps /d non-empty, so the final removal fails.
        let err = ops.delete(&id, "/d").await.unwrap_err();
        assert!(matches!(err, BridgeError::Sftp(_)));
        assert_eq!(fs.removed(), vec!["/d/ok"]);
        assert!(fs.is_closed());
    }

    #[tokio::test]
    async fn test_delete_single_file() {
        let fs = RecordingFs::new().with_file("/tmp/a.log", b"x");
        let (ops, id, _) = setup(FakeConnection::new().with_fs(fs.clone()));

        ops.delete(&id, "/tmp/a.log").await.unwrap();
        assert_eq!(fs.removed(), vec!["/tmp/a.log"]);
    }

    #[tokio::test]
    async fn test_delete_symlink_keeps_target() {
        let fs = RecordingFs::new()
            .with_file("/mnt/disk/photos.tar", b"tar")
            .with_dir("/home/pi")
            .with_symlink("/home/pi/data", "/mnt/disk");
        let (ops, id, _) = setup(FakeConnection::new().with_fs(fs.clone()));

        ops.delete(&id, "/home/pi/data").await.unwrap();

        assert_eq!(fs.removed(), vec!["/home/pi/data"]);
        assert!(fs.exists("/mnt/disk/photos.tar"));
        assert!(fs.exists("/mnt/disk"));
    }

    #[tokio::test]
    async fn test_delete_tree_unlinks_nested_symlink() {
        let fs = RecordingFs::new()
            .with_file("/srv/shared/keep.txt", b"keep")
            .with_file("/home/pi/app/run.sh", b"#!/bin/sh")
            .with_symlink("/home/pi/app/shared", "/srv/shared");
        let (ops, id, _) = setup(FakeConnection::new().with_fs(fs.clone()));

        ops.delete(&id, "/home/pi/app").await.unwrap();

        assert!(!fs.exists("/home/pi/app"));
        assert!(fs.exists("/srv/shared/keep.txt"));
        assert!(fs.removed().contains(&"/home/pi/app/shared".to_string()));
    }

    #[tokio::test]
    async fn test_upload_into_directory() {
        let fs = RecordingFs::new().with_dir("/home/pi");
        let (ops, id, _) = setup(FakeConnection::new().with_fs(fs.clone()));
        let staged = StagedUpload::stage(None, b"payload").unwrap();

        let (remote, written) = ops
            .upload(&id, "/home/pi", Some("data.bin"), staged.path())
            .await
            .unwrap();
        assert_eq!(remote, "/home/pi/data.bin");
        assert_eq!(written, 7);
        assert_eq!(fs.contents("/home/pi/data.bin").unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_staged_upload_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let staged = StagedUpload::stage(Some(dir.path()), b"abc").unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(staged.size(), 3);

        drop(staged);
        assert!(!path.exists());
    }

    #[test]
    fn test_staged_upload_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut staged = StagedUpload::create(Some(dir.path())).unwrap();
        for chunk in [&b"hello "[..], b"chunked ", b"world"] {
            staged.append(chunk).unwrap();
        }
        staged.finish().unwrap();

        assert_eq!(staged.size(), 19);
        assert_eq!(
            std::fs::read(staged.path()).unwrap(),
            b"hello chunked world"
        );
    }

    #[tokio::test]
    async fn test_operations_require_live_session() {
        let (ops, id, _) = setup(FakeConnection::new());
        ops.registry.remove(&id).await.unwrap();

        assert!(matches!(
            ops.read_file(&id, "/x").await,
            Err(BridgeError::SessionNotFound(_))
        ));
        assert!(matches!(
            ops.list_dir(&id, "/").await,
            Err(BridgeError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_upload_target() {
        assert_eq!(upload_target("/tmp/", Some("a.txt")), "/tmp/a.txt");
        assert_eq!(upload_target("", Some("a.txt")), "a.txt");
        assert_eq!(upload_target("/tmp/b.txt", Some("a.txt")), "/tmp/b.txt");
        assert_eq!(upload_target("/tmp/b.txt", None), "/tmp/b.txt");
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("/srv/app/x.toml"), Some("/srv/app"));
        assert_eq!(parent_dir("/x.toml"), None);
        assert_eq!(parent_dir("x.toml"), None);
        assert_eq!(parent_dir("a/b"), Some("a"));
    }
}
