//! In-memory stand-ins for the SSH seams, for unit and integration tests.
//!
//! None of this touches the network. Time-dependent behaviour (delayed
//! shell replies) runs on `tokio::time`, so tests can use a paused clock.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::channel::ShellIo;
use crate::error::BridgeError;
use crate::execution::PROMPT_MARKER;
use crate::files::{join_remote, EntryKind, RemoteEntry, RemoteFs};
use crate::transport::{Connection, ExecOutput, HostTarget, Transport};
use crate::Result;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Shell
// ---------------------------------------------------------------------------

/// Everything written to a [`ScriptedShell`].
#[derive(Clone, Default)]
pub struct WrittenLog(Arc<Mutex<String>>);

impl WrittenLog {
    pub fn raw(&self) -> String {
        lock(&self.0).clone()
    }

    pub fn lines(&self) -> Vec<String> {
        lock(&self.0).lines().map(String::from).collect()
    }
}

/// Closes a [`ScriptedShell`] from outside, like a dropped SSH channel.
#[derive(Clone, Default)]
pub struct CloseHandle(Arc<AtomicBool>);

impl CloseHandle {
    pub fn close(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Responder {
    matcher: String,
    delay: Duration,
    reply: Vec<u8>,
}

/// A fake remote shell.
///
/// Replies are queued with a ready time; `try_read` returns whatever has
/// become ready. Unless disabled, the prompt probe is answered with
/// `__PROMPT__tester@fakehost:/home/tester`.
pub struct ScriptedShell {
    pending: Vec<(Instant, Vec<u8>)>,
    responders: Vec<Responder>,
    prompt: Option<(String, String, String)>,
    prompt_delay: Duration,
    written: WrittenLog,
    closed: CloseHandle,
}

impl Default for ScriptedShell {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedShell {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            responders: Vec::new(),
            prompt: Some(("tester".into(), "fakehost".into(), "/home/tester".into())),
            prompt_delay: Duration::ZERO,
            written: WrittenLog::default(),
            closed: CloseHandle::default(),
        }
    }

    /// Output available before anything is written (login banner).
    pub fn with_banner(mut self, banner: &[u8]) -> Self {
        self.push_output(banner);
        self
    }

    /// Answer the prompt probe with this context.
    pub fn with_prompt(mut self, username: &str, hostname: &str, working_dir: &str) -> Self {
        self.prompt = Some((username.into(), hostname.into(), working_dir.into()));
        self
    }

    /// Answer the prompt probe only after `delay`.
    pub fn with_prompt_delay(mut self, delay: Duration) -> Self {
        self.prompt_delay = delay;
        self
    }

    /// Never answer the prompt probe.
    pub fn without_prompt(mut self) -> Self {
        self.prompt = None;
        self
    }

    /// Reply immediately whenever written text contains `matcher`.
    pub fn respond_to(self, matcher: &str, reply: &[u8]) -> Self {
        self.respond_to_after(matcher, Duration::ZERO, reply)
    }

    /// Reply `delay` after a write containing `matcher`.
    pub fn respond_to_after(mut self, matcher: &str, delay: Duration, reply: &[u8]) -> Self {
        self.responders.push(Responder {
            matcher: matcher.to_string(),
            delay,
            reply: reply.to_vec(),
        });
        self
    }

    pub fn push_output(&mut self, data: &[u8]) {
        self.pending.push((Instant::now(), data.to_vec()));
    }

    pub fn push_delayed_output(&mut self, delay: Duration, data: &[u8]) {
        self.pending.push((Instant::now() + delay, data.to_vec()));
    }

    pub fn written(&self) -> WrittenLog {
        self.written.clone()
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.closed.clone()
    }
}

#[async_trait]
impl ShellIo for ScriptedShell {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed.is_closed() {
            return Err(BridgeError::SessionClosed);
        }
        let text = String::from_utf8_lossy(data).into_owned();
        lock(&self.written.0).push_str(&text);

        let now = Instant::now();
        for responder in &self.responders {
            if text.contains(&responder.matcher) {
                self.pending
                    .push((now + responder.delay, responder.reply.clone()));
            }
        }
        if text.contains(PROMPT_MARKER) {
            if let Some((user, host, dir)) = &self.prompt {
                let reply = format!("{}{}@{}:{}\n$ ", PROMPT_MARKER, user, host, dir);
                self.pending
                    .push((now + self.prompt_delay, reply.into_bytes()));
            }
        }
        Ok(())
    }

    fn try_read(&mut self) -> Result<Option<Vec<u8>>> {
        if self.closed.is_closed() {
            return Err(BridgeError::SessionClosed);
        }
        let now = Instant::now();
        let mut ready = Vec::new();
        self.pending.retain(|(at, chunk)| {
            if *at <= now {
                ready.extend_from_slice(chunk);
                false
            } else {
                true
            }
        });
        Ok(if ready.is_empty() { None } else { Some(ready) })
    }
}

// ---------------------------------------------------------------------------
// File system
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
    Link(String),
}

#[derive(Default)]
struct FsState {
    nodes: BTreeMap<String, Node>,
    removed: Vec<String>,
    failing: HashSet<String>,
    closed: bool,
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rsplit_once('/') {
        Some(("", _)) if path != "/" => Some("/"),
        Some((parent, _)) if !parent.is_empty() => Some(parent),
        _ => None,
    }
}

fn normalize(path: &str) -> String {
    if path.len() > 1 {
        path.trim_end_matches('/').to_string()
    } else {
        path.to_string()
    }
}

impl FsState {
    /// Follow links from `path` to a non-link node.
    fn resolve(&self, path: &str) -> Option<(String, &Node)> {
        let mut current = path.to_string();
        for _ in 0..8 {
            match self.nodes.get(&current)? {
                Node::Link(target) => current = target.clone(),
                node => return Some((current, node)),
            }
        }
        None
    }

    fn add_parents(&mut self, path: &str) {
        let mut current = parent_of(path);
        while let Some(dir) = current {
            self.nodes.entry(dir.to_string()).or_insert(Node::Dir);
            current = parent_of(dir);
        }
    }

    fn children(&self, dir: &str) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|key| parent_of(key) == Some(dir))
            .cloned()
            .collect()
    }
}

/// In-memory [`RemoteFs`] that records removals in order.
///
/// Clones share state, so a test can keep one and hand another to a
/// [`FakeConnection`].
#[derive(Clone, Default)]
pub struct RecordingFs(Arc<Mutex<FsState>>);

impl RecordingFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directory and any missing parents.
    pub fn with_dir(self, path: &str) -> Self {
        {
            let mut state = lock(&self.0);
            let path = normalize(path);
            state.add_parents(&path);
            state.nodes.insert(path, Node::Dir);
        }
        self
    }

    /// Add a file and any missing parents.
    pub fn with_file(self, path: &str, contents: &[u8]) -> Self {
        {
            let mut state = lock(&self.0);
            let path = normalize(path);
            state.add_parents(&path);
            state.nodes.insert(path, Node::File(contents.to_vec()));
        }
        self
    }

    /// Add a symbolic link at `path` pointing to `target`.
    pub fn with_symlink(self, path: &str, target: &str) -> Self {
        {
            let mut state = lock(&self.0);
            let path = normalize(path);
            state.add_parents(&path);
            state.nodes.insert(path, Node::Link(normalize(target)));
        }
        self
    }

    /// Make removal of `path` fail.
    pub fn fail_removal(self, path: &str) -> Self {
        lock(&self.0).failing.insert(normalize(path));
        self
    }

    /// Successfully removed paths, in order.
    pub fn removed(&self) -> Vec<String> {
        lock(&self.0).removed.clone()
    }

    pub fn exists(&self, path: &str) -> bool {
        lock(&self.0).nodes.contains_key(&normalize(path))
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        match lock(&self.0).nodes.get(&normalize(path)) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.0).closed
    }

    fn remove(&self, path: &str, want_dir: bool) -> Result<()> {
        let mut state = lock(&self.0);
        let path = normalize(path);
        let fail = |reason: &str| -> Result<()> {
            Err(BridgeError::Sftp(format!("{}: {}", path, reason)))
        };

        if state.failing.contains(&path) {
            return fail("permission denied");
        }
        match state.nodes.get(&path) {
            None => return fail("no such file"),
            Some(Node::Dir) if !want_dir => return fail("is a directory"),
            Some(Node::File(_) | Node::Link(_)) if want_dir => return fail("not a directory"),
            Some(Node::Dir) if !state.children(&path).is_empty() => {
                return fail("directory not empty")
            }
            _ => {}
        }
        state.nodes.remove(&path);
        state.removed.push(path);
        Ok(())
    }
}

#[async_trait]
impl RemoteFs for RecordingFs {
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let state = lock(&self.0);
        let dir = normalize(path);
        // Like a server, list what a link points at.
        let resolved = match state.resolve(&dir) {
            Some((resolved, Node::Dir)) => resolved,
            _ => return Err(BridgeError::Sftp(format!("{}: not a directory", dir))),
        };

        Ok(state
            .children(&resolved)
            .into_iter()
            .map(|child| {
                let name = child.rsplit('/').next().unwrap_or_default().to_string();
                let (kind, size) = match state.nodes.get(&child) {
                    Some(Node::File(data)) => (EntryKind::File, data.len() as u64),
                    Some(Node::Link(_)) => (EntryKind::File, 0),
                    _ => (EntryKind::Dir, 0),
                };
                RemoteEntry {
                    path: join_remote(&dir, &name),
                    name,
                    kind,
                    size,
                    modified_time: None,
                }
            })
            .collect())
    }

    async fn is_dir(&self, path: &str) -> Result<bool> {
        match lock(&self.0).resolve(&normalize(path)) {
            Some((_, node)) => Ok(matches!(node, Node::Dir)),
            None => Err(BridgeError::Sftp(format!("{}: no such file", path))),
        }
    }

    async fn is_dir_nofollow(&self, path: &str) -> Result<bool> {
        match lock(&self.0).nodes.get(&normalize(path)) {
            Some(node) => Ok(matches!(node, Node::Dir)),
            None => Err(BridgeError::Sftp(format!("{}: no such file", path))),
        }
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        self.remove(path, false)
    }

    async fn remove_dir(&self, path: &str) -> Result<()> {
        self.remove(path, true)
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<u64> {
        let data = tokio::fs::read(local).await?;
        let size = data.len() as u64;
        lock(&self.0)
            .nodes
            .insert(normalize(remote), Node::File(data));
        Ok(size)
    }

    async fn close(&self) -> Result<()> {
        lock(&self.0).closed = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Connection and transport
// ---------------------------------------------------------------------------

/// One recorded `exec` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    pub command: String,
    pub stdin: Option<Vec<u8>>,
}

/// A fake [`Connection`].
///
/// `exec` answers with the first rule whose matcher is contained in the
/// command, or with empty successful output.
pub struct FakeConnection {
    shell: Mutex<Option<ScriptedShell>>,
    shell_handles: Mutex<Vec<CloseHandle>>,
    exec_rules: Vec<(String, ExecOutput)>,
    exec_log: Mutex<Vec<ExecCall>>,
    fs: RecordingFs,
    closed: AtomicBool,
}

impl Default for FakeConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeConnection {
    pub fn new() -> Self {
        Self {
            shell: Mutex::new(None),
            shell_handles: Mutex::new(Vec::new()),
            exec_rules: Vec::new(),
            exec_log: Mutex::new(Vec::new()),
            fs: RecordingFs::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// The shell handed out by the next `open_shell`.
    pub fn with_shell(mut self, shell: ScriptedShell) -> Self {
        *self.shell.get_mut().unwrap_or_else(|e| e.into_inner()) = Some(shell);
        self
    }

    /// Adjust the shell handed out by the next `open_shell`.
    pub fn map_shell(mut self, f: impl FnOnce(ScriptedShell) -> ScriptedShell) -> Self {
        let slot = self.shell.get_mut().unwrap_or_else(|e| e.into_inner());
        let shell = slot.take().unwrap_or_default();
        *slot = Some(f(shell));
        self
    }

    pub fn on_exec(mut self, matcher: &str, output: ExecOutput) -> Self {
        self.exec_rules.push((matcher.to_string(), output));
        self
    }

    pub fn with_fs(mut self, fs: RecordingFs) -> Self {
        self.fs = fs;
        self
    }

    pub fn fs(&self) -> RecordingFs {
        self.fs.clone()
    }

    pub fn exec_log(&self) -> Vec<ExecCall> {
        lock(&self.exec_log).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(BridgeError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn open_shell(&self) -> Result<Box<dyn ShellIo>> {
        self.ensure_open()?;
        let shell = lock(&self.shell).take().unwrap_or_default();
        lock(&self.shell_handles).push(shell.close_handle());
        Ok(Box::new(shell))
    }

    async fn exec(&self, command: &str, stdin: Option<&[u8]>) -> Result<ExecOutput> {
        self.ensure_open()?;
        lock(&self.exec_log).push(ExecCall {
            command: command.to_string(),
            stdin: stdin.map(<[u8]>::to_vec),
        });
        Ok(self
            .exec_rules
            .iter()
            .find(|(matcher, _)| command.contains(matcher.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or(ExecOutput {
                exit_code: Some(0),
                ..Default::default()
            }))
    }

    async fn open_fs(&self) -> Result<Box<dyn RemoteFs>> {
        self.ensure_open()?;
        Ok(Box::new(self.fs.clone()))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        for handle in lock(&self.shell_handles).iter() {
            handle.close();
        }
        Ok(())
    }
}

type ConnectionSetup = Arc<dyn Fn(FakeConnection) -> FakeConnection + Send + Sync>;

/// A fake [`Transport`] that accepts one username/password pair.
///
/// Each accepted connection's shell answers the prompt probe with the
/// login user, the target host and `/home/<user>`.
pub struct FakeTransport {
    username: String,
    password: String,
    reachable: bool,
    setup: Option<ConnectionSetup>,
    connections: Arc<Mutex<Vec<Arc<FakeConnection>>>>,
    attempts: AtomicUsize,
}

impl FakeTransport {
    pub fn accepting(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            reachable: true,
            setup: None,
            connections: Arc::new(Mutex::new(Vec::new())),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Every connection attempt fails as if the host were down.
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::accepting("", "")
        }
    }

    /// Customize every connection before it is handed out.
    pub fn on_connect(
        mut self,
        setup: impl Fn(FakeConnection) -> FakeConnection + Send + Sync + 'static,
    ) -> Self {
        self.setup = Some(Arc::new(setup));
        self
    }

    /// Connections handed out so far.
    pub fn connections(&self) -> Arc<Mutex<Vec<Arc<FakeConnection>>>> {
        Arc::clone(&self.connections)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, target: &HostTarget) -> Result<Arc<dyn Connection>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if !self.reachable {
            return Err(BridgeError::Connection {
                host: target.host.clone(),
                reason: "connection refused".into(),
            });
        }
        if target.username != self.username || target.password != self.password {
            return Err(BridgeError::AuthenticationFailure {
                user: target.username.clone(),
                host: target.host.clone(),
            });
        }

        let home = format!("/home/{}", target.username);
        let mut connection = FakeConnection::new().with_shell(ScriptedShell::new().with_prompt(
            &target.username,
            &target.host,
            &home,
        ));
        if let Some(setup) = &self.setup {
            connection = setup(connection);
        }

        let connection = Arc::new(connection);
        lock(&self.connections).push(Arc::clone(&connection));
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_scripted_shell_delays_replies() {
        let mut shell =
            ScriptedShell::new().respond_to_after("date", Duration::from_millis(200), b"now\n");
        shell.write(b"date\n").await.unwrap();
        assert!(shell.try_read().unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(shell.try_read().unwrap().unwrap(), b"now\n");
    }

    #[tokio::test]
    async fn test_fake_connection_close_closes_shell() {
        let connection = FakeConnection::new();
        let mut shell = connection.open_shell().await.unwrap();
        connection.close().await.unwrap();

        assert!(matches!(shell.try_read(), Err(BridgeError::SessionClosed)));
        assert!(matches!(
            connection.exec("true", None).await,
            Err(BridgeError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_recording_fs_rejects_non_empty_dir() {
        let fs = RecordingFs::new().with_file("/a/b", b"x");
        assert!(fs.remove_dir("/a").await.is_err());
        fs.remove_file("/a/b").await.unwrap();
        fs.remove_dir("/a").await.unwrap();
        assert_eq!(fs.removed(), vec!["/a/b", "/a"]);
    }
}
