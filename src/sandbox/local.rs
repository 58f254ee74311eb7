/// Local sandbox provider.
///
/// Runs every process with `tokio::process` inside a private working
/// directory (a temporary directory unless `sandbox.workdir` is set).
/// Process output is scanned for local server URLs, which are reported
/// as [`SandboxNotice::ServerReady`]. Losing the working directory or a
/// child's status is reported as [`SandboxNotice::Fault`].
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::channel::mpsc as stream_mpsc;
use futures::FutureExt;
use futures::StreamExt;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use url::Url;

use super::{
    command_line, FileTree, KillSwitch, NoticeFeed, SandboxError, SandboxNotice, SandboxRuntime,
    SpawnedProcess, TreeEntry,
};
use crate::config::SandboxConfig;

/// Exit code reported when the exit status could not be determined.
const UNKNOWN_EXIT_CODE: i32 = -1;

/// Hosts that count as "reachable from the host page".
const LOCAL_HOSTS: [&str; 5] = ["localhost", "127.0.0.1", "0.0.0.0", "[::]", "[::1]"];

struct Workspace {
    root: PathBuf,
    /// Keeps the temporary directory alive; removed on drop.
    _temp: Option<TempDir>,
}

/// Feeds the notice channel handed out by `boot`. Each listening port is
/// announced at most once per mount.
#[derive(Clone, Default)]
struct NoticeSink {
    notices: Arc<Mutex<Option<mpsc::UnboundedSender<SandboxNotice>>>>,
    announced: Arc<Mutex<HashSet<u16>>>,
}

impl NoticeSink {
    fn attach(&self, tx: mpsc::UnboundedSender<SandboxNotice>) {
        *self.notices.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
    }

    fn detach(&self) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn reset(&self) {
        self.announced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn scan(&self, line: &str) {
        let Some((port, url)) = detect_server_url(line) else {
            return;
        };
        let fresh = self
            .announced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(port);
        if !fresh {
            return;
        }
        info!("Server listening on port {port} ({url})");
        self.send(SandboxNotice::ServerReady {
            port,
            url: url.to_string(),
        });
    }

    fn fault(&self, message: String) {
        debug!("Reporting fault: {message}");
        self.send(SandboxNotice::Fault { message });
    }

    fn send(&self, notice: SandboxNotice) {
        if let Some(tx) = self
            .notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            let _ = tx.send(notice);
        }
    }
}

pub struct LocalSandbox {
    config: SandboxConfig,
    workspace: Mutex<Option<Workspace>>,
    notices: NoticeSink,
}

impl LocalSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            workspace: Mutex::new(None),
            notices: NoticeSink::default(),
        }
    }

    fn root(&self) -> Result<PathBuf, SandboxError> {
        self.workspace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|w| w.root.clone())
            .ok_or(SandboxError::NotBooted)
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let root = self.root()?;
        resolve_in(&root, path)
    }
}

/// Maps a sandbox path onto `root`, refusing anything that could escape it.
fn resolve_in(root: &Path, path: &str) -> Result<PathBuf, SandboxError> {
    let relative = path.trim_start_matches('/');
    if relative.is_empty() {
        return Err(SandboxError::InvalidPath(path.to_string()));
    }
    let mut resolved = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SandboxError::InvalidPath(path.to_string()));
            }
        }
    }
    if resolved == root {
        return Err(SandboxError::InvalidPath(path.to_string()));
    }
    Ok(resolved)
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    UNKNOWN_EXIT_CODE
}

/// Forwards every line of `reader` (newline restored) to `tx`.
///
/// Bytes that are not valid UTF-8 are replaced, never fatal: the pipe has
/// to stay drained or the child dies on its next write.
async fn read_lines<R>(reader: R, tx: stream_mpsc::UnboundedSender<String>, notices: NoticeSink)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']);
                notices.scan(line);
                if tx.unbounded_send(format!("{line}\n")).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Output read error: {e}");
                break;
            }
        }
    }
}

#[async_trait]
impl SandboxRuntime for LocalSandbox {
    async fn boot(&self) -> Result<NoticeFeed, SandboxError> {
        let workspace = match &self.config.workdir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| SandboxError::Boot(format!("{}: {e}", dir.display())))?;
                Workspace {
                    root: dir.clone(),
                    _temp: None,
                }
            }
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("sandbox-bridge-")
                    .tempdir()
                    .map_err(|e| SandboxError::Boot(format!("temporary directory: {e}")))?;
                Workspace {
                    root: temp.path().to_path_buf(),
                    _temp: Some(temp),
                }
            }
        };
        info!("Sandbox booted in {}", workspace.root.display());

        let (tx, rx) = mpsc::unbounded_channel();
        self.notices.attach(tx);
        *self.workspace.lock().unwrap_or_else(PoisonError::into_inner) = Some(workspace);
        Ok(rx)
    }

    async fn mount(&self, tree: &FileTree) -> Result<(), SandboxError> {
        let root = self.root()?;
        self.notices.reset();
        let mut files = 0usize;
        for entry in tree.entries() {
            match entry {
                TreeEntry::Directory(path) => {
                    tokio::fs::create_dir_all(resolve_in(&root, &path)?).await?;
                }
                TreeEntry::File { path, contents } => {
                    let target = resolve_in(&root, &path)?;
                    if let Some(parent) = target.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(&target, contents).await?;
                    files += 1;
                }
            }
        }
        debug!("Mounted {files} files into {}", root.display());
        Ok(())
    }

    async fn spawn(&self, command: &str, args: &[String]) -> Result<SpawnedProcess, SandboxError> {
        let root = self.root()?;
        let label = command_line(command, args);
        if !tokio::fs::metadata(&root).await.is_ok_and(|m| m.is_dir()) {
            let reason = format!("working directory {} is gone", root.display());
            self.notices.fault(reason.clone());
            return Err(SandboxError::Spawn {
                command: label,
                reason,
            });
        }

        let mut child = Command::new(command)
            .args(args)
            .current_dir(&root)
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Spawn {
                command: label.clone(),
                reason: e.to_string(),
            })?;
        debug!("Spawned `{label}` (pid {:?})", child.id());

        let (out_tx, out_rx) = stream_mpsc::unbounded();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(read_lines(
                stdout,
                out_tx.clone(),
                self.notices.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(read_lines(
                stderr,
                out_tx.clone(),
                self.notices.clone(),
            )));
        }
        // Only the readers may keep the stream open
        drop(out_tx);

        let (kill, kill_rx) = KillSwitch::new();
        let (exit_tx, exit_rx) = oneshot::channel();
        let drain = self.config.output_drain();
        let notices = self.notices.clone();

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    debug!("Killing `{label}`");
                    if let Err(e) = child.start_kill() {
                        debug!("start_kill `{label}`: {e}");
                    }
                    child.wait().await
                }
            };
            let code = match status {
                Ok(status) => exit_code(status),
                Err(e) => {
                    notices.fault(format!("lost track of `{label}`: {e}"));
                    UNKNOWN_EXIT_CODE
                }
            };

            // Grandchildren can hold the pipes open; stop reading after the grace period
            let flushed = tokio::time::timeout(
                drain,
                futures::future::join_all(readers.iter_mut()),
            )
            .await;
            if flushed.is_err() {
                debug!("Output of `{label}` still open after exit, closing");
            }
            for reader in &readers {
                reader.abort();
            }
            let _ = exit_tx.send(code);
        });

        Ok(SpawnedProcess {
            output: out_rx.boxed(),
            exit: exit_rx.map(|code| code.unwrap_or(UNKNOWN_EXIT_CODE)).boxed(),
            kill,
        })
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let target = self.resolve(path)?;
        match tokio::fs::read_to_string(&target).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SandboxError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;
        Ok(())
    }

    async fn teardown(&self) {
        self.notices.detach();
        let workspace = self
            .workspace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(workspace) = workspace {
            info!("Sandbox torn down ({})", workspace.root.display());
        }
    }
}

// ── Server URL detection ─────────────────────────────────

/// Removes ANSI escape sequences (colours, cursor movement).
fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'[') {
            chars.next();
            // CSI: parameters, then one final byte in @..~
            for c in chars.by_ref() {
                if ('@'..='~').contains(&c) {
                    break;
                }
            }
        }
    }
    out
}

/// Finds the first local `http(s)://host:port` URL in a line of output.
pub fn detect_server_url(line: &str) -> Option<(u16, Url)> {
    let clean = strip_ansi(line);
    for token in clean.split_whitespace() {
        let Some(start) = token.find("http://").or_else(|| token.find("https://")) else {
            continue;
        };
        let candidate = token[start..]
            .trim_end_matches(|c: char| matches!(c, ',' | '.' | ')' | ']' | '\'' | '"' | ';'));
        let Ok(url) = Url::parse(candidate) else {
            continue;
        };
        let is_local = url
            .host_str()
            .is_some_and(|host| LOCAL_HOSTS.contains(&host));
        if let (true, Some(port)) = (is_local, url.port()) {
            return Some((port, url));
        }
    }
    None
}
