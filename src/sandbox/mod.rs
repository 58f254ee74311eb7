//! Sandbox runtime abstraction.
//!
//! The bridge never executes anything itself: booting, mounting files,
//! spawning processes and file I/O are delegated to a [`SandboxRuntime`].
//! The runtime also pushes asynchronous [`SandboxNotice`]s (a served
//! process started listening, or the runtime hit a fatal fault).
//!
//! Providers:
//!
//! - [`local::LocalSandbox`] runs processes via `tokio::process` inside an
//!   ephemeral working directory
//! - `mock::MockSandbox` is scripted, for tests

pub mod local;
pub mod manifest;
#[cfg(test)]
pub mod mock;
mod tree;

pub use tree::{FileTree, TreeEntry};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::sync::{mpsc, oneshot};

/// Errors raised by sandbox capabilities.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("sandbox is not booted")]
    NotBooted,

    #[error("boot failed: {0}")]
    Boot(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Asynchronous notifications emitted by the runtime itself.
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxNotice {
    /// A process inside the sandbox opened a listening port.
    ServerReady { port: u16, url: String },
    /// The runtime hit an unrecoverable error.
    Fault { message: String },
}

pub type NoticeFeed = mpsc::UnboundedReceiver<SandboxNotice>;

/// Output of one process: chunks in emission order, finite once the
/// process has exited. Not restartable.
pub type ProcessOutput = BoxStream<'static, String>;

/// One-shot cooperative termination request.
///
/// Killing twice, or killing a process that already exited, is a no-op.
/// Dropping the switch also asks the process to stop.
pub struct KillSwitch(Option<oneshot::Sender<()>>);

impl KillSwitch {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self(Some(tx)), rx)
    }

    pub fn kill(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

/// A freshly spawned process as handed back by the runtime.
pub struct SpawnedProcess {
    pub output: ProcessOutput,
    /// Resolves with the exit code once the process has terminated and
    /// its output stream has ended.
    pub exit: BoxFuture<'static, i32>,
    pub kill: KillSwitch,
}

/// Capability provider for an isolated execution environment.
///
/// Paths are relative to the sandbox root; a leading `/` is accepted and
/// means the same thing.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Boots the environment. Called once; returns the notice feed.
    async fn boot(&self) -> Result<NoticeFeed, SandboxError>;

    /// Writes a file tree into the sandbox root.
    async fn mount(&self, tree: &FileTree) -> Result<(), SandboxError>;

    async fn spawn(&self, command: &str, args: &[String]) -> Result<SpawnedProcess, SandboxError>;

    /// Fails with [`SandboxError::NotFound`] when the file does not exist.
    async fn read_file(&self, path: &str) -> Result<String, SandboxError>;

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;

    /// Releases the environment. Processes must already be stopped.
    async fn teardown(&self);
}

/// Joins a command and its arguments for display and event labels.
pub fn command_line(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{command} {}", args.join(" "))
    }
}
