//! Scripted in-memory sandbox for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, Notify};

use super::{
    command_line, FileTree, KillSwitch, NoticeFeed, SandboxError, SandboxNotice, SandboxRuntime,
    SpawnedProcess, TreeEntry,
};

/// Exit code of a scripted process that was killed.
pub const KILLED: i32 = 143;

/// What a spawned command does.
#[derive(Debug, Clone)]
pub enum Script {
    /// Emits `output` then exits with `code`.
    Exit { output: Vec<String>, code: i32 },
    /// Emits `output` then runs until killed.
    UntilKilled { output: Vec<String> },
    /// Emits `output`, then exits with `code` once `gate` is notified.
    /// Killing does not release it.
    Gated {
        output: Vec<String>,
        code: i32,
        gate: Arc<Notify>,
    },
    /// `spawn` itself fails.
    FailSpawn,
    /// `spawn` panics.
    Panic,
}

#[derive(Default)]
pub struct MockSandbox {
    fail_boot: bool,
    fail_mount: bool,
    scripts: Mutex<HashMap<String, Script>>,
    spawned: Mutex<Vec<String>>,
    files: Mutex<BTreeMap<String, String>>,
    notices: Mutex<Option<mpsc::UnboundedSender<SandboxNotice>>>,
    torn_down: Mutex<bool>,
}

fn normalize(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

impl MockSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_boot() -> Self {
        Self {
            fail_boot: true,
            ..Self::default()
        }
    }

    pub fn failing_mount() -> Self {
        Self {
            fail_mount: true,
            ..Self::default()
        }
    }

    /// Registers the behaviour for a full command line, e.g. `"npm install"`.
    /// Unregistered commands exit 0 without output.
    pub fn script(&self, command_line: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(command_line.to_string(), script);
    }

    /// Command lines spawned so far, in order.
    pub fn spawned(&self) -> Vec<String> {
        self.spawned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&normalize(path))
            .cloned()
    }

    /// Pushes a runtime notice as if the sandbox emitted it.
    pub fn notify(&self, notice: SandboxNotice) {
        if let Some(tx) = self
            .notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            let _ = tx.send(notice);
        }
    }

    pub fn is_torn_down(&self) -> bool {
        *self.torn_down.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SandboxRuntime for MockSandbox {
    async fn boot(&self) -> Result<NoticeFeed, SandboxError> {
        if self.fail_boot {
            return Err(SandboxError::Boot("scripted boot failure".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.notices.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        Ok(rx)
    }

    async fn mount(&self, tree: &FileTree) -> Result<(), SandboxError> {
        if self.fail_mount {
            return Err(SandboxError::Io(std::io::Error::other("scripted mount failure")));
        }
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in tree.entries() {
            if let TreeEntry::File { path, contents } = entry {
                files.insert(path, contents.to_string());
            }
        }
        Ok(())
    }

    async fn spawn(&self, command: &str, args: &[String]) -> Result<SpawnedProcess, SandboxError> {
        let line = command_line(command, args);
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&line)
            .cloned()
            .unwrap_or(Script::Exit {
                output: vec![],
                code: 0,
            });
        let (kill, kill_rx) = KillSwitch::new();
        let process = match script {
            Script::FailSpawn => {
                return Err(SandboxError::Spawn {
                    command: line,
                    reason: "scripted spawn failure".into(),
                });
            }
            Script::Panic => panic!("scripted panic while spawning `{line}`"),
            Script::Exit { output, code } => SpawnedProcess {
                output: futures::stream::iter(output).boxed(),
                exit: futures::future::ready(code).boxed(),
                kill,
            },
            Script::Gated { output, code, gate } => SpawnedProcess {
                output: futures::stream::iter(output).boxed(),
                exit: async move {
                    gate.notified().await;
                    code
                }
                .boxed(),
                kill,
            },
            Script::UntilKilled { output } => SpawnedProcess {
                output: futures::stream::iter(output).boxed(),
                exit: kill_rx.map(|_| KILLED).boxed(),
                kill,
            },
        };
        self.spawned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
        Ok(process)
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        self.file(path)
            .ok_or_else(|| SandboxError::NotFound(path.to_string()))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalize(path), content.to_string());
        Ok(())
    }

    async fn teardown(&self) {
        *self.torn_down.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }
}
