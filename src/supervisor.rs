/// Process supervision.
///
/// Processes live in named slots. A slot holds at most one live process:
/// starting into an occupied slot first kills the occupant and waits until
/// its exit has been reported, so two processes never write to the same
/// output channel.
///
/// Each process gets a pump task that forwards output chunks to the
/// [`ProcessObserver`] as they arrive and then reports the exit code
/// exactly once.
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::sandbox::{command_line, KillSwitch, ProcessOutput, SandboxError, SandboxRuntime};

/// Exit code reported if a pump vanished without reporting (runtime shutdown).
const LOST_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Dependency installation.
    Install,
    /// The project's dev server.
    Serve,
    /// Ad-hoc `run-command` requests.
    Command,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::Install, Slot::Serve, Slot::Command];

    pub fn name(self) -> &'static str {
        match self {
            Slot::Install => "install",
            Slot::Serve => "serve",
            Slot::Command => "command",
        }
    }

    fn index(self) -> usize {
        match self {
            Slot::Install => 0,
            Slot::Serve => 1,
            Slot::Command => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    Output {
        slot: Slot,
        id: Uuid,
        command: String,
        data: String,
    },
    Exit {
        slot: Slot,
        id: Uuid,
        command: String,
        code: i32,
    },
}

/// Receives process events in emission order. The pump awaits each call,
/// so an exit is delivered before the slot accepts a replacement.
#[async_trait]
pub trait ProcessObserver: Send + Sync {
    async fn on_process_event(&self, event: ProcessEvent);
}

#[async_trait]
impl ProcessObserver for mpsc::UnboundedSender<ProcessEvent> {
    async fn on_process_event(&self, event: ProcessEvent) {
        let _ = self.send(event);
    }
}

/// Caller's view of a started process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub id: Uuid,
    pub slot: Slot,
    pub command: String,
    exit: watch::Receiver<Option<i32>>,
}

impl ProcessHandle {
    /// Waits until the process has exited and its exit event was delivered.
    pub async fn wait(&self) -> i32 {
        let mut exit = self.exit.clone();
        let code = match exit.wait_for(Option::is_some).await {
            Ok(code) => *code,
            Err(_) => None,
        };
        code.unwrap_or(LOST_EXIT_CODE)
    }

    #[cfg(test)]
    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }
}

struct Occupant {
    id: Uuid,
    command: String,
    switch: KillSwitch,
    finished: watch::Receiver<Option<i32>>,
}

impl Occupant {
    /// Signals the process and waits for its exit to be reported.
    async fn terminate(mut self, slot: Slot) {
        if self.finished.borrow().is_some() {
            return;
        }
        info!("Stopping `{}` in slot {}", self.command, slot.name());
        self.switch.kill();
        let _ = self.finished.wait_for(Option::is_some).await;
    }
}

pub struct ProcessSupervisor {
    runtime: Arc<dyn SandboxRuntime>,
    observer: Arc<dyn ProcessObserver>,
    slots: [Mutex<Option<Occupant>>; 3],
}

impl ProcessSupervisor {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, observer: Arc<dyn ProcessObserver>) -> Self {
        Self {
            runtime,
            observer,
            slots: [Mutex::new(None), Mutex::new(None), Mutex::new(None)],
        }
    }

    /// Starts `command` in `slot`, replacing (and awaiting) any occupant.
    pub async fn start(
        &self,
        slot: Slot,
        command: &str,
        args: &[String],
    ) -> Result<ProcessHandle, SandboxError> {
        let mut occupant = self.slots[slot.index()].lock().await;
        if let Some(previous) = occupant.take() {
            previous.terminate(slot).await;
        }

        let spawned = self.runtime.spawn(command, args).await?;
        let id = Uuid::new_v4();
        let label = command_line(command, args);
        let (finished_tx, finished_rx) = watch::channel(None);

        tokio::spawn(pump(
            slot,
            id,
            label.clone(),
            spawned.output,
            spawned.exit,
            self.observer.clone(),
            finished_tx,
        ));

        info!("Started `{label}` in slot {} ({id})", slot.name());
        *occupant = Some(Occupant {
            id,
            command: label.clone(),
            switch: spawned.kill,
            finished: finished_rx.clone(),
        });

        Ok(ProcessHandle {
            id,
            slot,
            command: label,
            exit: finished_rx,
        })
    }

    /// Kills whatever occupies `slot`. No-op if empty or already exited.
    pub async fn kill(&self, slot: Slot) {
        let mut occupant = self.slots[slot.index()].lock().await;
        if let Some(previous) = occupant.take() {
            previous.terminate(slot).await;
        }
    }

    /// Kills `handle` only if it still occupies its slot.
    pub async fn kill_process(&self, handle: &ProcessHandle) {
        let mut occupant = self.slots[handle.slot.index()].lock().await;
        if occupant.as_ref().is_some_and(|o| o.id == handle.id) {
            if let Some(previous) = occupant.take() {
                previous.terminate(handle.slot).await;
            }
        }
    }

    pub async fn kill_all(&self) {
        for slot in Slot::ALL {
            self.kill(slot).await;
        }
    }

    #[cfg(test)]
    pub async fn is_running(&self, slot: Slot) -> bool {
        self.slots[slot.index()]
            .lock()
            .await
            .as_ref()
            .is_some_and(|o| o.finished.borrow().is_none())
    }
}

async fn pump(
    slot: Slot,
    id: Uuid,
    command: String,
    mut output: ProcessOutput,
    exit: BoxFuture<'static, i32>,
    observer: Arc<dyn ProcessObserver>,
    finished: watch::Sender<Option<i32>>,
) {
    while let Some(data) = output.next().await {
        observer
            .on_process_event(ProcessEvent::Output {
                slot,
                id,
                command: command.clone(),
                data,
            })
            .await;
    }

    let code = exit.await;
    debug!("`{command}` exited with code {code}");
    observer
        .on_process_event(ProcessEvent::Exit {
            slot,
            id,
            command,
            code,
        })
        .await;
    finished.send_replace(Some(code));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::mock::{MockSandbox, Script, KILLED};
    use std::time::Duration;

    fn supervisor(sandbox: Arc<MockSandbox>) -> (ProcessSupervisor, mpsc::UnboundedReceiver<ProcessEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ProcessSupervisor::new(sandbox, Arc::new(tx)), rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ProcessEvent>) -> ProcessEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for process event")
            .expect("event channel closed")
    }

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_output_then_single_exit() {
        let sandbox = Arc::new(MockSandbox::new());
        sandbox.script(
            "echo hi",
            Script::Exit {
                output: lines(&["a", "b"]),
                code: 0,
            },
        );
        let (supervisor, mut rx) = supervisor(sandbox);

        let handle = supervisor
            .start(Slot::Command, "echo", &["hi".into()])
            .await
            .unwrap();
        assert_eq!(handle.command, "echo hi");
        assert_eq!(handle.wait().await, 0);
        assert!(handle.has_exited());

        let mut data = Vec::new();
        loop {
            match next_event(&mut rx).await {
                ProcessEvent::Output { data: d, .. } => data.push(d),
                ProcessEvent::Exit { code, id, .. } => {
                    assert_eq!(code, 0);
                    assert_eq!(id, handle.id);
                    break;
                }
            }
        }
        assert_eq!(data, lines(&["a", "b"]));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_reported_not_raised() {
        let sandbox = Arc::new(MockSandbox::new());
        sandbox.script(
            "false",
            Script::Exit {
                output: vec![],
                code: 3,
            },
        );
        let (supervisor, mut rx) = supervisor(sandbox);

        let handle = supervisor.start(Slot::Command, "false", &[]).await.unwrap();
        assert_eq!(handle.wait().await, 3);
        assert!(matches!(
            next_event(&mut rx).await,
            ProcessEvent::Exit { code: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_restart_reports_previous_exit_before_new_output() {
        let sandbox = Arc::new(MockSandbox::new());
        sandbox.script(
            "server one",
            Script::UntilKilled {
                output: lines(&["first"]),
            },
        );
        sandbox.script(
            "server two",
            Script::Exit {
                output: lines(&["second"]),
                code: 0,
            },
        );
        let (supervisor, mut rx) = supervisor(sandbox.clone());

        let first = supervisor
            .start(Slot::Serve, "server", &["one".into()])
            .await
            .unwrap();
        assert!(matches!(
            next_event(&mut rx).await,
            ProcessEvent::Output { ref data, .. } if data == "first"
        ));
        assert!(supervisor.is_running(Slot::Serve).await);

        let second = supervisor
            .start(Slot::Serve, "server", &["two".into()])
            .await
            .unwrap();
        assert!(first.has_exited());

        let events = vec![
            next_event(&mut rx).await,
            next_event(&mut rx).await,
            next_event(&mut rx).await,
        ];
        assert_eq!(
            events,
            vec![
                ProcessEvent::Exit {
                    slot: Slot::Serve,
                    id: first.id,
                    command: "server one".into(),
                    code: KILLED,
                },
                ProcessEvent::Output {
                    slot: Slot::Serve,
                    id: second.id,
                    command: "server two".into(),
                    data: "second".into(),
                },
                ProcessEvent::Exit {
                    slot: Slot::Serve,
                    id: second.id,
                    command: "server two".into(),
                    code: 0,
                },
            ]
        );
        assert_eq!(sandbox.spawned(), vec!["server one", "server two"]);
    }

    #[tokio::test]
    async fn test_kill_empty_slot_is_noop() {
        let sandbox = Arc::new(MockSandbox::new());
        let (supervisor, mut rx) = supervisor(sandbox);
        supervisor.kill(Slot::Install).await;
        supervisor.kill_all().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_kill_exited_process_is_noop() {
        let sandbox = Arc::new(MockSandbox::new());
        let (supervisor, mut rx) = supervisor(sandbox);

        let handle = supervisor.start(Slot::Command, "true", &[]).await.unwrap();
        handle.wait().await;
        assert!(matches!(next_event(&mut rx).await, ProcessEvent::Exit { .. }));

        supervisor.kill(Slot::Command).await;
        supervisor.kill_process(&handle).await;
        assert!(rx.try_recv().is_err());
        assert!(!supervisor.is_running(Slot::Command).await);
    }

    #[tokio::test]
    async fn test_kill_running_process() {
        let sandbox = Arc::new(MockSandbox::new());
        sandbox.script("sleep", Script::UntilKilled { output: vec![] });
        let (supervisor, mut rx) = supervisor(sandbox);

        let handle = supervisor.start(Slot::Install, "sleep", &[]).await.unwrap();
        supervisor.kill(Slot::Install).await;
        assert_eq!(handle.wait().await, KILLED);
        assert!(matches!(
            next_event(&mut rx).await,
            ProcessEvent::Exit { code: KILLED, .. }
        ));
        assert!(!supervisor.is_running(Slot::Install).await);
    }

    #[tokio::test]
    async fn test_kill_process_ignores_stale_handle() {
        let sandbox = Arc::new(MockSandbox::new());
        sandbox.script("a", Script::Exit { output: vec![], code: 0 });
        sandbox.script("b", Script::UntilKilled { output: vec![] });
        let (supervisor, _rx) = supervisor(sandbox);

        let stale = supervisor.start(Slot::Serve, "a", &[]).await.unwrap();
        stale.wait().await;
        let current = supervisor.start(Slot::Serve, "b", &[]).await.unwrap();

        supervisor.kill_process(&stale).await;
        assert!(supervisor.is_running(Slot::Serve).await);
        assert!(!current.has_exited());
    }

    #[tokio::test]
    async fn test_slots_are_independent() {
        let sandbox = Arc::new(MockSandbox::new());
        sandbox.script("dev", Script::UntilKilled { output: vec![] });
        let (supervisor, _rx) = supervisor(sandbox);

        supervisor.start(Slot::Serve, "dev", &[]).await.unwrap();
        let cmd = supervisor.start(Slot::Command, "ls", &[]).await.unwrap();
        cmd.wait().await;
        assert!(supervisor.is_running(Slot::Serve).await);
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_slot_empty() {
        let sandbox = Arc::new(MockSandbox::new());
        sandbox.script("nope", Script::FailSpawn);
        let (supervisor, _rx) = supervisor(sandbox);

        let result = supervisor.start(Slot::Command, "nope", &[]).await;
        assert!(matches!(result, Err(SandboxError::Spawn { .. })));
        assert!(!supervisor.is_running(Slot::Command).await);
    }
}
