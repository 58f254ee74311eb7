//! Sandbox lifecycle: boot, then mount → install → serve per project.
//!
//! ```text
//! Booting ─► Ready ─► Mounting ─► Installing ─► Serving ─► ServerReady
//!              ▲         │  └──► Mounted (no manifest)
//!              └─────────┘ mount failed
//! any ─► Faulted (boot, manifest, install, serve or runtime fault)
//! ```
//!
//! Every mount bumps a generation counter. A mount that was superseded
//! while suspended stops at its next resumption without touching state.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use crate::bridge::{BridgeError, Outbox};
use crate::config::SandboxConfig;
use crate::protocol::{Broadcast, ErrorCode, OutboundEvent};
use crate::sandbox::manifest::{self, Manifest, MANIFEST_FILE};
use crate::sandbox::{FileTree, NoticeFeed, SandboxError, SandboxNotice, SandboxRuntime};
use crate::supervisor::{ProcessSupervisor, Slot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Booting,
    Ready,
    Mounting,
    Installing,
    Serving,
    ServerReady,
    /// Files mounted, no manifest: nothing to install or serve.
    Mounted,
    Faulted,
}

impl LifecycleState {
    /// Value of the `status` field in status updates and health replies.
    pub fn label(self) -> &'static str {
        match self {
            Self::Booting => "booting",
            Self::Ready => "ready",
            Self::Mounting => "mounting",
            Self::Installing => "installing",
            Self::Serving => "serving",
            Self::ServerReady => "server-ready",
            Self::Mounted => "mounted",
            Self::Faulted => "faulted",
        }
    }
}

/// Point-in-time view, used by health checks.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleStatus {
    pub state: LifecycleState,
    pub booted: bool,
    pub mounted: bool,
    pub reachable: Option<String>,
    pub generation: u64,
}

impl LifecycleStatus {
    pub fn sandbox_active(&self) -> bool {
        self.booted && self.state != LifecycleState::Faulted
    }
}

struct Inner {
    state: LifecycleState,
    booted: bool,
    mounted: bool,
    reachable: Option<String>,
    generation: u64,
}

pub struct Lifecycle {
    sandbox: Arc<dyn SandboxRuntime>,
    supervisor: Arc<ProcessSupervisor>,
    outbox: Outbox,
    config: SandboxConfig,
    inner: Mutex<Inner>,
}

impl Lifecycle {
    pub fn new(
        sandbox: Arc<dyn SandboxRuntime>,
        supervisor: Arc<ProcessSupervisor>,
        outbox: Outbox,
        config: SandboxConfig,
    ) -> Self {
        Self {
            sandbox,
            supervisor,
            outbox,
            config,
            inner: Mutex::new(Inner {
                state: LifecycleState::Booting,
                booted: false,
                mounted: false,
                reachable: None,
                generation: 0,
            }),
        }
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner)
    }

    #[cfg(test)]
    pub fn state(&self) -> LifecycleState {
        self.with_inner(|inner| inner.state)
    }

    pub fn snapshot(&self) -> LifecycleStatus {
        self.with_inner(|inner| LifecycleStatus {
            state: inner.state,
            booted: inner.booted,
            mounted: inner.mounted,
            reachable: inner.reachable.clone(),
            generation: inner.generation,
        })
    }

    /// Rejects sandbox work until boot has succeeded.
    pub fn ensure_ready(&self) -> Result<(), BridgeError> {
        if self.with_inner(|inner| inner.booted) {
            Ok(())
        } else {
            Err(BridgeError::NotReady)
        }
    }

    /// Boots the sandbox. Called once per session; there is no retry.
    pub async fn boot(&self) -> Option<NoticeFeed> {
        self.broadcast(OutboundEvent::status(
            LifecycleState::Booting.label(),
            "Booting sandbox",
        ))
        .await;

        match self.sandbox.boot().await {
            Ok(feed) => {
                self.with_inner(|inner| inner.booted = true);
                info!("✓ Sandbox booted");
                self.enter(LifecycleState::Ready, "Sandbox ready").await;
                Some(feed)
            }
            Err(e) => {
                error!("Sandbox boot failed: {e}");
                self.fault(OutboundEvent::error(ErrorCode::BootFailed, e.to_string()))
                    .await;
                None
            }
        }
    }

    /// Mounts a project and drives it through install and serve.
    ///
    /// Only refusal is returned as an error. Failures past that point are
    /// broadcast as error events and leave the lifecycle in its failure
    /// state.
    pub async fn mount(&self, tree: &FileTree) -> Result<(), BridgeError> {
        self.ensure_ready()?;
        let generation = self.with_inner(|inner| {
            inner.generation += 1;
            inner.generation
        });
        debug!("Mount generation {generation}");

        self.supervisor.kill(Slot::Install).await;
        self.supervisor.kill(Slot::Serve).await;
        let current = self.with_inner(|inner| {
            if inner.generation != generation {
                return false;
            }
            inner.state = LifecycleState::Ready;
            inner.mounted = false;
            inner.reachable = None;
            true
        });
        if !current {
            return Ok(());
        }

        if !self
            .enter_current(generation, LifecycleState::Mounting, "Mounting files")
            .await
        {
            return Ok(());
        }
        let mounted = self.sandbox.mount(tree).await;
        if !self.is_current(generation) {
            return Ok(());
        }
        if let Err(e) = mounted {
            warn!("Mount failed: {e}");
            self.with_inner(|inner| inner.state = LifecycleState::Ready);
            self.broadcast(OutboundEvent::error(ErrorCode::MountFailed, e.to_string()))
                .await;
            return Ok(());
        }
        self.with_inner(|inner| inner.mounted = true);

        let manifest_text = match self.sandbox.read_file(MANIFEST_FILE).await {
            Ok(text) => text,
            Err(SandboxError::NotFound(_)) => {
                info!("No {MANIFEST_FILE}, nothing to install");
                self.enter_current(
                    generation,
                    LifecycleState::Mounted,
                    "Files mounted (no package.json)",
                )
                .await;
                return Ok(());
            }
            Err(e) => {
                if self.is_current(generation) {
                    self.fault(
                        OutboundEvent::error(ErrorCode::ManifestInvalid, e.to_string())
                            .with_context("path", MANIFEST_FILE),
                    )
                    .await;
                }
                return Ok(());
            }
        };
        if !self.is_current(generation) {
            return Ok(());
        }
        let manifest = match Manifest::parse(&manifest_text) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Invalid {MANIFEST_FILE}: {e}");
                self.fault(
                    OutboundEvent::error(
                        ErrorCode::ManifestInvalid,
                        format!("{MANIFEST_FILE} is not valid JSON: {e}"),
                    )
                    .with_context("path", MANIFEST_FILE),
                )
                .await;
                return Ok(());
            }
        };

        if !self.install(generation).await {
            return Ok(());
        }
        self.serve(generation, &manifest).await;
        Ok(())
    }

    /// Returns true if installation succeeded for the current generation.
    async fn install(&self, generation: u64) -> bool {
        let package_manager = &self.config.package_manager;
        if !self
            .enter_current(
                generation,
                LifecycleState::Installing,
                "Installing dependencies",
            )
            .await
        {
            return false;
        }

        let handle = match self
            .supervisor
            .start(Slot::Install, package_manager, &self.config.install_args)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                if self.is_current(generation) {
                    self.fault(OutboundEvent::error(ErrorCode::InstallFailed, e.to_string()))
                        .await;
                }
                return false;
            }
        };
        if !self.is_current(generation) {
            self.supervisor.kill_process(&handle).await;
            return false;
        }

        let code = handle.wait().await;
        if !self.is_current(generation) {
            return false;
        }
        if code != 0 {
            warn!("`{}` exited with code {code}", handle.command);
            self.fault(
                OutboundEvent::error(
                    ErrorCode::InstallFailed,
                    format!("install failed with code {code}"),
                )
                .with_context("exitCode", code),
            )
            .await;
            return false;
        }
        true
    }

    async fn serve(&self, generation: u64, manifest: &Manifest) {
        let serve = manifest::serve_command(manifest, &self.config.default_script);
        info!("Serving with script `{}`", serve.script);
        if !self
            .enter_current(
                generation,
                LifecycleState::Serving,
                &format!("Starting {} script", serve.script),
            )
            .await
        {
            return;
        }

        match self
            .supervisor
            .start(Slot::Serve, &self.config.package_manager, &serve.args)
            .await
        {
            Ok(handle) => {
                if !self.is_current(generation) {
                    self.supervisor.kill_process(&handle).await;
                }
            }
            Err(e) => {
                if self.is_current(generation) {
                    self.fault(
                        OutboundEvent::error(ErrorCode::ServeFailed, e.to_string())
                            .with_context("script", serve.script),
                    )
                    .await;
                }
            }
        }
    }

    /// Reacts to a notice pushed by the sandbox runtime.
    pub async fn on_notice(&self, notice: SandboxNotice) {
        match notice {
            SandboxNotice::ServerReady { port, url } => {
                info!("✓ Server ready on port {port}: {url}");
                let was_serving = self.with_inner(|inner| {
                    inner.reachable = Some(url.clone());
                    if inner.state == LifecycleState::Serving {
                        inner.state = LifecycleState::ServerReady;
                        true
                    } else {
                        false
                    }
                });
                self.broadcast(OutboundEvent::ServerReady {
                    port,
                    url: url.clone(),
                })
                .await;
                if was_serving {
                    self.broadcast(OutboundEvent::status(
                        LifecycleState::ServerReady.label(),
                        format!("Server listening at {url}"),
                    ))
                    .await;
                }
            }
            SandboxNotice::Fault { message } => {
                error!("Sandbox fault: {message}");
                self.fault(OutboundEvent::error(ErrorCode::SandboxError, message))
                    .await;
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.with_inner(|inner| inner.generation == generation)
    }

    async fn enter(&self, state: LifecycleState, message: &str) {
        self.with_inner(|inner| inner.state = state);
        self.broadcast(OutboundEvent::status(state.label(), message))
            .await;
    }

    /// Moves to `state` unless `generation` was superseded.
    async fn enter_current(&self, generation: u64, state: LifecycleState, message: &str) -> bool {
        let current = self.with_inner(|inner| {
            if inner.generation != generation {
                return false;
            }
            inner.state = state;
            true
        });
        if current {
            self.broadcast(OutboundEvent::status(state.label(), message))
                .await;
        }
        current
    }

    /// Enters `Faulted` and ends any in-flight mount. Only a new mount
    /// leaves this state.
    async fn fault(&self, event: OutboundEvent) {
        self.with_inner(|inner| {
            inner.state = LifecycleState::Faulted;
            inner.generation += 1;
        });
        self.broadcast(event).await;
    }

    async fn broadcast(&self, event: OutboundEvent) {
        self.outbox.broadcast(Broadcast::new(event)).await;
    }
}
