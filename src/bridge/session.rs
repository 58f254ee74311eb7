use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::handshake::Handshake;
use super::origin::OriginGuard;
use super::outbox::Outbox;
use crate::config::Config;
use crate::lifecycle::Lifecycle;
use crate::protocol::OutboundEvent;
use crate::sandbox::SandboxRuntime;
use crate::supervisor::ProcessSupervisor;

/// Everything one page load owns: created at startup, torn down once.
pub struct Session {
    guard: OriginGuard,
    handshake: Handshake,
    outbox: Outbox,
    sandbox: Arc<dyn SandboxRuntime>,
    supervisor: Arc<ProcessSupervisor>,
    lifecycle: Arc<Lifecycle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    pub fn new(config: &Config, sandbox: Arc<dyn SandboxRuntime>, outbox: Outbox) -> Arc<Self> {
        let guard = OriginGuard::new(
            config.bridge.self_origin.clone(),
            config.bridge.allowed_origins.clone(),
        );
        let handshake = Handshake::new(config.handshake_interval(), config.bridge.embedded);
        let supervisor = Arc::new(ProcessSupervisor::new(
            sandbox.clone(),
            Arc::new(outbox.clone()),
        ));
        let lifecycle = Arc::new(Lifecycle::new(
            sandbox.clone(),
            supervisor.clone(),
            outbox.clone(),
            config.sandbox.clone(),
        ));
        Arc::new(Self {
            guard,
            handshake,
            outbox,
            sandbox,
            supervisor,
            lifecycle,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Boots the sandbox, then starts relaying runtime notices and
    /// announcing readiness to the parent.
    pub async fn init(&self) {
        let Some(mut feed) = self.lifecycle.boot().await else {
            return;
        };

        let lifecycle = self.lifecycle.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(notice) = feed.recv().await {
                debug!("Sandbox notice: {notice:?}");
                lifecycle.on_notice(notice).await;
            }
        });
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(forwarder);

        self.handshake.start(self.outbox.clone());
    }

    /// Stops announcing, kills every process and releases the sandbox.
    pub async fn teardown(&self) {
        info!("Tearing down session");
        self.handshake.cancel();
        self.supervisor.kill_all().await;
        self.sandbox.teardown().await;
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
    }

    /// Out-of-band health report.
    pub fn health(&self) -> OutboundEvent {
        let status = self.lifecycle.snapshot();
        OutboundEvent::Health {
            status: status.state.label().to_string(),
            sandbox_active: status.sandbox_active(),
            reachable_address: status.reachable,
            connected: self.handshake.is_connected(),
        }
    }

    pub fn guard(&self) -> &OriginGuard {
        &self.guard
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn sandbox(&self) -> &Arc<dyn SandboxRuntime> {
        &self.sandbox
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }
}
