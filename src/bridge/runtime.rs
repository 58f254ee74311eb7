use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::info;

use super::outbox::Outbox;
use super::router::Router;
use super::session::Session;
use crate::channel::{ChannelCommand, ChannelEvent};
use crate::config::Config;
use crate::sandbox::SandboxRuntime;

/// Drives one bridge session over an open channel.
pub struct BridgeRuntime {
    config: Config,
    sandbox: Arc<dyn SandboxRuntime>,
}

impl BridgeRuntime {
    pub fn new(config: Config, sandbox: Arc<dyn SandboxRuntime>) -> Self {
        Self { config, sandbox }
    }

    /// Main bridge loop. Returns once the channel closes or `shutdown`
    /// resolves, after the session has been torn down.
    pub async fn run(
        &self,
        mut event_rx: mpsc::Receiver<ChannelEvent>,
        cmd_tx: mpsc::Sender<ChannelCommand>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let session = Session::new(&self.config, self.sandbox.clone(), Outbox::new(cmd_tx));
        let router = Router::new(session.clone());

        // Boot runs alongside message handling: early requests are answered
        // with SANDBOX_NOT_READY instead of queueing behind the boot.
        let init = tokio::spawn({
            let session = session.clone();
            async move { session.init().await }
        });

        info!("Bridge runtime started, waiting for messages...");
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                event = event_rx.recv() => match event {
                    Some(ChannelEvent::Message { origin, data }) => {
                        router.handle(&origin, data).await;
                    }
                    Some(ChannelEvent::Closed) | None => {
                        info!("Channel closed");
                        break;
                    }
                },
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        init.abort();
        session.teardown().await;
        Ok(())
    }
}
