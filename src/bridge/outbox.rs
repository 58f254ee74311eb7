use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::channel::{ChannelCommand, ANY_ORIGIN};
use crate::protocol::{Broadcast, OutboundEvent, Reply};
use crate::supervisor::{ProcessEvent, ProcessObserver};

/// Single exit point for everything the bridge posts to its peer.
///
/// Broadcasts go to the connected peer's origin, or to `*` while no peer
/// is known yet. Replies go to the origin of the request they answer.
#[derive(Clone)]
pub struct Outbox {
    cmd_tx: mpsc::Sender<ChannelCommand>,
    peer: Arc<Mutex<Option<String>>>,
}

impl Outbox {
    pub fn new(cmd_tx: mpsc::Sender<ChannelCommand>) -> Self {
        Self {
            cmd_tx,
            peer: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_peer(&self, origin: &str) {
        let mut peer = self.peer.lock().unwrap_or_else(PoisonError::into_inner);
        *peer = Some(origin.to_string());
    }

    pub fn peer(&self) -> Option<String> {
        self.peer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Addressed to the pinned peer, or to `*` while no ping has arrived.
    /// Anything broadcast before the handshake completes, such as boot
    /// status or early command output, is visible to any embedding document.
    pub async fn broadcast(&self, broadcast: Broadcast) {
        let target = self.peer().unwrap_or_else(|| ANY_ORIGIN.to_string());
        debug!("→ {} (broadcast to {target})", broadcast.event().kind());
        self.post(target, broadcast.to_envelope()).await;
    }

    pub async fn reply(&self, origin: &str, reply: Reply) {
        debug!("→ {} (reply to {origin})", reply.event().kind());
        self.post(origin.to_string(), reply.to_envelope()).await;
    }

    /// Posts raw data to `*`. Used by the handshake, whose announcements
    /// precede any known peer.
    pub async fn announce(&self, data: Value) {
        self.post(ANY_ORIGIN.to_string(), data).await;
    }

    async fn post(&self, target_origin: String, data: Value) {
        let command = ChannelCommand::Post {
            target_origin,
            data,
        };
        if self.cmd_tx.send(command).await.is_err() {
            warn!("Channel closed, dropping outbound message");
        }
    }
}

#[async_trait]
impl ProcessObserver for Outbox {
    async fn on_process_event(&self, event: ProcessEvent) {
        let event = match event {
            ProcessEvent::Output { command, data, .. } => {
                OutboundEvent::CommandOutput { command, data }
            }
            ProcessEvent::Exit { command, code, .. } => OutboundEvent::CommandExit {
                command,
                exit_code: code,
            },
        };
        self.broadcast(Broadcast::new(event)).await;
    }
}
