//! Connection handshake with the parent frame.
//!
//! Once the sandbox is ready the bridge announces itself every interval,
//! in both encodings peers are known to listen for: the object envelope
//! and the bare string `"ready"`. The first trusted `ping` ends the
//! announcements and pins the peer origin for broadcasts.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::outbox::Outbox;
use crate::protocol::{Broadcast, OutboundEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    AwaitingPeer,
    Connected,
}

pub struct Handshake {
    interval: Duration,
    embedded: bool,
    state: Arc<Mutex<ConnectionState>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Handshake {
    pub fn new(interval: Duration, embedded: bool) -> Self {
        Self {
            interval,
            embedded,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            timer: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Starts announcing. No-op when not embedded or already started.
    pub fn start(&self, outbox: Outbox) {
        if !self.embedded {
            debug!("Not embedded, skipping handshake");
            return;
        }
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != ConnectionState::Disconnected {
                return;
            }
            *state = ConnectionState::AwaitingPeer;
        }

        info!(
            "Announcing readiness every {}ms until the parent responds",
            self.interval.as_millis()
        );
        let state = self.state.clone();
        let period = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let awaiting = *state.lock().unwrap_or_else(PoisonError::into_inner)
                    == ConnectionState::AwaitingPeer;
                if !awaiting {
                    break;
                }
                outbox
                    .announce(Broadcast::new(OutboundEvent::Ready).to_envelope())
                    .await;
                outbox
                    .announce(Value::String(OutboundEvent::Ready.kind().to_string()))
                    .await;
            }
        });
        *self.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Handles a trusted liveness probe. Returns true if this probe
    /// completed the handshake.
    pub fn on_probe(&self, origin: &str, outbox: &Outbox) -> bool {
        let first = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let first = *state != ConnectionState::Connected;
            *state = ConnectionState::Connected;
            first
        };
        if first {
            info!("✓ Connected to parent at {origin}");
            outbox.set_peer(origin);
            self.cancel();
        }
        first
    }

    /// Stops the announcement timer. Safe to call repeatedly.
    pub fn cancel(&self) {
        let timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = timer {
            handle.abort();
        }
    }
}

impl Drop for Handshake {
    fn drop(&mut self) {
        self.cancel();
    }
}
