//! Single entry point for inbound cross-document messages.
//!
//! The trust check, parsing and handshake update run inline, in arrival
//! order. Sandbox requests then run as spawned tasks, so a long mount
//! never blocks a ping.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::session::Session;
use super::BridgeError;
use crate::protocol::{
    CorrelationId, InboundMessage, MessageKind, OutboundEvent, Reply, Request, SandboxRequest,
};
use crate::supervisor::Slot;

pub struct Router {
    session: Arc<Session>,
}

impl Router {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn handle(&self, origin: &str, data: Value) {
        if !self.session.guard().is_trusted(origin) {
            warn!("Message from untrusted origin {origin:?}, ignoring");
            return;
        }

        let Some(message) = InboundMessage::parse(&data) else {
            debug!("Ignoring non-message data from {origin}");
            return;
        };
        debug!("← {} from {origin}", message.raw_kind);

        let request = match message.request() {
            Ok(request) => request,
            Err(source) => {
                let err = BridgeError::InvalidPayload {
                    kind: message.kind.as_str().to_string(),
                    source,
                };
                warn!("{err}");
                self.reply_error(origin, message.kind, message.id, err).await;
                return;
            }
        };

        let outbox = self.session.outbox();
        match request {
            Request::Ping => {
                self.session.handshake().on_probe(origin, outbox);
                outbox
                    .reply(origin, Reply::new(OutboundEvent::Pong, message.id))
                    .await;
            }
            Request::HealthCheck => {
                outbox
                    .reply(origin, Reply::new(self.session.health(), message.id))
                    .await;
            }
            Request::Unknown => {
                debug!("Unknown message kind {:?}, ignoring", message.raw_kind);
            }
            Request::Sandbox(request) => {
                let session = self.session.clone();
                let origin = origin.to_string();
                tokio::spawn(dispatch(session, origin, message.kind, message.id, request));
            }
        }
    }

    async fn reply_error(
        &self,
        origin: &str,
        kind: MessageKind,
        id: Option<CorrelationId>,
        err: BridgeError,
    ) {
        send_error(&self.session, origin, kind, id, err).await;
    }
}

/// Runs one sandbox request and replies with its direct result.
/// A panicking handler still produces an error reply.
async fn dispatch(
    session: Arc<Session>,
    origin: String,
    kind: MessageKind,
    id: Option<CorrelationId>,
    request: SandboxRequest,
) {
    let worker = tokio::spawn(execute(session.clone(), request));
    let result = match worker.await {
        Ok(result) => result,
        Err(join_error) => Err(BridgeError::Handler(join_error.to_string())),
    };

    match result {
        Ok(Some(event)) => {
            session.outbox().reply(&origin, Reply::new(event, id)).await;
        }
        Ok(None) => {}
        Err(err) => {
            error!("{} failed: {err}", kind.as_str());
            send_error(&session, &origin, kind, id, err).await;
        }
    }
}

async fn execute(
    session: Arc<Session>,
    request: SandboxRequest,
) -> Result<Option<OutboundEvent>, BridgeError> {
    match request {
        SandboxRequest::MountFiles(mount) => {
            session.lifecycle().mount(&mount.files).await?;
            Ok(None)
        }
        SandboxRequest::RunCommand(run) => {
            session.lifecycle().ensure_ready()?;
            info!("Running `{}`", crate::sandbox::command_line(&run.command, &run.args));
            session
                .supervisor()
                .start(Slot::Command, &run.command, &run.args)
                .await
                .map_err(BridgeError::Command)?;
            Ok(None)
        }
        SandboxRequest::WriteFile(write) => {
            session.lifecycle().ensure_ready()?;
            session
                .sandbox()
                .write_file(&write.path, &write.content)
                .await
                .map_err(|source| BridgeError::Write {
                    path: write.path.clone(),
                    source,
                })?;
            Ok(Some(OutboundEvent::FileWritten { path: write.path }))
        }
        SandboxRequest::ReadFile(read) => {
            session.lifecycle().ensure_ready()?;
            let content = session
                .sandbox()
                .read_file(&read.path)
                .await
                .map_err(|source| BridgeError::Read {
                    path: read.path.clone(),
                    source,
                })?;
            Ok(Some(OutboundEvent::FileContent {
                path: read.path,
                content,
            }))
        }
    }
}

async fn send_error(
    session: &Session,
    origin: &str,
    kind: MessageKind,
    id: Option<CorrelationId>,
    err: BridgeError,
) {
    let mut event =
        OutboundEvent::error(err.code(), err.to_string()).with_context("kind", kind.as_str());
    match &err {
        BridgeError::Read { path, .. } | BridgeError::Write { path, .. } => {
            event = event.with_context("path", path.as_str());
        }
        _ => {}
    }
    session.outbox().reply(origin, Reply::new(event, id)).await;
}
