/// Outbound events and envelope encoding.
use chrono::Utc;
use serde_json::{json, Map, Value};

use super::inbound::CorrelationId;

/// Stable error codes carried in `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BootFailed,
    MountFailed,
    ManifestInvalid,
    InstallFailed,
    ServeFailed,
    SandboxError,
    SandboxNotReady,
    CommandFailed,
    ReadFailed,
    WriteFailed,
    InvalidPayload,
    HandlerError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BootFailed => "BOOT_FAILED",
            Self::MountFailed => "MOUNT_FAILED",
            Self::ManifestInvalid => "MANIFEST_INVALID",
            Self::InstallFailed => "INSTALL_FAILED",
            Self::ServeFailed => "SERVE_FAILED",
            Self::SandboxError => "SANDBOX_ERROR",
            Self::SandboxNotReady => "SANDBOX_NOT_READY",
            Self::CommandFailed => "COMMAND_FAILED",
            Self::ReadFailed => "READ_FAILED",
            Self::WriteFailed => "WRITE_FAILED",
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::HandlerError => "HANDLER_ERROR",
        }
    }
}

/// Every message the bridge can send to its peer.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    /// Handshake announcement.
    Ready,
    /// Liveness response.
    Pong,
    CommandOutput {
        command: String,
        data: String,
    },
    CommandExit {
        command: String,
        exit_code: i32,
    },
    ServerReady {
        port: u16,
        url: String,
    },
    FileContent {
        path: String,
        content: String,
    },
    FileWritten {
        path: String,
    },
    StatusUpdate {
        status: String,
        message: String,
    },
    Health {
        status: String,
        sandbox_active: bool,
        reachable_address: Option<String>,
        connected: bool,
    },
    Error {
        message: String,
        code: ErrorCode,
        /// Extra fields merged into the payload (kind, exitCode, path…).
        context: Map<String, Value>,
    },
}

impl OutboundEvent {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code,
            context: Map::new(),
        }
    }

    pub fn status(status: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StatusUpdate {
            status: status.into(),
            message: message.into(),
        }
    }

    /// Adds a context field to an `Error` event. No-op on other variants.
    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Self::Error { context, .. } = &mut self {
            context.insert(key.to_string(), value.into());
        }
        self
    }

    /// The envelope `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Pong => "pong",
            Self::CommandOutput { .. } => "command-output",
            Self::CommandExit { .. } => "command-exit",
            Self::ServerReady { .. } => "server-ready",
            Self::FileContent { .. } => "file-content",
            Self::FileWritten { .. } => "file-written",
            Self::StatusUpdate { .. } => "status-update",
            Self::Health { .. } => "health-check",
            Self::Error { .. } => "error",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::Ready => json!({
                "bridge": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }),
            Self::Pong => json!({}),
            Self::CommandOutput { command, data } => json!({
                "command": command,
                "data": data,
            }),
            Self::CommandExit { command, exit_code } => json!({
                "command": command,
                "exitCode": exit_code,
            }),
            Self::ServerReady { port, url } => json!({
                "port": port,
                "url": url,
            }),
            Self::FileContent { path, content } => json!({
                "path": path,
                "content": content,
            }),
            Self::FileWritten { path } => json!({ "path": path }),
            Self::StatusUpdate { status, message } => json!({
                "status": status,
                "message": message,
            }),
            Self::Health {
                status,
                sandbox_active,
                reachable_address,
                connected,
            } => json!({
                "status": status,
                "sandboxActive": sandbox_active,
                "reachableAddress": reachable_address,
                "connected": connected,
            }),
            Self::Error {
                message,
                code,
                context,
            } => {
                let mut payload = context.clone();
                payload.insert("message".into(), Value::String(message.clone()));
                payload.insert("code".into(), Value::String(code.as_str().into()));
                Value::Object(payload)
            }
        }
    }
}

fn envelope(event: &OutboundEvent, id: Option<&CorrelationId>) -> Value {
    let mut envelope = Map::new();
    envelope.insert("type".into(), Value::String(event.kind().into()));
    envelope.insert("payload".into(), event.payload());
    envelope.insert("timestamp".into(), json!(Utc::now().timestamp_millis()));
    if let Some(id) = id {
        envelope.insert("id".into(), id.as_value().clone());
    }
    Value::Object(envelope)
}

/// An event that is not a response to any particular request.
/// Never carries a correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct Broadcast(OutboundEvent);

impl Broadcast {
    pub fn new(event: OutboundEvent) -> Self {
        Self(event)
    }

    pub fn event(&self) -> &OutboundEvent {
        &self.0
    }

    pub fn to_envelope(&self) -> Value {
        envelope(&self.0, None)
    }
}

impl From<OutboundEvent> for Broadcast {
    fn from(event: OutboundEvent) -> Self {
        Self(event)
    }
}

/// The direct result of a request, echoing its correlation id if it had one.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    event: OutboundEvent,
    id: Option<CorrelationId>,
}

impl Reply {
    pub fn new(event: OutboundEvent, id: Option<CorrelationId>) -> Self {
        Self { event, id }
    }

    pub fn event(&self) -> &OutboundEvent {
        &self.event
    }

    pub fn to_envelope(&self) -> Value {
        envelope(&self.event, self.id.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_envelope_has_no_id() {
        let value = Broadcast::new(OutboundEvent::status("ready", "Sandbox booted")).to_envelope();
        assert_eq!(value["type"], "status-update");
        assert_eq!(value["payload"]["status"], "ready");
        assert!(value["timestamp"].as_i64().unwrap() > 0);
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_reply_echoes_id() {
        let value = Reply::new(OutboundEvent::Pong, Some(CorrelationId::from("abc123"))).to_envelope();
        assert_eq!(value["type"], "pong");
        assert_eq!(value["id"], "abc123");
    }

    #[test]
    fn test_reply_without_id() {
        let value = Reply::new(OutboundEvent::Pong, None).to_envelope();
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_command_exit_uses_camel_case() {
        let event = OutboundEvent::CommandExit {
            command: "npm install".into(),
            exit_code: 1,
        };
        assert_eq!(event.payload(), json!({"command": "npm install", "exitCode": 1}));
    }

    #[test]
    fn test_error_payload_merges_context() {
        let event = OutboundEvent::error(ErrorCode::InstallFailed, "install failed with code 2")
            .with_context("exitCode", 2);
        let payload = event.payload();
        assert_eq!(payload["code"], "INSTALL_FAILED");
        assert_eq!(payload["message"], "install failed with code 2");
        assert_eq!(payload["exitCode"], 2);
    }

    #[test]
    fn test_context_cannot_override_code() {
        let event = OutboundEvent::error(ErrorCode::HandlerError, "boom").with_context("code", "X");
        assert_eq!(event.payload()["code"], "HANDLER_ERROR");
    }

    #[test]
    fn test_with_context_ignored_on_non_error() {
        let event = OutboundEvent::Pong.with_context("x", 1);
        assert_eq!(event, OutboundEvent::Pong);
    }

    #[test]
    fn test_health_payload() {
        let event = OutboundEvent::Health {
            status: "ready".into(),
            sandbox_active: true,
            reachable_address: None,
            connected: false,
        };
        assert_eq!(
            event.payload(),
            json!({
                "status": "ready",
                "sandboxActive": true,
                "reachableAddress": null,
                "connected": false,
            })
        );
    }
}
