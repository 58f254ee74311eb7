/// Inbound message parsing.
///
/// Peers are inconsistent about how they encode messages: most send the
/// object envelope, some send a bare string (`"ping"`). Both are accepted
/// here and normalized into an [`InboundMessage`].
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::sandbox::FileTree;

/// Opaque token linking a request to its direct response.
///
/// Kept as the original JSON value (string or number) so it is echoed
/// back exactly as the peer sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationId(Value);

impl CorrelationId {
    /// Accepts non-empty strings and numbers; anything else is not an id.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(value.clone())),
            Value::Number(_) => Some(Self(value.clone())),
            _ => None,
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(Value::String(id.to_string()))
    }
}

/// The fixed inbound vocabulary, matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Ping,
    HealthCheck,
    MountFiles,
    RunCommand,
    WriteFile,
    ReadFile,
    Unknown,
}

impl MessageKind {
    pub fn parse(kind: &str) -> Self {
        match kind.trim().to_ascii_lowercase().as_str() {
            "ping" => Self::Ping,
            "health-check" => Self::HealthCheck,
            "mount-files" => Self::MountFiles,
            "run-command" => Self::RunCommand,
            "write-file" => Self::WriteFile,
            "read-file" => Self::ReadFile,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::HealthCheck => "health-check",
            Self::MountFiles => "mount-files",
            Self::RunCommand => "run-command",
            Self::WriteFile => "write-file",
            Self::ReadFile => "read-file",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MountFiles {
    pub files: FileTree,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadFile {
    pub path: String,
}

/// Requests that act on the sandbox. These run as spawned tasks because
/// they suspend on sandbox calls.
#[derive(Debug, Clone)]
pub enum SandboxRequest {
    MountFiles(MountFiles),
    RunCommand(RunCommand),
    WriteFile(WriteFile),
    ReadFile(ReadFile),
}

/// A fully decoded inbound request.
#[derive(Debug, Clone)]
pub enum Request {
    /// Liveness probe, completes the handshake.
    Ping,
    /// Out-of-band status query, answered straight to the sender.
    HealthCheck,
    Sandbox(SandboxRequest),
    /// Forward compatibility: unknown kinds are ignored, never a fault.
    Unknown,
}

/// A parsed inbound envelope, before payload decoding.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub kind: MessageKind,
    /// Kind exactly as received, for logging.
    pub raw_kind: String,
    pub payload: Value,
    pub id: Option<CorrelationId>,
}

impl InboundMessage {
    /// Parses the `data` of a cross-document message.
    ///
    /// Returns `None` for shapes that are not a message at all (numbers,
    /// arrays, objects without a string `type`).
    pub fn parse(data: &Value) -> Option<Self> {
        match data {
            Value::String(kind) => Some(Self {
                kind: MessageKind::parse(kind),
                raw_kind: kind.clone(),
                payload: Value::Object(Map::new()),
                id: None,
            }),
            Value::Object(map) => {
                let raw_kind = map.get("type")?.as_str()?.to_string();
                let payload = match map.get("payload") {
                    Some(Value::Object(payload)) => Value::Object(payload.clone()),
                    _ => Value::Object(Map::new()),
                };
                Some(Self {
                    kind: MessageKind::parse(&raw_kind),
                    raw_kind,
                    payload,
                    id: map.get("id").and_then(CorrelationId::from_value),
                })
            }
            _ => None,
        }
    }

    /// Decodes the payload according to the message kind.
    pub fn request(&self) -> Result<Request, serde_json::Error> {
        let request = match self.kind {
            MessageKind::Ping => Request::Ping,
            MessageKind::HealthCheck => Request::HealthCheck,
            MessageKind::MountFiles => {
                Request::Sandbox(SandboxRequest::MountFiles(self.payload_as()?))
            }
            MessageKind::RunCommand => {
                Request::Sandbox(SandboxRequest::RunCommand(self.payload_as()?))
            }
            MessageKind::WriteFile => {
                Request::Sandbox(SandboxRequest::WriteFile(self.payload_as()?))
            }
            MessageKind::ReadFile => {
                Request::Sandbox(SandboxRequest::ReadFile(self.payload_as()?))
            }
            MessageKind::Unknown => Request::Unknown,
        };
        Ok(request)
    }

    fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
