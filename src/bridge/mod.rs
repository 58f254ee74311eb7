pub mod handshake;
pub mod origin;
pub mod outbox;
pub mod router;
pub mod runtime;
pub mod session;

pub use outbox::Outbox;
pub use runtime::BridgeRuntime;

use crate::protocol::ErrorCode;
use crate::sandbox::SandboxError;

/// Failure of a single request. Each variant maps to the error code sent
/// back to the requester.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("sandbox is not ready")]
    NotReady,

    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: String,
        source: serde_json::Error,
    },

    #[error("{0}")]
    Command(SandboxError),

    #[error("cannot read {path}: {source}")]
    Read { path: String, source: SandboxError },

    #[error("cannot write {path}: {source}")]
    Write { path: String, source: SandboxError },

    #[error("{0}")]
    Handler(String),
}

impl BridgeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotReady => ErrorCode::SandboxNotReady,
            Self::InvalidPayload { .. } => ErrorCode::InvalidPayload,
            Self::Command(_) => ErrorCode::CommandFailed,
            Self::Read { .. } => ErrorCode::ReadFailed,
            Self::Write { .. } => ErrorCode::WriteFailed,
            Self::Handler(_) => ErrorCode::HandlerError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(BridgeError::NotReady.code(), ErrorCode::SandboxNotReady);
        let read = BridgeError::Read {
            path: "a.txt".into(),
            source: SandboxError::NotFound("a.txt".into()),
        };
        assert_eq!(read.code(), ErrorCode::ReadFailed);
        assert!(read.to_string().contains("a.txt"));
        let bad = serde_json::from_str::<u8>("x").unwrap_err();
        let invalid = BridgeError::InvalidPayload {
            kind: "write-file".into(),
            source: bad,
        };
        assert_eq!(invalid.code(), ErrorCode::InvalidPayload);
        assert!(invalid.to_string().starts_with("invalid write-file payload"));
    }
}
