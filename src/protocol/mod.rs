//! Cross-document message protocol.
//!
//! Both directions share one envelope:
//!
//! ```text
//! { type: string, payload: object, timestamp: number, id?: string | number }
//! ```
//!
//! Inbound messages are parsed into an exhaustive [`Request`] so that
//! unrecognized kinds are an explicit variant. Outbound messages are
//! either a [`Broadcast`] (never correlated) or a [`Reply`] (addressed to
//! the requester, optionally echoing its correlation id).

pub mod inbound;
pub mod outbound;

pub use inbound::{CorrelationId, InboundMessage, MessageKind, Request, SandboxRequest};
pub use outbound::{Broadcast, ErrorCode, OutboundEvent, Reply};
