//! JSON-lines framing of cross-document messages.
//!
//! One frame per line. The host page relays each `message` event as
//! `{"origin": "...", "data": ...}` and posts every outbound frame
//! `{"targetOrigin": "...", "data": ...}` with
//! `parent.postMessage(data, targetOrigin)`.
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ChannelCommand, ChannelEvent};

#[derive(Debug, Deserialize)]
struct InboundFrame {
    origin: String,
    data: Value,
}

/// Decodes one line. Blank lines yield `Ok(None)`.
pub fn decode_inbound(line: &str) -> Result<Option<ChannelEvent>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let frame: InboundFrame = serde_json::from_str(line)?;
    Ok(Some(ChannelEvent::Message {
        origin: frame.origin,
        data: frame.data,
    }))
}

/// Encodes one outbound frame, without the trailing newline.
pub fn encode_outbound(command: &ChannelCommand) -> String {
    match command {
        ChannelCommand::Post {
            target_origin,
            data,
        } => json!({
            "targetOrigin": target_origin,
            "data": data,
        })
        .to_string(),
    }
}
