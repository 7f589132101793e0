//! IPC wire frames
//!
//! One event per line: `{"type":"NewMessage","payload":{...}}\n`.

use crate::error::Result;
use crate::events::DomainEvent;

/// Serialize an event as a single newline-terminated frame
pub fn encode_frame(event: &DomainEvent) -> Result<String> {
    let mut frame = serde_json::to_string(event)?;
    frame.push('\n');
    Ok(frame)
}

/// Parse one frame (terminator already removed)
pub fn decode_frame(line: &str) -> Result<DomainEvent> {
    Ok(serde_json::from_str(line.trim())?)
}
