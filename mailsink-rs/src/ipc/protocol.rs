use crate::error::Result;
use crate::events::EventBus;
use crate::ipc::event::decode_frame;
use crate::net::{Connection, Flow, Protocol, TextEncoding};
use async_trait::async_trait;
use tracing::{debug, warn};

/// Receives event frames and republishes them on the local bus
///
/// Malformed frames are logged and dropped; the connection stays open.
pub struct IpcEventProtocol {
    events: EventBus,
}

impl IpcEventProtocol {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }
}

#[async_trait]
impl Protocol for IpcEventProtocol {
    async fn begin(&mut self, conn: &Connection) -> Result<()> {
        debug!("IPC peer connected: {:?}", conn.peer());
        // Frames are JSON, always UTF-8
        conn.set_encoding(TextEncoding::Utf8);
        Ok(())
    }

    async fn process_request(&mut self, conn: &Connection, line: &str) -> Result<Flow> {
        if line.trim().is_empty() {
            return Ok(Flow::Continue);
        }

        match decode_frame(line) {
            Ok(event) => {
                debug!("IPC event {} from connection {}", event.name(), conn.id());
                self.events.publish(event);
            }
            Err(e) => warn!("Dropping malformed IPC frame: {}", e),
        }
        Ok(Flow::Continue)
    }
}
