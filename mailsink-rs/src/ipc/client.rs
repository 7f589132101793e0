//! Best-effort event publishing to a peer process
//!
//! The peer is usually not running, so every publish is bounded by a short
//! timeout and every failure is logged and swallowed.

use crate::error::{Result, SinkError};
use crate::events::{DomainEvent, EventBus};
use crate::ipc::event::encode_frame;
use crate::net::{Connection, EndpointDefinition};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default bound on one publish
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered,
    PeerUnavailable,
}

#[derive(Debug)]
pub struct IpcClient {
    endpoint: EndpointDefinition,
    timeout: Duration,
    next_id: AtomicU64,
}

impl IpcClient {
    pub fn new(endpoint: EndpointDefinition, timeout: Duration) -> Self {
        Self {
            endpoint,
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn endpoint(&self) -> &EndpointDefinition {
        &self.endpoint
    }

    /// Publish one event; never fails and never outlives the timeout
    pub async fn publish_event(&self, event: &DomainEvent) -> PublishOutcome {
        match timeout(self.timeout, self.send(event)).await {
            Ok(Ok(())) => {
                debug!("Published {} to {}", event.name(), self.endpoint);
                PublishOutcome::Delivered
            }
            Ok(Err(e)) => {
                warn!("Could not publish {}: {}", event.name(), e);
                PublishOutcome::PeerUnavailable
            }
            Err(_) => {
                warn!(
                    "Could not publish {}: no answer from {} within {:?}",
                    event.name(),
                    self.endpoint,
                    self.timeout
                );
                PublishOutcome::PeerUnavailable
            }
        }
    }

    async fn send(&self, event: &DomainEvent) -> Result<()> {
        let frame = encode_frame(event)?;
        let addr = self.endpoint.socket_addr()?;

        let stream = TcpStream::connect(addr).await.map_err(|e| match e.kind() {
            ErrorKind::ConnectionRefused => {
                SinkError::IpcUnavailable(format!("nothing listening on {}", self.endpoint))
            }
            _ => SinkError::IpcUnavailable(format!("{}: {}", self.endpoint, e)),
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (conn, _reader) = Connection::from_tcp(id, stream);
        let sent = conn.send_data(frame.as_bytes()).await;
        conn.shutdown_writer().await;
        conn.close(false);
        sent
    }

    /// Forward locally produced events to the peer until `shutdown`
    ///
    /// Only events that originate in this process are forwarded: received
    /// mail, the SMTP bind and failed rule dispatches. Peer events such as
    /// `RulesUpdated` are not echoed back.
    pub fn spawn_forwarder(self, events: &EventBus, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut subscriber = events.subscribe();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = subscriber.recv() => event,
                };

                match event {
                    Some(event @ DomainEvent::NewMessage(_))
                    | Some(event @ DomainEvent::SmtpServerBind { .. })
                    | Some(event @ DomainEvent::RuleDispatchFailed { .. }) => {
                        self.publish_event(&event).await;
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        })
    }
}

impl Default for IpcClient {
    fn default() -> Self {
        Self::new(EndpointDefinition::loopback(37403), DEFAULT_PUBLISH_TIMEOUT)
    }
}
