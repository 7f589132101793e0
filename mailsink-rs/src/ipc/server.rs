use crate::error::Result;
use crate::events::EventBus;
use crate::ipc::protocol::IpcEventProtocol;
use crate::net::{EndpointDefinition, ListenerOptions, TcpServer};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

/// Loopback listener feeding peer events into the local bus
pub struct IpcServer {
    listener: TcpServer,
    events: EventBus,
}

impl IpcServer {
    pub async fn bind(endpoint: &EndpointDefinition, events: EventBus) -> Result<Self> {
        let options = ListenerOptions {
            idle_timeout: None,
            ..ListenerOptions::default()
        };
        let listener = TcpServer::bind("IPC server", endpoint, options).await?;
        Ok(Self { listener, events })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let events = self.events;
        self.listener
            .serve(move || IpcEventProtocol::new(events.clone()), shutdown)
            .await
    }
}
