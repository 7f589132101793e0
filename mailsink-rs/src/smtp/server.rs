use crate::config::Config;
use crate::error::Result;
use crate::events::{DomainEvent, EventBus};
use crate::net::TcpServer;
use crate::smtp::commands::CommandChain;
use crate::smtp::protocol::{SmtpCommandProtocol, SmtpContext};
use crate::storage::MessageStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// SMTP listener: one [`SmtpCommandProtocol`] per accepted connection
pub struct SmtpServer {
    listener: TcpServer,
    context: SmtpContext,
}

impl SmtpServer {
    /// Bind the configured endpoint and announce it on the event bus
    pub async fn bind(
        config: &Config,
        store: Arc<dyn MessageStore>,
        events: EventBus,
    ) -> Result<Self> {
        let endpoint = config.smtp.endpoint();
        let listener =
            TcpServer::bind("SMTP server", &endpoint, config.smtp.listener_options()).await?;

        let local_addr = listener.local_addr();
        events.publish(DomainEvent::SmtpServerBind {
            address: endpoint.address().to_string(),
            port: local_addr.port(),
        });

        Ok(Self {
            listener,
            context: SmtpContext {
                hostname: config.server.hostname.clone(),
                max_message_size: config.smtp.max_message_size,
                chain: Arc::new(CommandChain::standard()),
                store,
                events,
            },
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            "Accepting mail for any recipient on {} (max message size {} bytes)",
            self.listener.local_addr(),
            self.context.max_message_size
        );

        let context = self.context;
        self.listener
            .serve(move || SmtpCommandProtocol::new(context.clone()), shutdown)
            .await
    }
}
