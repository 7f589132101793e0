//! Generic TCP listener shared by the SMTP and IPC servers
//!
//! One task per accepted connection, a separate accept loop, and an optional
//! idle reaper. Shutdown closes every live connection and waits for the
//! connection tasks to finish within a bounded grace period.

use crate::error::Result;
use crate::net::connection::Connection;
use crate::net::endpoint::EndpointDefinition;
use crate::net::protocol::{LineProtocol, Protocol};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Listener tuning
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Close connections with no activity for this long
    pub idle_timeout: Option<Duration>,
    /// How often the idle reaper runs
    pub reap_interval: Duration,
    /// Upper bound on waiting for connection tasks during shutdown
    pub shutdown_grace: Duration,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(300)),
            reap_interval: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Live connections, keyed by id
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<u64, Arc<Connection>>>,
}

impl ConnectionRegistry {
    fn insert(&self, conn: Arc<Connection>) {
        if let Ok(mut connections) = self.connections.lock() {
            connections.insert(conn.id(), conn);
        }
    }

    fn remove(&self, id: u64) {
        if let Ok(mut connections) = self.connections.lock() {
            connections.remove(&id);
        }
    }

    fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .lock()
            .map(|connections| connections.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn close_all(&self) {
        for conn in self.snapshot() {
            conn.close(true);
        }
    }

    /// Close connections idle for at least `idle_timeout`; returns how many
    fn reap_idle(&self, idle_timeout: Duration) -> usize {
        let mut reaped = 0;
        for conn in self.snapshot() {
            if conn.idle_for() >= idle_timeout {
                info!("Closing idle connection {} ({:?})", conn.id(), conn.peer());
                conn.close(true);
                reaped += 1;
            }
        }
        reaped
    }
}

pub struct TcpServer {
    name: &'static str,
    listener: TcpListener,
    local_addr: SocketAddr,
    options: ListenerOptions,
    registry: Arc<ConnectionRegistry>,
    next_id: AtomicU64,
}

impl TcpServer {
    pub async fn bind(
        name: &'static str,
        endpoint: &EndpointDefinition,
        options: ListenerOptions,
    ) -> Result<Self> {
        let listener = TcpListener::bind(endpoint.socket_addr()?).await?;
        let local_addr = listener.local_addr()?;
        info!("{} listening on {}", name, local_addr);

        Ok(Self {
            name,
            listener,
            local_addr,
            options,
            registry: Arc::new(ConnectionRegistry::default()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Accept connections until `shutdown` is cancelled
    ///
    /// `factory` builds a fresh protocol handler for every connection.
    pub async fn serve<P, F>(self, factory: F, shutdown: CancellationToken) -> Result<()>
    where
        P: Protocol + 'static,
        F: Fn() -> P + Send + Sync + 'static,
    {
        let tracker = TaskTracker::new();

        if let Some(idle_timeout) = self.options.idle_timeout {
            let registry = self.registry.clone();
            let token = shutdown.clone();
            let period = self.options.reap_interval;
            tracker.spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            registry.reap_idle(idle_timeout);
                        }
                    }
                }
            });
        }

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    debug!("{}: connection {} from {}", self.name, id, addr);

                    let (conn, reader) = Connection::from_tcp(id, stream);
                    let conn = Arc::new(conn);
                    self.registry.insert(conn.clone());

                    let protocol = LineProtocol::new(factory());
                    let registry = self.registry.clone();
                    tracker.spawn(async move {
                        protocol.run(conn, reader).await;
                        registry.remove(id);
                    });
                }
                Err(e) => {
                    error!("{}: failed to accept connection: {}", self.name, e);
                }
            }
        }

        info!("{} shutting down ({} open connection(s))", self.name, self.registry.len());
        drop(self.listener);
        self.registry.close_all();
        tracker.close();

        if timeout(self.options.shutdown_grace, tracker.wait()).await.is_err() {
            warn!(
                "{}: connections still open after {:?} grace period",
                self.name, self.options.shutdown_grace
            );
        }

        Ok(())
    }
}
