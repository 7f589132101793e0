//! Byte-level transport for one accepted (or dialled) socket
//!
//! A [`Connection`] owns the write half of a stream together with the
//! bookkeeping the listener needs: identity, negotiated text encoding,
//! last-activity timestamp and a close notification that fires at most once.
//! The read half is driven by [`LineProtocol::run`](super::protocol::LineProtocol::run).

use crate::error::{Result, SinkError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Time allowed for flushing and shutting down the write half on close
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Text encoding used to decode incoming lines and encode captured data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    /// Byte-preserving single-byte decoding (the SMTP default)
    #[default]
    Latin1,
    /// UTF-8, negotiated through SMTPUTF8 / 8BITMIME
    Utf8,
}

impl TextEncoding {
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
        }
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct Connection {
    id: u64,
    peer: Option<SocketAddr>,
    writer: Mutex<BoxedWriter>,
    utf8: AtomicBool,
    created: Instant,
    last_activity_ms: AtomicU64,
    connected: AtomicBool,
    /// Aborts pending reads/writes once the connection is closed
    cancel: CancellationToken,
    /// Close notification for observers
    closed_event: CancellationToken,
}

impl Connection {
    pub fn new<W>(id: u64, peer: Option<SocketAddr>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            peer,
            writer: Mutex::new(Box::new(writer)),
            utf8: AtomicBool::new(false),
            created: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            connected: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            closed_event: CancellationToken::new(),
        }
    }

    /// Split a TCP stream into a connection and the read half that feeds it
    pub fn from_tcp(id: u64, stream: TcpStream) -> (Self, OwnedReadHalf) {
        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        (Self::new(id, peer, writer), reader)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn encoding(&self) -> TextEncoding {
        if self.utf8.load(Ordering::Acquire) {
            TextEncoding::Utf8
        } else {
            TextEncoding::Latin1
        }
    }

    pub fn set_encoding(&self, encoding: TextEncoding) {
        self.utf8
            .store(encoding == TextEncoding::Utf8, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Record I/O activity
    pub fn touch(&self) {
        let elapsed = self.created.elapsed().as_millis() as u64;
        self.last_activity_ms.store(elapsed, Ordering::Release);
    }

    pub fn last_activity(&self) -> Instant {
        self.created + Duration::from_millis(self.last_activity_ms.load(Ordering::Acquire))
    }

    /// Time since the last successful read or write
    pub fn idle_for(&self) -> Duration {
        self.last_activity().elapsed()
    }

    /// Token cancelled when the connection is closed for any reason
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Resolves once `close(true)` has been called
    pub async fn closed(&self) {
        self.closed_event.cancelled().await
    }

    pub fn close_notified(&self) -> bool {
        self.closed_event.is_cancelled()
    }

    /// Write bytes to the peer
    pub async fn send_data(&self, data: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(SinkError::Transport(format!(
                "connection {} is closed",
                self.id
            )));
        }

        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(data).await?;
            writer.flush().await
        };

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(SinkError::Transport(format!("connection {} closed during write", self.id)))
            }
            result = write => result.map_err(|e| SinkError::Transport(e.to_string())),
        };

        match outcome {
            Ok(()) => {
                self.touch();
                Ok(())
            }
            Err(e) => {
                drop(writer);
                warn!("Write failed on connection {}: {}", self.id, e);
                self.close(true);
                Err(e)
            }
        }
    }

    /// Encode text with the connection's encoding and send it
    pub async fn send_text(&self, text: &str) -> Result<()> {
        let bytes = self.encoding().encode(text);
        self.send_data(&bytes).await
    }

    /// Close the connection
    ///
    /// Idempotent. Pending reads and writes are cancelled immediately; the
    /// close notification fires only on the first call and only when
    /// `trigger_event` is set.
    pub fn close(&self, trigger_event: bool) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }

        debug!("Closing connection {}", self.id);
        self.cancel.cancel();
        if trigger_event {
            self.closed_event.cancel();
        }
    }

    /// Flush and shut down the write half, bounded by a short timeout
    pub(crate) async fn shutdown_writer(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(_) | Ok(Err(_)) = timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await {
            debug!("Connection {} shutdown did not complete cleanly", self.id);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .field("encoding", &self.encoding())
            .finish()
    }
}
