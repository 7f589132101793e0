//! Line reassembly and the protocol contract layered on a [`Connection`]
//!
//! TCP delivers arbitrary fragments. [`LineBuffer`] turns them back into
//! newline-delimited logical lines (CRLF or bare LF), keeping any unterminated
//! remainder for the next read. [`LineProtocol`] feeds those lines, in arrival
//! order, to a concrete [`Protocol`] implementation.

use crate::error::Result;
use crate::net::connection::Connection;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

/// Size of a single socket read
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// What the connection should do after a line has been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// A line-oriented protocol
///
/// Implementations must not assume that a line arrives in a single read.
#[async_trait]
pub trait Protocol: Send {
    /// Called once per connection before any bytes are processed
    async fn begin(&mut self, conn: &Connection) -> Result<()>;

    /// Handle one complete logical line (terminator removed)
    async fn process_request(&mut self, conn: &Connection, line: &str) -> Result<Flow>;

    /// Entry point for every raw line
    ///
    /// Decodes with the connection's current encoding and hands the text to
    /// [`process_request`](Protocol::process_request). Protocols that need
    /// the undecoded bytes of some lines override this.
    async fn process_line(&mut self, conn: &Connection, raw: &[u8]) -> Result<Flow> {
        let line = conn.encoding().decode(raw);
        self.process_request(conn, &line).await
    }
}

/// Accumulates raw bytes and yields complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend(bytes.iter().copied().filter(|&b| b != b'\r'));
    }

    /// Remove and return the next complete line, without its `\n`
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let newline = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=newline).collect();
        line.pop();
        Some(line)
    }

    /// Bytes received but not yet terminated
    pub fn remainder(&self) -> &[u8] {
        &self.pending
    }
}

/// Drives a [`Protocol`] from raw socket bytes
pub struct LineProtocol<P> {
    buffer: LineBuffer,
    handler: P,
}

impl<P: Protocol> LineProtocol<P> {
    pub fn new(handler: P) -> Self {
        Self {
            buffer: LineBuffer::new(),
            handler,
        }
    }

    pub fn handler(&self) -> &P {
        &self.handler
    }

    pub fn into_handler(self) -> P {
        self.handler
    }

    pub async fn begin(&mut self, conn: &Connection) -> Result<()> {
        self.handler.begin(conn).await
    }

    /// Append a received chunk and hand every completed line to the handler
    ///
    /// Lines are decoded one at a time with the connection's current
    /// encoding, so an encoding switch made while handling one line applies
    /// to the very next line of the same chunk.
    pub async fn process_incoming_buffer(&mut self, conn: &Connection, bytes: &[u8]) -> Result<Flow> {
        self.buffer.extend(bytes);

        while let Some(raw) = self.buffer.next_line() {
            if self.handler.process_line(conn, &raw).await? == Flow::Close {
                return Ok(Flow::Close);
            }
        }

        Ok(Flow::Continue)
    }

    /// Receive loop: read until EOF, error, protocol completion or close
    ///
    /// Never propagates I/O errors; every exit path ends in `close(true)`.
    pub async fn run<R>(mut self, conn: Arc<Connection>, mut reader: R) -> P
    where
        R: AsyncRead + Unpin + Send,
    {
        if let Err(e) = self.begin(&conn).await {
            warn!("Connection {} failed to start: {}", conn.id(), e);
            conn.close(true);
            return self.handler;
        }

        let mut chunk = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let read = tokio::select! {
                _ = conn.cancellation().cancelled() => break,
                read = reader.read(&mut chunk) => read,
            };

            match read {
                Ok(0) => {
                    debug!("Connection {} closed by peer", conn.id());
                    break;
                }
                Ok(n) => {
                    conn.touch();
                    match self.process_incoming_buffer(&conn, &chunk[..n]).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Close) => break,
                        Err(e) => {
                            warn!("Connection {} aborted: {}", conn.id(), e);
                            break;
                        }
                    }
                }
                Err(e) => {
                    debug!("Read error on connection {}: {}", conn.id(), e);
                    break;
                }
            }
        }

        conn.close(true);
        conn.shutdown_writer().await;
        self.handler
    }
}
