//! SMTP command protocol layered on the line engine

use crate::error::Result;
use crate::events::{DomainEvent, EventBus};
use crate::message::ReceivedMessage;
use crate::net::{Connection, Flow, Protocol, TextEncoding};
use crate::smtp::commands::{CommandChain, CommandContext, Next};
use crate::smtp::reply::SmtpReply;
use crate::smtp::session::SmtpSession;
use crate::storage::MessageStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Maximum command line length (RFC 5321 section 4.5.3.1.4)
pub const MAX_COMMAND_LINE: usize = 512;

/// Settings shared by every SMTP connection
#[derive(Clone)]
pub struct SmtpContext {
    pub hostname: String,
    pub max_message_size: usize,
    pub chain: Arc<CommandChain>,
    pub store: Arc<dyn MessageStore>,
    pub events: EventBus,
}

/// DATA capture in progress
#[derive(Debug, Default)]
struct DataCapture {
    overflowed: bool,
}

pub struct SmtpCommandProtocol {
    context: SmtpContext,
    session: SmtpSession,
    capture: Option<DataCapture>,
}

impl SmtpCommandProtocol {
    pub fn new(context: SmtpContext) -> Self {
        Self {
            context,
            session: SmtpSession::new(),
            capture: None,
        }
    }

    pub fn session(&self) -> &SmtpSession {
        &self.session
    }

    async fn reply(&self, conn: &Connection, reply: &SmtpReply) -> Result<()> {
        conn.send_text(&reply.format()).await
    }

    async fn handle_command(&mut self, conn: &Connection, line: &str) -> Result<Flow> {
        if line.trim().is_empty() {
            return Ok(Flow::Continue);
        }

        debug!("Received: {}", line);
        let dispatched = {
            let mut ctx = CommandContext {
                session: &mut self.session,
                hostname: &self.context.hostname,
                max_message_size: self.context.max_message_size,
            };
            self.context.chain.dispatch(line, &mut ctx)
        };

        conn.set_encoding(if self.session.use_utf8 {
            TextEncoding::Utf8
        } else {
            TextEncoding::Latin1
        });
        self.reply(conn, &dispatched.outcome.reply).await?;

        match dispatched.outcome.next {
            Next::Continue => Ok(Flow::Continue),
            Next::CaptureData => {
                self.capture = Some(DataCapture::default());
                Ok(Flow::Continue)
            }
            Next::Quit => Ok(Flow::Close),
        }
    }

    /// Capture one DATA line as raw bytes, whatever the negotiated encoding
    async fn capture_line(&mut self, conn: &Connection, line: &[u8]) -> Result<Flow> {
        if line == b"." {
            let overflowed = self.capture.take().map(|c| c.overflowed).unwrap_or(false);
            let reply = if overflowed {
                warn!(
                    "Message rejected: larger than {} bytes",
                    self.context.max_message_size
                );
                SmtpReply::new(
                    552,
                    format!(
                        "Message size exceeds limit of {} bytes",
                        self.context.max_message_size
                    ),
                )
            } else {
                self.complete_message().await
            };

            self.session.reset();
            conn.set_encoding(TextEncoding::Latin1);
            self.reply(conn, &reply).await?;
            return Ok(Flow::Continue);
        }

        // Dot-unstuffing (RFC 5321 section 4.5.2)
        let bytes = if line.starts_with(b"..") { &line[1..] } else { line };

        let Some(capture) = self.capture.as_mut() else {
            return Ok(Flow::Continue);
        };
        if capture.overflowed {
            return Ok(Flow::Continue);
        }
        if self.session.message.len() + bytes.len() + 2 > self.context.max_message_size {
            capture.overflowed = true;
            self.session.message.clear();
            return Ok(Flow::Continue);
        }

        self.session.message.extend_from_slice(bytes);
        self.session.message.extend_from_slice(b"\r\n");
        Ok(Flow::Continue)
    }

    /// Persist the captured message and announce it
    async fn complete_message(&mut self) -> SmtpReply {
        let mail_from = self.session.mail_from.clone().unwrap_or_default();
        let recipients = self.session.recipients.clone();

        match self.context.store.save(&self.session.message).await {
            Ok(entry) => {
                info!(
                    "Accepted message from <{}> for {} recipient(s): {}",
                    mail_from,
                    recipients.len(),
                    entry.name
                );
                self.context
                    .events
                    .publish(DomainEvent::NewMessage(ReceivedMessage {
                        path: entry.path,
                        mail_from,
                        recipients,
                        size: entry.size,
                    }));
                SmtpReply::new(250, format!("OK: message queued as {}", entry.name))
            }
            Err(e) => {
                error!("Failed to store message: {}", e);
                SmtpReply::new(451, "Requested action aborted: local error in processing")
            }
        }
    }
}

#[async_trait]
impl Protocol for SmtpCommandProtocol {
    async fn begin(&mut self, conn: &Connection) -> Result<()> {
        info!("SMTP session {} started ({:?})", conn.id(), conn.peer());
        self.reply(conn, &SmtpReply::greeting(&self.context.hostname))
            .await
    }

    async fn process_request(&mut self, conn: &Connection, line: &str) -> Result<Flow> {
        self.handle_command(conn, line).await
    }

    async fn process_line(&mut self, conn: &Connection, raw: &[u8]) -> Result<Flow> {
        if self.capture.is_some() {
            return self.capture_line(conn, raw).await;
        }

        if raw.len() > MAX_COMMAND_LINE {
            warn!("Command line too long: {} bytes", raw.len());
            self.reply(conn, &SmtpReply::new(500, "Line too long")).await?;
            return Ok(Flow::Continue);
        }

        let line = conn.encoding().decode(raw);
        self.handle_command(conn, &line).await
    }
}
