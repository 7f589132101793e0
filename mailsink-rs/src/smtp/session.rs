//! Per-connection SMTP transaction state

/// Mutable state of one SMTP session
///
/// Mutated only by the command chain and the DATA capture in
/// [`SmtpCommandProtocol`](super::protocol::SmtpCommandProtocol).
#[derive(Debug, Default, Clone)]
pub struct SmtpSession {
    /// Domain announced by HELO/EHLO; survives [`reset`](Self::reset)
    pub helo: Option<String>,
    pub mail_from: Option<String>,
    /// Recipients in arrival order; duplicates are kept
    pub recipients: Vec<String>,
    pub message: Vec<u8>,
    pub use_utf8: bool,
}

impl SmtpSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the transaction (sender, recipients, message, UTF-8 flag)
    pub fn reset(&mut self) {
        self.mail_from = None;
        self.recipients.clear();
        self.message.clear();
        self.use_utf8 = false;
    }

    pub fn has_sender(&self) -> bool {
        self.mail_from.is_some()
    }

    pub fn has_recipients(&self) -> bool {
        !self.recipients.is_empty()
    }
}
