//! Outbound SMTP client used by relay and forward rules
//!
//! Speaks just enough RFC 5321 to hand one message to a relay: EHLO, an
//! optional `AUTH PLAIN`, MAIL/RCPT/DATA with dot-stuffing, then QUIT.

use crate::error::{Result, SinkError};
use crate::rules::RelayEndpoint;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Envelope of a relayed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub mail_from: String,
    pub recipients: Vec<String>,
}

/// Hands a message to an outbound relay
#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn relay(&self, endpoint: &RelayEndpoint, envelope: &Envelope, data: &[u8])
        -> Result<()>;
}

/// SMTP client for relaying to external servers
///
/// # Examples
/// ```no_run
/// use mailsink_rs::rules::RelayEndpoint;
/// use mailsink_rs::smtp::{Envelope, RelayTransport, SmtpRelayClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = SmtpRelayClient::new();
/// let envelope = Envelope {
///     mail_from: "sender@example.com".to_string(),
///     recipients: vec!["recipient@other.com".to_string()],
/// };
/// client
///     .relay(&RelayEndpoint::new("mail.example.com", 25), &envelope, b"Subject: Test\r\n\r\nHello!")
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SmtpRelayClient {
    helo_name: String,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl Default for SmtpRelayClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtpRelayClient {
    pub fn new() -> Self {
        Self {
            helo_name: gethostname::gethostname().to_string_lossy().to_string(),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_helo_name(mut self, helo_name: impl Into<String>) -> Self {
        self.helo_name = helo_name.into();
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, command: Duration) -> Self {
        self.connect_timeout = connect;
        self.command_timeout = command;
        self
    }

    async fn transact<R, W>(
        &self,
        reader: &mut BufReader<R>,
        writer: &mut W,
        endpoint: &RelayEndpoint,
        envelope: &Envelope,
        data: &[u8],
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.read_response(reader, 220).await?;

        self.write_line(writer, &format!("EHLO {}", self.helo_name)).await?;
        self.read_response(reader, 250).await?;

        if let Some((username, password)) = endpoint.credentials() {
            let token = STANDARD.encode(format!("\0{}\0{}", username, password));
            debug!("> AUTH PLAIN ****");
            writer
                .write_all(format!("AUTH PLAIN {}\r\n", token).as_bytes())
                .await?;
            self.read_response(reader, 235).await?;
        }

        self.write_line(writer, &format!("MAIL FROM:<{}>", envelope.mail_from))
            .await?;
        self.read_response(reader, 250).await?;

        for recipient in &envelope.recipients {
            self.write_line(writer, &format!("RCPT TO:<{}>", recipient))
                .await?;
            self.read_response(reader, 250).await?;
        }

        self.write_line(writer, "DATA").await?;
        self.read_response(reader, 354).await?;

        writer.write_all(&dot_stuff(data)).await?;
        writer.write_all(b".\r\n").await?;
        self.read_response(reader, 250).await?;

        self.write_line(writer, "QUIT").await?;
        // The relay may hang up before answering QUIT; the message is already accepted
        let _ = self.read_response(reader, 221).await;

        Ok(())
    }

    /// Read a (possibly multi-line) response and check its code
    async fn read_response<R>(&self, reader: &mut BufReader<R>, expected: u16) -> Result<String>
    where
        R: AsyncRead + Unpin,
    {
        let mut full_response = String::new();

        loop {
            let mut line = String::new();
            let n = timeout(self.command_timeout, reader.read_line(&mut line))
                .await
                .map_err(|_| SinkError::Transport("timed out waiting for relay".to_string()))??;
            if n == 0 {
                return Err(SinkError::Transport(
                    "relay closed the connection".to_string(),
                ));
            }
            debug!("< {}", line.trim_end());
            full_response.push_str(&line);

            // Last line has a space (or nothing) after the code
            if line.len() < 4 || line.as_bytes()[3] != b'-' {
                break;
            }
        }

        let code = full_response
            .get(..3)
            .and_then(|code| code.parse::<u16>().ok());
        if code != Some(expected) {
            error!("Unexpected relay response: {}", full_response.trim_end());
            return Err(SinkError::ProtocolViolation(format!(
                "expected {}, got: {}",
                expected,
                full_response.trim_end()
            )));
        }

        Ok(full_response)
    }

    async fn write_line<W>(&self, writer: &mut W, line: &str) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        debug!("> {}", line);
        writer.write_all(format!("{}\r\n", line).as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl RelayTransport for SmtpRelayClient {
    async fn relay(
        &self,
        endpoint: &RelayEndpoint,
        envelope: &Envelope,
        data: &[u8],
    ) -> Result<()> {
        info!(
            "Relaying mail from <{}> to {} recipient(s) via {}",
            envelope.mail_from,
            envelope.recipients.len(),
            endpoint
        );

        let address = format!("{}:{}", endpoint.host, endpoint.port);
        let stream = timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| SinkError::Transport(format!("connect to {} timed out", address)))?
            .map_err(|e| SinkError::Transport(format!("connect to {} failed: {}", address, e)))?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        self.transact(&mut reader, &mut writer, endpoint, envelope, data)
            .await?;

        info!("Relayed message via {}", endpoint);
        Ok(())
    }
}

/// Normalise line endings to CRLF and escape leading dots (RFC 5321 section 4.5.2)
///
/// The result always ends with CRLF, ready for the terminating `.` line.
pub fn dot_stuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 16);
    if data.is_empty() {
        return out;
    }

    let body = data.strip_suffix(b"\n").unwrap_or(data);
    for line in body.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.first() == Some(&b'.') {
            out.push(b'.');
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_dot_stuffing() {
        assert_eq!(dot_stuff(b"a\r\n.b\r\n..c\r\n"), b"a\r\n..b\r\n...c\r\n");
        assert_eq!(dot_stuff(b"bare\nlf"), b"bare\r\nlf\r\n");
        assert_eq!(dot_stuff(b"."), b"..\r\n");
        assert_eq!(dot_stuff(b"one\r\n\r\n"), b"one\r\n\r\n");
        assert!(dot_stuff(b"").is_empty());
    }

    /// Minimal relay that records everything it receives
    async fn fake_relay(auth_code: u16) -> (std::net::SocketAddr, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut reader = BufReader::new(read);
            let mut transcript = String::new();

            write.write_all(b"220 relay ready\r\n").await.unwrap();
            let mut in_data = false;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                transcript.push_str(&line);
                let upper = line.to_ascii_uppercase();

                let reply: &[u8] = if in_data {
                    if line == ".\r\n" {
                        in_data = false;
                        b"250 queued\r\n"
                    } else {
                        continue;
                    }
                } else if upper.starts_with("EHLO") {
                    b"250-relay\r\n250 AUTH PLAIN\r\n"
                } else if upper.starts_with("AUTH") {
                    if auth_code == 235 {
                        b"235 ok\r\n"
                    } else {
                        b"535 bad credentials\r\n"
                    }
                } else if upper.starts_with("DATA") {
                    in_data = true;
                    b"354 go\r\n"
                } else if upper.starts_with("QUIT") {
                    write.write_all(b"221 bye\r\n").await.unwrap();
                    break;
                } else {
                    b"250 ok\r\n"
                };
                write.write_all(reply).await.unwrap();
            }

            let mut rest = String::new();
            let _ = reader.read_to_string(&mut rest).await;
            transcript
        });

        (addr, handle)
    }

    fn envelope() -> Envelope {
        Envelope {
            mail_from: "a@b.com".to_string(),
            recipients: vec!["c@d.com".to_string(), "e@f.com".to_string()],
        }
    }

    #[tokio::test]
    async fn test_relay_with_auth_plain() {
        let (addr, handle) = fake_relay(235).await;
        let endpoint = RelayEndpoint {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
            username: Some("user".to_string()),
            password: Some("secret".to_string()),
        };

        SmtpRelayClient::new()
            .with_helo_name("sink.test")
            .relay(&endpoint, &envelope(), b"Subject: hi\r\n\r\n.dot line\r\n")
            .await
            .unwrap();

        let transcript = handle.await.unwrap();
        let token = STANDARD.encode("\0user\0secret");
        assert!(transcript.contains("EHLO sink.test\r\n"));
        assert!(transcript.contains(&format!("AUTH PLAIN {}\r\n", token)));
        assert!(transcript.contains("RCPT TO:<c@d.com>\r\nRCPT TO:<e@f.com>\r\n"));
        assert!(transcript.contains("\r\n..dot line\r\n.\r\n"));
        assert!(transcript.ends_with("QUIT\r\n"));
    }

    #[tokio::test]
    async fn test_rejected_auth_fails_relay() {
        let (addr, _handle) = fake_relay(535).await;
        let endpoint = RelayEndpoint {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
            username: Some("user".to_string()),
            password: Some("wrong".to_string()),
        };

        let err = SmtpRelayClient::new()
            .relay(&endpoint, &envelope(), b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = SmtpRelayClient::new()
            .relay(&RelayEndpoint::new("127.0.0.1", port), &envelope(), b"x")
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
