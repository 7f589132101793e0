use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Minimal SMTP client that speaks to the sink line by line
pub struct SmtpTestClient {
    stream: BufReader<TcpStream>,
    greeting: String,
}

impl SmtpTestClient {
    /// Connect to the sink and read its greeting
    pub async fn connect(addr: &str) -> Result<Self, String> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| format!("Failed to connect to SMTP: {}", e))?;

        let mut client = Self {
            stream: BufReader::new(stream),
            greeting: String::new(),
        };

        let greeting = client.read_response().await?;
        if !greeting.starts_with("220") {
            return Err(format!("Unexpected greeting: {}", greeting));
        }
        client.greeting = greeting;

        Ok(client)
    }

    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    pub async fn ehlo(&mut self, hostname: &str) -> Result<String, String> {
        self.command(&format!("EHLO {}", hostname)).await
    }

    pub async fn mail_from(&mut self, from: &str) -> Result<String, String> {
        self.command(&format!("MAIL FROM:<{}>", from)).await
    }

    pub async fn rcpt_to(&mut self, to: &str) -> Result<String, String> {
        self.command(&format!("RCPT TO:<{}>", to)).await
    }

    /// Send DATA, the dot-stuffed content and the terminating dot
    pub async fn data(&mut self, content: &str) -> Result<String, String> {
        let response = self.command("DATA").await?;
        if !response.starts_with("354") {
            return Err(format!("DATA command failed: {}", response));
        }

        for line in content.lines() {
            if line.starts_with('.') {
                self.send_line(&format!(".{}", line)).await?;
            } else {
                self.send_line(line).await?;
            }
        }
        self.command(".").await
    }

    pub async fn quit(mut self) -> Result<String, String> {
        self.command("QUIT").await
    }

    /// Send one command line and read the reply
    pub async fn command(&mut self, command: &str) -> Result<String, String> {
        self.send_line(command).await?;
        self.read_response().await
    }

    async fn send_line(&mut self, line: &str) -> Result<(), String> {
        let line = format!("{}\r\n", line);
        self.stream
            .get_mut()
            .write_all(line.as_bytes())
            .await
            .map_err(|e| format!("Failed to send command: {}", e))?;
        self.stream
            .get_mut()
            .flush()
            .await
            .map_err(|e| format!("Failed to flush: {}", e))?;
        Ok(())
    }

    /// Read a reply, following `250-` continuation lines
    async fn read_response(&mut self) -> Result<String, String> {
        let mut full_response = String::new();
        let mut line = String::new();

        loop {
            line.clear();
            self.stream
                .read_line(&mut line)
                .await
                .map_err(|e| format!("Failed to read response: {}", e))?;

            if line.is_empty() {
                break;
            }
            full_response.push_str(&line);

            if line.len() >= 4 && line.as_bytes()[3] == b' ' {
                break;
            }
        }

        Ok(full_response.trim().to_string())
    }

    /// Run a whole transaction for one message
    pub async fn send_email(
        &mut self,
        from: &str,
        to: &[&str],
        subject: &str,
        body: &str,
    ) -> Result<(), String> {
        self.ehlo("test-client").await?;

        let response = self.mail_from(from).await?;
        if !response.starts_with("250") {
            return Err(format!("MAIL rejected: {}", response));
        }
        for rcpt in to {
            let response = self.rcpt_to(rcpt).await?;
            if !response.starts_with("250") {
                return Err(format!("RCPT rejected: {}", response));
            }
        }

        let email_content = format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\n\r\n{}",
            from,
            to.join(", "),
            subject,
            body
        );

        let response = self.data(&email_content).await?;
        if !response.starts_with("250") {
            return Err(format!("Email rejected: {}", response));
        }

        Ok(())
    }
}
