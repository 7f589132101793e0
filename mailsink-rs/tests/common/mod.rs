#![allow(dead_code)]

use mailsink_rs::config::Config;
use mailsink_rs::events::EventBus;
use mailsink_rs::smtp::SmtpServer;
use mailsink_rs::storage::{FileMessageStore, MessageStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// An SMTP sink listening on an ephemeral loopback port
pub struct TestSink {
    pub addr: SocketAddr,
    pub events: EventBus,
    pub store: Arc<FileMessageStore>,
    pub shutdown: CancellationToken,
    handle: JoinHandle<mailsink_rs::Result<()>>,
    _dir: TempDir,
}

impl TestSink {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(customize: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.server.hostname = "sink.test".to_string();
        config.smtp.address = "127.0.0.1".to_string();
        config.smtp.port = 0;
        config.storage.message_path = dir.path().to_path_buf();
        customize(&mut config);

        let events = EventBus::new(64);
        let store = Arc::new(FileMessageStore::new(dir.path()));
        let server = SmtpServer::bind(&config, store.clone(), events.clone())
            .await
            .unwrap();
        let addr = server.local_addr();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.run(shutdown.clone()));

        Self {
            addr,
            events,
            store,
            shutdown,
            handle,
            _dir: dir,
        }
    }

    pub async fn stored(&self) -> Vec<Vec<u8>> {
        let mut messages = Vec::new();
        for entry in self.store.enumerate().await.unwrap() {
            messages.push(self.store.load(&entry.path).await.unwrap());
        }
        messages
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

/// Line-level SMTP client for driving the sink by hand
pub struct RawClient {
    stream: BufReader<TcpStream>,
}

impl RawClient {
    /// Connect and consume the greeting
    pub async fn connect(addr: SocketAddr) -> (Self, String) {
        let mut client = Self {
            stream: BufReader::new(TcpStream::connect(addr).await.unwrap()),
        };
        let greeting = client.reply().await;
        (client, greeting)
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.get_mut().write_all(bytes).await.unwrap();
        self.stream.get_mut().flush().await.unwrap();
    }

    pub async fn command(&mut self, line: &str) -> String {
        self.send_raw(format!("{}\r\n", line).as_bytes()).await;
        self.reply().await
    }

    /// Read one (possibly multi-line) reply; empty once the server hangs up
    pub async fn reply(&mut self) -> String {
        let mut full = String::new();
        loop {
            let mut line = String::new();
            if self.stream.read_line(&mut line).await.unwrap_or(0) == 0 {
                break;
            }
            full.push_str(&line);
            if line.len() < 4 || line.as_bytes()[3] != b'-' {
                break;
            }
        }
        full
    }
}
