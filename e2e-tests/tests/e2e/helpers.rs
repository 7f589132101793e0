use mailsink_rs::config::Config;
use mailsink_rs::events::{DomainEvent, EventBus, EventSubscriber};
use mailsink_rs::ipc::{IpcClient, IpcServer, PublishOutcome};
use mailsink_rs::net::EndpointDefinition;
use mailsink_rs::rules::{Rule, RuleDispatcher, RuleSet};
use mailsink_rs::smtp::{SmtpRelayClient, SmtpServer};
use mailsink_rs::storage::{FileMessageStore, MessageStore};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// A complete sink wired the way the `mailsink` binary wires it, plus a
/// fake UI process listening for forwarded events
pub struct TestEnv {
    pub smtp_addr: String,
    pub service_port: u16,
    pub events: EventBus,
    pub store: Arc<FileMessageStore>,
    pub rules: Arc<RuleSet>,
    ui: IpcClient,
    ui_inbox: EventSubscriber,
    shutdown: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    dir: TempDir,
}

fn spawn_logged<F>(name: &'static str, task: F) -> (&'static str, JoinHandle<()>)
where
    F: std::future::Future<Output = mailsink_rs::Result<()>> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        if let Err(e) = task.await {
            tracing::error!("{} failed: {}", name, e);
        }
    });
    (name, handle)
}

impl TestEnv {
    /// Start a sink with no rules
    pub async fn start() -> Result<Self, String> {
        Self::start_with_rules(Vec::new()).await
    }

    pub async fn start_with_rules(rules: Vec<Rule>) -> Result<Self, String> {
        init_tracing();

        let dir = tempfile::tempdir().map_err(|e| format!("Failed to create temp dir: {}", e))?;
        let mut config = Config::default();
        config.server.hostname = "e2e.test".to_string();
        config.smtp.address = "127.0.0.1".to_string();
        config.smtp.port = 0;
        config.storage.message_path = dir.path().to_path_buf();

        let events = EventBus::new(config.events.bus_capacity);
        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();

        // Fake UI: its own IPC listener and bus
        let ui_events = EventBus::new(64);
        let ui_inbox = ui_events.subscribe();
        let ui_server = IpcServer::bind(&EndpointDefinition::loopback(0), ui_events)
            .await
            .map_err(|e| format!("UI listener failed: {}", e))?;
        let ui_endpoint = EndpointDefinition::loopback(ui_server.local_addr().port());
        tasks.push(spawn_logged("UI listener", ui_server.run(shutdown.clone())));

        let ui = IpcClient::new(ui_endpoint.clone(), config.ipc.publish_timeout());
        ui.publish_event(&DomainEvent::AppPreStart).await;

        let forwarder = IpcClient::new(ui_endpoint, config.ipc.publish_timeout())
            .spawn_forwarder(&events, shutdown.clone());
        tasks.push(("IPC forwarder", forwarder));

        let store = Arc::new(FileMessageStore::new(dir.path()));
        let rule_set = Arc::new(RuleSet::new(rules));
        let dispatcher = Arc::new(RuleDispatcher::new(
            rule_set.clone(),
            store.clone(),
            Arc::new(SmtpRelayClient::new().with_helo_name("e2e.test")),
        ));
        tasks.push((
            "Rule dispatcher",
            dispatcher.spawn(
                &events,
                Duration::from_secs(config.rules.retention_sweep_interval_secs),
                shutdown.clone(),
            ),
        ));

        let service = IpcServer::bind(&EndpointDefinition::loopback(0), events.clone())
            .await
            .map_err(|e| format!("IPC listener failed: {}", e))?;
        let service_port = service.local_addr().port();
        tasks.push(spawn_logged("IPC server", service.run(shutdown.clone())));

        let smtp = SmtpServer::bind(&config, store.clone(), events.clone())
            .await
            .map_err(|e| format!("SMTP bind failed: {}", e))?;
        let smtp_addr = smtp.local_addr().to_string();
        tasks.push(spawn_logged("SMTP server", smtp.run(shutdown.clone())));

        ui.publish_event(&DomainEvent::AppReady).await;

        Ok(Self {
            smtp_addr,
            service_port,
            events,
            store,
            rules: rule_set,
            ui,
            ui_inbox,
            shutdown,
            tasks,
            dir,
        })
    }

    pub fn message_path(&self) -> &Path {
        self.dir.path()
    }

    pub fn smtp_port(&self) -> u16 {
        self.smtp_addr
            .rsplit(':')
            .next()
            .and_then(|port| port.parse().ok())
            .unwrap_or_default()
    }

    pub async fn get_email_count(&self) -> Result<usize, String> {
        self.store
            .enumerate()
            .await
            .map(|entries| entries.len())
            .map_err(|e| format!("Failed to count emails: {}", e))
    }

    /// Poll the store until it holds at least `expected` messages
    pub async fn wait_for_email_count(
        &self,
        expected: usize,
        timeout_secs: u64,
    ) -> Result<usize, String> {
        let start = Instant::now();
        loop {
            let count = self.get_email_count().await?;
            if count >= expected {
                return Ok(count);
            }
            if start.elapsed().as_secs() >= timeout_secs {
                return Err(format!(
                    "Timeout waiting for {} email(s), found {}",
                    expected, count
                ));
            }
            sleep(Duration::from_millis(50)).await;
        }
    }

    /// Raw contents of every stored message, oldest first
    pub async fn stored_messages(&self) -> Result<Vec<Vec<u8>>, String> {
        let entries = self
            .store
            .enumerate()
            .await
            .map_err(|e| format!("Failed to list emails: {}", e))?;
        let mut messages = Vec::with_capacity(entries.len());
        for entry in entries {
            let data = self
                .store
                .load(&entry.path)
                .await
                .map_err(|e| format!("Failed to read {}: {}", entry.path.display(), e))?;
            messages.push(data);
        }
        Ok(messages)
    }

    /// Push a rule update through the sink's IPC listener, as the UI does
    pub async fn publish_rules(&self, rules: Vec<Rule>) -> Result<(), String> {
        let client = IpcClient::new(
            EndpointDefinition::loopback(self.service_port),
            Duration::from_secs(2),
        );
        match client.publish_event(&DomainEvent::RulesUpdated { rules }).await {
            PublishOutcome::Delivered => Ok(()),
            PublishOutcome::PeerUnavailable => Err("IPC listener unavailable".to_string()),
        }
    }

    /// Events the fake UI received, up to and including the first match
    pub async fn wait_for_ui_event(
        &mut self,
        matches: impl Fn(&DomainEvent) -> bool,
        timeout_secs: u64,
    ) -> Result<Vec<DomainEvent>, String> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
        let mut seen = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, self.ui_inbox.recv()).await {
                Ok(Some(event)) => {
                    let done = matches(&event);
                    seen.push(event);
                    if done {
                        return Ok(seen);
                    }
                }
                Ok(None) => return Err("UI event bus closed".to_string()),
                Err(_) => {
                    let names: Vec<_> = seen.iter().map(DomainEvent::name).collect();
                    return Err(format!("Timeout waiting for UI event, saw {:?}", names));
                }
            }
        }
    }

    /// Cancel every task and wait for them, then announce the exit
    pub async fn stop(self) {
        self.shutdown.cancel();
        for (name, handle) in self.tasks {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => panic!("{} panicked: {}", name, e),
                Err(_) => panic!("{} did not stop", name),
            }
        }
        self.ui.publish_event(&DomainEvent::AppExit).await;
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailsink_rs=warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Test result helper
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub duration: Duration,
}

impl TestResult {
    pub fn success(name: String, duration: Duration) -> Self {
        Self {
            name,
            passed: true,
            message: "✅ Test passed".to_string(),
            duration,
        }
    }

    pub fn failure(name: String, message: String, duration: Duration) -> Self {
        Self {
            name,
            passed: false,
            message: format!("❌ Test failed: {}", message),
            duration,
        }
    }

    pub fn print(&self) {
        println!("\n{}", "=".repeat(80));
        println!("📝 Test: {}", self.name);
        println!("⏱️  Duration: {:?}", self.duration);
        println!("{}", self.message);
        println!("{}", "=".repeat(80));
    }
}

/// Unique marker for subjects and bodies
pub fn generate_test_id() -> String {
    format!("test_{}", uuid::Uuid::new_v4().simple())
}
