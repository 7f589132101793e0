use anyhow::Context;
use clap::Parser;
use mailsink_rs::config::Config;
use mailsink_rs::events::{DomainEvent, EventBus};
use mailsink_rs::ipc::{IpcClient, IpcServer};
use mailsink_rs::rules::{load_rules, RuleDispatcher, RuleSet};
use mailsink_rs::smtp::{SmtpRelayClient, SmtpServer};
use mailsink_rs::storage::FileMessageStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_CONFIG_FILE: &str = "mailsink.toml";

#[derive(Parser)]
#[command(name = "mailsink")]
#[command(about = "SMTP sink for testing: receives mail, stores it, relays it by rule", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./mailsink.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SMTP listen address ("any" for all interfaces)
    #[arg(short, long)]
    address: Option<String>,

    /// SMTP listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory where received messages are stored
    #[arg(long)]
    message_path: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None if std::path::Path::new(DEFAULT_CONFIG_FILE).exists() => {
            Config::from_file(DEFAULT_CONFIG_FILE)?
        }
        None => Config::default(),
    };

    if let Some(address) = &cli.address {
        config.smtp.address = address.clone();
    }
    if let Some(port) = cli.port {
        config.smtp.port = port;
    }
    if let Some(path) = &cli.message_path {
        config.storage.message_path = path.clone();
    }
    config.validate()?;
    Ok(config)
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("mailsink_rs={}", config.logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for a background task, but no longer than `grace`
async fn join_within<T>(name: &str, handle: JoinHandle<T>, grace: Duration) {
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => error!("{} task failed: {}", name, e),
        Err(_) => warn!("{} did not stop within {:?}", name, grace),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config);

    info!("Starting mailsink v{}", env!("CARGO_PKG_VERSION"));
    info!("  SMTP listening on: {}", config.smtp.endpoint());
    info!("  Message path: {}", config.storage.message_path.display());
    info!("  Hostname: {}", config.server.hostname);

    let events = EventBus::new(config.events.bus_capacity);
    let shutdown = CancellationToken::new();
    let grace = Duration::from_secs(config.smtp.shutdown_grace_secs);

    let ui = config
        .ipc
        .enabled
        .then(|| IpcClient::new(config.ipc.ui_endpoint(), config.ipc.publish_timeout()));
    if let Some(ui) = &ui {
        ui.publish_event(&DomainEvent::AppPreStart).await;
    }

    let forwarder = config.ipc.enabled.then(|| {
        IpcClient::new(config.ipc.ui_endpoint(), config.ipc.publish_timeout())
            .spawn_forwarder(&events, shutdown.clone())
    });

    // Rules
    let rules = match &config.rules.rules_path {
        Some(path) if path.exists() => {
            let rules = load_rules(path)?;
            info!("Loaded {} rule(s) from {}", rules.len(), path.display());
            rules
        }
        Some(path) => {
            warn!("Rules file {} not found, starting with no rules", path.display());
            Vec::new()
        }
        None => Vec::new(),
    };

    let store = Arc::new(FileMessageStore::new(config.storage.message_path.clone()));
    let dispatcher = Arc::new(RuleDispatcher::new(
        Arc::new(RuleSet::new(rules)),
        store.clone(),
        Arc::new(SmtpRelayClient::new().with_helo_name(config.server.hostname.clone())),
    ));
    let dispatcher_handle = dispatcher.spawn(
        &events,
        Duration::from_secs(config.rules.retention_sweep_interval_secs),
        shutdown.clone(),
    );

    // IPC listener for events coming from the UI
    let ipc_handle = if config.ipc.enabled {
        match IpcServer::bind(&config.ipc.service_endpoint(), events.clone()).await {
            Ok(server) => Some(tokio::spawn(server.run(shutdown.clone()))),
            Err(e) => {
                warn!("IPC listener unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let smtp = SmtpServer::bind(&config, store, events.clone())
        .await
        .context("starting SMTP server")?;
    let mut smtp_handle = tokio::spawn(smtp.run(shutdown.clone()));

    if let Some(ui) = &ui {
        ui.publish_event(&DomainEvent::AppReady).await;
    }
    info!("mailsink ready");

    let mut smtp_finished = false;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
        }
        result = &mut smtp_handle => {
            smtp_finished = true;
            match result {
                Ok(Ok(())) => warn!("SMTP server stopped"),
                Ok(Err(e)) => error!("SMTP server error: {}", e),
                Err(e) => error!("SMTP server task failed: {}", e),
            }
        }
    }

    shutdown.cancel();
    if !smtp_finished {
        join_within("SMTP server", smtp_handle, grace).await;
    }
    if let Some(handle) = ipc_handle {
        join_within("IPC server", handle, grace).await;
    }
    join_within("Rule dispatcher", dispatcher_handle, grace).await;
    if let Some(handle) = forwarder {
        join_within("IPC forwarder", handle, grace).await;
    }

    if let Some(ui) = &ui {
        ui.publish_event(&DomainEvent::AppExit).await;
    }
    info!("mailsink stopped");
    Ok(())
}
