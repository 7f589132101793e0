use crate::error::{Result, SinkError};
use crate::net::{EndpointDefinition, ListenerOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub smtp: SmtpConfig,
    pub ipc: IpcConfig,
    pub storage: StorageConfig,
    pub rules: RulesConfig,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub hostname: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// "any" or empty binds every interface
    pub address: String,
    pub port: u16,
    pub max_message_size: usize,
    pub idle_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IpcConfig {
    pub enabled: bool,
    /// Where this process listens for events from a UI
    pub service_address: String,
    pub service_port: u16,
    /// Where this process publishes its own events
    pub ui_address: String,
    pub ui_port: u16,
    pub publish_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub message_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RulesConfig {
    pub rules_path: Option<PathBuf>,
    pub retention_sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub bus_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: gethostname::gethostname()
                .into_string()
                .unwrap_or_else(|_| "localhost".to_string()),
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            address: "any".to_string(),
            port: 25,
            max_message_size: 10 * 1024 * 1024, // 10MB
            idle_timeout_secs: 300,
            shutdown_grace_secs: 5,
        }
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_address: "127.0.0.1".to_string(),
            service_port: 37402,
            ui_address: "127.0.0.1".to_string(),
            ui_port: 37403,
            publish_timeout_ms: 500,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            message_path: PathBuf::from("./incoming"),
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            retention_sweep_interval_secs: 3600,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            bus_capacity: crate::events::DEFAULT_BUS_CAPACITY,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| SinkError::Config(e.to_string()))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| SinkError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.smtp.max_message_size == 0 {
            return Err(SinkError::Config(
                "smtp.max_message_size must be greater than zero".to_string(),
            ));
        }
        if self.events.bus_capacity == 0 {
            return Err(SinkError::Config(
                "events.bus_capacity must be greater than zero".to_string(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(SinkError::Config(format!(
                "unknown logging.format '{}'",
                self.logging.format
            )));
        }
        self.smtp.endpoint().socket_addr()?;
        Ok(())
    }
}

impl SmtpConfig {
    pub fn endpoint(&self) -> EndpointDefinition {
        EndpointDefinition::new(self.address.clone(), self.port)
    }

    pub fn listener_options(&self) -> ListenerOptions {
        ListenerOptions {
            idle_timeout: (self.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.idle_timeout_secs)),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            ..ListenerOptions::default()
        }
    }
}

impl IpcConfig {
    pub fn service_endpoint(&self) -> EndpointDefinition {
        EndpointDefinition::new(self.service_address.clone(), self.service_port)
    }

    pub fn ui_endpoint(&self) -> EndpointDefinition {
        EndpointDefinition::new(self.ui_address.clone(), self.ui_port)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}
