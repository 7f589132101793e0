//! Rule types and data structures

use crate::error::{Result, SinkError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

/// Allowed range for [`MailRetentionRule::retention_days`]
pub const RETENTION_DAYS_RANGE: std::ops::RangeInclusive<u32> = 1..=3650;

fn default_enabled() -> bool {
    true
}

fn default_smtp_port() -> u16 {
    25
}

/// Outbound SMTP server used by relay-type rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEndpoint {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl RelayEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    /// Username and password, when both are configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) if !user.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

impl fmt::Display for RelayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Retry-with-delay settings for a rule's action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub retry_count: u32,
    pub retry_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay_secs: 30,
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn once() -> Self {
        Self {
            retry_count: 0,
            retry_delay_secs: 0,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Relay every message to its envelope recipients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRule {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub relay: RelayEndpoint,
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Relay messages whose headers or body match a pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalRelayRule {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Matched against each header's raw `Name: value` text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_regex: Option<String>,
    /// Matched against the decoded text body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_regex: Option<String>,
    pub relay: RelayEndpoint,
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Forward every message to one fixed address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardRule {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub to_email: String,
    /// Envelope sender override; the original sender when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_email: Option<String>,
    pub relay: RelayEndpoint,
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Run an external program for every message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeProcessRule {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub process_path: PathBuf,
    /// Arguments; `%e` is replaced by the stored message path
    #[serde(default)]
    pub command_line: String,
}

/// Periodically delete messages older than `retention_days`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailRetentionRule {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub retention_days: u32,
}

impl MailRetentionRule {
    pub fn new(retention_days: u32) -> Result<Self> {
        let rule = Self {
            id: Uuid::new_v4(),
            enabled: true,
            retention_days,
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn validate(&self) -> Result<()> {
        if !RETENTION_DAYS_RANGE.contains(&self.retention_days) {
            return Err(SinkError::Config(format!(
                "retention_days must be between {} and {}, got {}",
                RETENTION_DAYS_RANGE.start(),
                RETENTION_DAYS_RANGE.end(),
                self.retention_days
            )));
        }
        Ok(())
    }

    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

/// A configured rule, tagged by `type` in JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Rule {
    Relay(RelayRule),
    ConditionalRelay(ConditionalRelayRule),
    Forward(ForwardRule),
    InvokeProcess(InvokeProcessRule),
    MailRetention(MailRetentionRule),
}

/// Discriminator of a [`Rule`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleKind {
    Relay,
    ConditionalRelay,
    Forward,
    InvokeProcess,
    MailRetention,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleKind::Relay => "Relay",
            RuleKind::ConditionalRelay => "ConditionalRelay",
            RuleKind::Forward => "Forward",
            RuleKind::InvokeProcess => "InvokeProcess",
            RuleKind::MailRetention => "MailRetention",
        };
        f.write_str(name)
    }
}

impl Rule {
    pub fn id(&self) -> Uuid {
        match self {
            Rule::Relay(r) => r.id,
            Rule::ConditionalRelay(r) => r.id,
            Rule::Forward(r) => r.id,
            Rule::InvokeProcess(r) => r.id,
            Rule::MailRetention(r) => r.id,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            Rule::Relay(r) => r.enabled,
            Rule::ConditionalRelay(r) => r.enabled,
            Rule::Forward(r) => r.enabled,
            Rule::InvokeProcess(r) => r.enabled,
            Rule::MailRetention(r) => r.enabled,
        }
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            Rule::Relay(_) => RuleKind::Relay,
            Rule::ConditionalRelay(_) => RuleKind::ConditionalRelay,
            Rule::Forward(_) => RuleKind::Forward,
            Rule::InvokeProcess(_) => RuleKind::InvokeProcess,
            Rule::MailRetention(_) => RuleKind::MailRetention,
        }
    }

    /// Evaluated on a timer rather than per message
    pub fn is_periodic(&self) -> bool {
        matches!(self, Rule::MailRetention(_))
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Rule::MailRetention(rule) => rule.validate(),
            Rule::InvokeProcess(rule) if rule.process_path.as_os_str().is_empty() => Err(
                SinkError::Config(format!("rule {}: process_path is empty", rule.id)),
            ),
            Rule::Forward(rule) if rule.to_email.trim().is_empty() => Err(SinkError::Config(
                format!("rule {}: to_email is empty", rule.id),
            )),
            _ => Ok(()),
        }
    }
}

/// Parse and validate a JSON rule list
pub fn parse_rules(json: &str) -> Result<Vec<Rule>> {
    let rules: Vec<Rule> = serde_json::from_str(json)?;
    for rule in &rules {
        rule.validate()?;
    }
    Ok(rules)
}

/// Load a JSON rule list from disk
pub fn load_rules<P: AsRef<Path>>(path: P) -> Result<Vec<Rule>> {
    let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        SinkError::Config(format!("cannot read rules {}: {}", path.as_ref().display(), e))
    })?;
    parse_rules(&content)
}

/// The live rule list
///
/// Read-mostly: readers take a cheap [`snapshot`](Self::snapshot) and keep
/// using it while a configuration change swaps in a whole new list.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: RwLock<Arc<Vec<Rule>>>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
        }
    }

    pub fn snapshot(&self) -> Arc<Vec<Rule>> {
        match self.rules.read() {
            Ok(rules) => rules.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, rules: Vec<Rule>) {
        let rules = Arc::new(rules);
        match self.rules.write() {
            Ok(mut current) => *current = rules,
            Err(poisoned) => *poisoned.into_inner() = rules,
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
