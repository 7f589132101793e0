//! Rule dispatcher
//!
//! Per-message rules run concurrently, each in its own strictly sequential
//! retry loop; one rule failing never stops the others. Retention rules run
//! on a timer. Failures end up in the returned [`DispatchOutcome`]s and the
//! log, never in the SMTP session that stored the message.

use crate::events::{DomainEvent, EventBus};
use crate::message::{MessageContext, ReceivedMessage};
use crate::rules::matcher::{is_expired, rule_matches};
use crate::rules::process;
use crate::rules::retry::{retry_with_delay, AttemptRecord, RetryOutcome};
use crate::rules::types::{MailRetentionRule, RelayEndpoint, RetryPolicy, Rule, RuleKind, RuleSet};
use crate::smtp::client::{Envelope, RelayTransport};
use crate::storage::MessageStore;
use chrono::Utc;
use futures::future::join_all;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of running one rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub rule_id: Uuid,
    pub rule_type: RuleKind,
    pub success: bool,
    pub attempts: Vec<AttemptRecord>,
    pub error: Option<String>,
}

impl DispatchOutcome {
    /// Event announcing this outcome, when it is a terminal failure
    pub fn failure_event(&self, path: Option<&Path>) -> Option<DomainEvent> {
        if self.success {
            return None;
        }
        Some(DomainEvent::RuleDispatchFailed {
            rule_id: self.rule_id,
            rule_type: self.rule_type,
            path: path.map(Path::to_path_buf),
            attempts: self.attempts.len() as u32,
            error: self.error.clone().unwrap_or_default(),
        })
    }

    fn from_retry(rule: &Rule, outcome: RetryOutcome<()>) -> Self {
        Self {
            rule_id: rule.id(),
            rule_type: rule.kind(),
            success: outcome.result.is_ok(),
            error: outcome.result.err().map(|e| e.to_string()),
            attempts: outcome.attempts,
        }
    }
}

pub struct RuleDispatcher {
    rules: Arc<RuleSet>,
    store: Arc<dyn MessageStore>,
    transport: Arc<dyn RelayTransport>,
}

impl RuleDispatcher {
    pub fn new(
        rules: Arc<RuleSet>,
        store: Arc<dyn MessageStore>,
        transport: Arc<dyn RelayTransport>,
    ) -> Self {
        Self {
            rules,
            store,
            transport,
        }
    }

    pub fn rules(&self) -> &Arc<RuleSet> {
        &self.rules
    }

    /// Run every matching per-message rule against a newly stored message
    pub async fn dispatch_new_message(&self, message: &ReceivedMessage) -> Vec<DispatchOutcome> {
        let rules = self.rules.snapshot();
        if !rules.iter().any(|rule| rule.enabled() && !rule.is_periodic()) {
            return Vec::new();
        }

        let raw = match self.store.load(&message.path).await {
            Ok(raw) => raw,
            Err(e) => {
                error!("Cannot load {} for rule dispatch: {}", message.path.display(), e);
                return Vec::new();
            }
        };
        let context = MessageContext::parse(&message.path, &raw);

        let matched = rules.iter().filter(|rule| match rule_matches(rule, &context) {
            Ok(matched) => matched,
            Err(e) => {
                warn!("Rule {} ({}) skipped: {}", rule.id(), rule.kind(), e);
                false
            }
        });

        let outcomes = join_all(matched.map(|rule| self.execute(rule, message, &raw))).await;

        for outcome in &outcomes {
            match &outcome.error {
                None => info!(
                    "Rule {} ({}) completed for {}",
                    outcome.rule_id,
                    outcome.rule_type,
                    message.path.display()
                ),
                Some(e) => error!(
                    "Rule {} ({}) failed for {}: {}",
                    outcome.rule_id,
                    outcome.rule_type,
                    message.path.display(),
                    e
                ),
            }
        }

        outcomes
    }

    /// Run every enabled periodic (retention) rule once
    pub async fn run_periodic(&self) -> Vec<DispatchOutcome> {
        let rules = self.rules.snapshot();
        let mut outcomes = Vec::new();

        for rule in rules.iter() {
            if let Rule::MailRetention(retention) = rule {
                if retention.enabled {
                    outcomes.push(self.apply_retention(rule, retention).await);
                }
            }
        }

        outcomes
    }

    async fn execute(&self, rule: &Rule, message: &ReceivedMessage, raw: &[u8]) -> DispatchOutcome {
        let outcome = match rule {
            Rule::Relay(relay) => {
                let envelope = Envelope {
                    mail_from: message.mail_from.clone(),
                    recipients: message.recipients.clone(),
                };
                self.relay(&relay.relay, relay.retry, &envelope, raw).await
            }
            Rule::ConditionalRelay(relay) => {
                let envelope = Envelope {
                    mail_from: message.mail_from.clone(),
                    recipients: message.recipients.clone(),
                };
                self.relay(&relay.relay, relay.retry, &envelope, raw).await
            }
            Rule::Forward(forward) => {
                let envelope = Envelope {
                    mail_from: forward
                        .from_email
                        .clone()
                        .unwrap_or_else(|| message.mail_from.clone()),
                    recipients: vec![forward.to_email.clone()],
                };
                self.relay(&forward.relay, forward.retry, &envelope, raw).await
            }
            Rule::InvokeProcess(invoke) => {
                let action = format!("invoke {}", invoke.process_path.display());
                let policy = RetryPolicy::once();
                retry_with_delay(&action, policy.max_attempts(), policy.delay(), |_| {
                    process::invoke(invoke, &message.path)
                })
                .await
            }
            Rule::MailRetention(_) => RetryOutcome {
                result: Ok(()),
                attempts: Vec::new(),
            },
        };

        DispatchOutcome::from_retry(rule, outcome)
    }

    async fn relay(
        &self,
        endpoint: &RelayEndpoint,
        policy: RetryPolicy,
        envelope: &Envelope,
        raw: &[u8],
    ) -> RetryOutcome<()> {
        let action = format!("relay via {}", endpoint);
        let transport = self.transport.as_ref();
        retry_with_delay(&action, policy.max_attempts(), policy.delay(), move |_| {
            transport.relay(endpoint, envelope, raw)
        })
        .await
    }

    async fn apply_retention(&self, rule: &Rule, retention: &MailRetentionRule) -> DispatchOutcome {
        let mut outcome = DispatchOutcome {
            rule_id: retention.id,
            rule_type: rule.kind(),
            success: true,
            attempts: Vec::new(),
            error: None,
        };

        if let Err(e) = retention.validate() {
            warn!("Retention rule {} skipped: {}", retention.id, e);
            outcome.success = false;
            outcome.error = Some(e.to_string());
            return outcome;
        }

        let entries = match self.store.enumerate().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Retention rule {}: cannot list messages: {}", retention.id, e);
                outcome.success = false;
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };

        let now = Utc::now();
        let mut failures = 0;
        for entry in entries.iter().filter(|entry| is_expired(retention, entry, now)) {
            let started_at = Utc::now();
            let error = match self.store.delete(&entry.path).await {
                Ok(()) => None,
                Err(e) => {
                    warn!("Retention: failed to delete {}: {}", entry.path.display(), e);
                    failures += 1;
                    Some(e.to_string())
                }
            };
            outcome.attempts.push(AttemptRecord {
                attempt: 1,
                action: format!("delete {}", entry.name),
                started_at,
                error,
            });
        }

        if failures > 0 {
            outcome.success = false;
            outcome.error = Some(format!("{} deletion(s) failed", failures));
        }
        info!(
            "Retention rule {} ({} days): removed {} message(s)",
            retention.id,
            retention.retention_days,
            outcome.attempts.len() - failures
        );
        outcome
    }

    /// Drive the dispatcher from the event bus until `shutdown` is cancelled
    ///
    /// New messages are dispatched on their own tasks, `RulesUpdated` swaps
    /// the rule list, and retention rules run every `sweep_interval` on a
    /// task of their own (a tick is skipped while a sweep is still running).
    /// Terminal failures are published back on the bus as
    /// `RuleDispatchFailed`.
    pub fn spawn(
        self: Arc<Self>,
        events: &EventBus,
        sweep_interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let mut subscriber = events.subscribe();
        let events = events.clone();

        tokio::spawn(async move {
            let tracker = TaskTracker::new();
            let sweeping = Arc::new(AtomicBool::new(false));
            let mut ticker = interval(sweep_interval.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if sweeping.swap(true, Ordering::AcqRel) {
                            debug!("Retention sweep still running, skipping tick");
                            continue;
                        }
                        let dispatcher = self.clone();
                        let events = events.clone();
                        let sweeping = sweeping.clone();
                        let token = shutdown.clone();
                        tracker.spawn(async move {
                            tokio::select! {
                                _ = token.cancelled() => debug!("Retention sweep cancelled"),
                                outcomes = dispatcher.run_periodic() => {
                                    publish_failures(&events, None, &outcomes);
                                }
                            }
                            sweeping.store(false, Ordering::Release);
                        });
                    }
                    event = subscriber.recv() => match event {
                        Some(DomainEvent::NewMessage(message)) => {
                            let dispatcher = self.clone();
                            let events = events.clone();
                            let token = shutdown.clone();
                            tracker.spawn(async move {
                                tokio::select! {
                                    _ = token.cancelled() => {
                                        debug!("Dispatch for {} cancelled", message.path.display());
                                    }
                                    outcomes = dispatcher.dispatch_new_message(&message) => {
                                        publish_failures(&events, Some(&message.path), &outcomes);
                                    }
                                }
                            });
                        }
                        Some(DomainEvent::RulesUpdated { rules }) => {
                            match rules.iter().try_for_each(Rule::validate) {
                                Ok(()) => {
                                    info!("Rules updated ({} rule(s))", rules.len());
                                    self.rules.replace(rules);
                                }
                                Err(e) => warn!("Ignoring invalid rule update: {}", e),
                            }
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }

            tracker.close();
            tracker.wait().await;
            debug!("Rule dispatcher stopped");
        })
    }
}

fn publish_failures(events: &EventBus, path: Option<&Path>, outcomes: &[DispatchOutcome]) {
    for event in outcomes.iter().filter_map(|outcome| outcome.failure_event(path)) {
        events.publish(event);
    }
}
