//! In-process domain events
//!
//! [`EventBus`] is a bounded broadcast channel. Publishing never blocks: when
//! a subscriber falls more than `capacity` events behind, the oldest events
//! are dropped for that subscriber and the loss is logged on its next receive.

use crate::message::ReceivedMessage;
use crate::rules::{Rule, RuleKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

/// Default number of buffered events per subscriber
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Lifecycle and message events shared between components and processes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DomainEvent {
    AppPreStart,
    AppReady,
    AppExit,
    NewMessage(ReceivedMessage),
    SmtpServerBind { address: String, port: u16 },
    RulesUpdated { rules: Vec<Rule> },
    /// A matched rule's action failed for good
    RuleDispatchFailed {
        rule_id: Uuid,
        rule_type: RuleKind,
        /// Message the rule ran for; unset for periodic rules
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
        attempts: u32,
        error: String,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::AppPreStart => "AppPreStart",
            DomainEvent::AppReady => "AppReady",
            DomainEvent::AppExit => "AppExit",
            DomainEvent::NewMessage(_) => "NewMessage",
            DomainEvent::SmtpServerBind { .. } => "SmtpServerBind",
            DomainEvent::RulesUpdated { .. } => "RulesUpdated",
            DomainEvent::RuleDispatchFailed { .. } => "RuleDispatchFailed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to all current subscribers; returns how many will see it
    pub fn publish(&self, event: DomainEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub struct EventSubscriber {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventSubscriber {
    /// Next event, or `None` once every publisher is gone
    pub async fn recv(&mut self) -> Option<DomainEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event subscriber lagging, dropped {} oldest event(s)", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
