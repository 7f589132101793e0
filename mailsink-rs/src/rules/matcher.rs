//! Per-message rule matching
//!
//! Matching is synchronous and CPU-only. An invalid pattern is reported as
//! [`SinkError::RuleMatch`] and callers treat it as "does not match".

use crate::error::{Result, SinkError};
use crate::message::MessageContext;
use crate::rules::types::{ConditionalRelayRule, MailRetentionRule, Rule};
use crate::storage::MessageEntry;
use chrono::{DateTime, Utc};
use regex::Regex;

/// Whether `rule` applies to a newly received message
///
/// Disabled rules and periodic rules never match here.
pub fn rule_matches(rule: &Rule, message: &MessageContext) -> Result<bool> {
    if !rule.enabled() {
        return Ok(false);
    }

    match rule {
        Rule::Relay(_) | Rule::Forward(_) | Rule::InvokeProcess(_) => Ok(true),
        Rule::ConditionalRelay(conditional) => conditional_matches(conditional, message),
        Rule::MailRetention(_) => Ok(false),
    }
}

/// Header pattern against any raw header, OR body pattern against the text body
///
/// A rule with neither pattern set matches nothing.
pub fn conditional_matches(rule: &ConditionalRelayRule, message: &MessageContext) -> Result<bool> {
    let header_regex = compile(rule.header_regex.as_deref())?;
    let body_regex = compile(rule.body_regex.as_deref())?;

    if let Some(regex) = &header_regex {
        if message.headers.iter().any(|header| regex.is_match(header)) {
            return Ok(true);
        }
    }

    if let Some(regex) = &body_regex {
        if regex.is_match(&message.text_body) {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Whether a stored message is past the rule's retention period
pub fn is_expired(rule: &MailRetentionRule, entry: &MessageEntry, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(entry.created_at) > rule.max_age()
}

fn compile(pattern: Option<&str>) -> Result<Option<Regex>> {
    match pattern {
        None => Ok(None),
        Some(p) if p.is_empty() => Ok(None),
        Some(p) => Regex::new(p)
            .map(Some)
            .map_err(|e| SinkError::RuleMatch(format!("invalid pattern '{}': {}", p, e))),
    }
}
