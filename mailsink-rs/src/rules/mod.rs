//! Rule engine
//!
//! - [`types`]: rule variants, relay endpoints, retry policy, the live [`RuleSet`]
//! - [`matcher`]: which rules apply to a message
//! - [`retry`]: retry-with-delay
//! - [`process`]: external process invocation
//! - [`dispatcher`]: executes matched rules and periodic retention

pub mod dispatcher;
pub mod matcher;
pub mod process;
pub mod retry;
pub mod types;

pub use dispatcher::{DispatchOutcome, RuleDispatcher};
pub use matcher::rule_matches;
pub use retry::{retry_with_delay, AttemptRecord, RetryOutcome};
pub use types::{
    load_rules, parse_rules, ConditionalRelayRule, ForwardRule, InvokeProcessRule,
    MailRetentionRule, RelayEndpoint, RelayRule, RetryPolicy, Rule, RuleKind, RuleSet,
};
