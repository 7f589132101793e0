//! Retry-with-delay
//!
//! A plain async loop: run the action, and on failure sleep for a fixed delay
//! before the next attempt. Attempts for one dispatch never overlap.

use crate::error::{Result, SinkError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// One attempted action, in order of execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    /// 1-based
    pub attempt: u32,
    pub action: String,
    pub started_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl AttemptRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    pub attempts: Vec<AttemptRecord>,
}

/// Run `action` up to `max_attempts` times with `delay` between failures
///
/// `action` receives the 1-based attempt number. After the last failed
/// attempt the result is [`SinkError::Dispatch`] carrying the last error.
pub async fn retry_with_delay<T, F, Fut>(
    action_name: &str,
    max_attempts: u32,
    delay: Duration,
    mut action: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempts = Vec::new();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let started_at = Utc::now();
        match action(attempt).await {
            Ok(value) => {
                debug!("{} succeeded on attempt {}", action_name, attempt);
                attempts.push(AttemptRecord {
                    attempt,
                    action: action_name.to_string(),
                    started_at,
                    error: None,
                });
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(e) => {
                let reason = e.to_string();
                attempts.push(AttemptRecord {
                    attempt,
                    action: action_name.to_string(),
                    started_at,
                    error: Some(reason.clone()),
                });

                if attempt == max_attempts {
                    return RetryOutcome {
                        result: Err(SinkError::Dispatch {
                            attempts: attempt,
                            reason,
                        }),
                        attempts,
                    };
                }

                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    action_name, attempt, max_attempts, reason, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
