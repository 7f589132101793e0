//! Error types for mailsink-rs

use thiserror::Error;

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, SinkError>;

#[derive(Error, Debug)]
pub enum SinkError {
    /// Socket-level failure; the owning connection is always closed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or out-of-sequence protocol input
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A rule could not be evaluated (invalid regex, unreadable message)
    #[error("Rule match error: {0}")]
    RuleMatch(String),

    /// A matched rule's action failed after exhausting its retries
    #[error("Dispatch failed after {attempts} attempt(s): {reason}")]
    Dispatch { attempts: u32, reason: String },

    /// An invoked external process could not be started or failed
    #[error("Process error: {0}")]
    Process(String),

    /// No IPC peer reachable at the target endpoint
    #[error("IPC peer unavailable: {0}")]
    IpcUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SinkError {
    /// Whether this error means the underlying socket is unusable
    pub fn is_transport(&self) -> bool {
        matches!(self, SinkError::Transport(_) | SinkError::Io(_))
    }
}
