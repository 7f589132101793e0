//! mailsink-rs: SMTP sink for testing mail-sending applications
//!
//! Accepts mail for any recipient, stores every message as an `.eml` file
//! and runs configurable rules against what arrives.
//!
//! # Features
//!
//! - **SMTP Server**: Receive emails via SMTP protocol (RFC 5321), 8BITMIME/SMTPUTF8
//! - **Rules**: Conditional relay, forwarding, process invocation and retention
//! - **Retry**: Bounded retry-with-delay for every relay
//! - **IPC**: Lifecycle and new-message events pushed to a companion UI process
//!
//! # Example
//!
//! ```no_run
//! use mailsink_rs::config::Config;
//! use mailsink_rs::events::EventBus;
//! use mailsink_rs::smtp::SmtpServer;
//! use mailsink_rs::storage::FileMessageStore;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let store = Arc::new(FileMessageStore::new(config.storage.message_path.clone()));
//!
//!     let server = SmtpServer::bind(&config, store, EventBus::default()).await?;
//!     server.run(CancellationToken::new()).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration management
//! - [`error`]: Error types and handling
//! - [`net`]: Connection and line-protocol engine
//! - [`smtp`]: SMTP protocol implementation and relay client
//! - [`storage`]: Message store
//! - [`rules`]: Rule engine and dispatcher
//! - [`ipc`]: Inter-process event channel

pub mod config;
pub mod error;
pub mod events;
pub mod ipc;
pub mod message;
pub mod net;
pub mod rules;
pub mod smtp;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use error::{Result, SinkError};
pub use events::{DomainEvent, EventBus};
