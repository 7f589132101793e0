//! Message storage
//!
//! The SMTP side only appends, the retention rule only deletes; the
//! [`MessageStore`] implementation guarantees atomic file creation.
//! - [`file`]: directory of `.eml` files

pub mod file;

pub use file::FileMessageStore;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A stored message and its metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntry {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a complete message
    async fn save(&self, data: &[u8]) -> Result<MessageEntry>;

    /// All stored messages, oldest first
    async fn enumerate(&self) -> Result<Vec<MessageEntry>>;

    async fn delete(&self, path: &Path) -> Result<()>;

    async fn load(&self, path: &Path) -> Result<Vec<u8>>;
}
