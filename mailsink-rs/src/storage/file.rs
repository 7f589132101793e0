use crate::error::{Result, SinkError};
use crate::storage::{MessageEntry, MessageStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

const TMP_DIR: &str = ".tmp";
const EXTENSION: &str = "eml";

pub struct FileMessageStore {
    base_path: PathBuf,
}

impl FileMessageStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    async fn ensure_structure(&self) -> Result<()> {
        let tmp = self.base_path.join(TMP_DIR);
        if !tmp.exists() {
            fs::create_dir_all(&tmp).await.map_err(|e| {
                SinkError::Storage(format!("Failed to create directory {:?}: {}", tmp, e))
            })?;
        }
        Ok(())
    }

    fn generate_filename(&self) -> String {
        // <UTC timestamp with millis>-<short unique id>.eml sorts by arrival
        let timestamp = Utc::now().format("%Y%m%d%H%M%S%3f");
        let unique = Uuid::new_v4().simple().to_string();
        format!("{}-{}.{}", timestamp, &unique[..8], EXTENSION)
    }

    /// Refuse paths outside the store directory
    fn check_contained(&self, path: &Path) -> Result<()> {
        if path.parent() != Some(self.base_path.as_path()) {
            return Err(SinkError::Storage(format!(
                "{} is not a message in {}",
                path.display(),
                self.base_path.display()
            )));
        }
        Ok(())
    }

    async fn entry_for(&self, path: PathBuf) -> Result<MessageEntry> {
        let metadata = fs::metadata(&path).await?;
        let created = metadata.created().or_else(|_| metadata.modified())?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(MessageEntry {
            path,
            name,
            size: metadata.len(),
            created_at: DateTime::<Utc>::from(created),
        })
    }
}

#[async_trait]
impl MessageStore for FileMessageStore {
    async fn save(&self, data: &[u8]) -> Result<MessageEntry> {
        self.ensure_structure().await?;

        let filename = self.generate_filename();
        let tmp_path = self.base_path.join(TMP_DIR).join(&filename);
        let final_path = self.base_path.join(&filename);

        // Write to the temp directory first, then move into place (atomic)
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, &final_path).await?;

        info!("Stored message as {}", final_path.display());
        self.entry_for(final_path).await
    }

    async fn enumerate(&self) -> Result<Vec<MessageEntry>> {
        let mut entries = Vec::new();
        let mut dir = match fs::read_dir(&self.base_path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            // A concurrent delete may remove the file between listing and stat
            match self.entry_for(path).await {
                Ok(entry) => entries.push(entry),
                Err(e) => debug!("Skipping vanished message: {}", e),
            }
        }

        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(entries)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        self.check_contained(path)?;
        fs::remove_file(path).await?;
        info!("Deleted message {}", path.display());
        Ok(())
    }

    async fn load(&self, path: &Path) -> Result<Vec<u8>> {
        self.check_contained(path)?;
        Ok(fs::read(path).await?)
    }
}
