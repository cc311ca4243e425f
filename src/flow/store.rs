use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::device::ConfigEntry;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Corrupt entry file {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable home for validated gateway entries
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// All entries created so far, oldest first
    async fn entries(&self) -> Result<Vec<ConfigEntry>>;

    /// Persist a new entry and return it as stored
    async fn create(&self, entry: ConfigEntry) -> Result<ConfigEntry>;
}

/// Entries kept as a JSON array in a single file
pub struct JsonEntryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonEntryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling file the next write goes to before it replaces `path`
    fn staging_path(&self) -> PathBuf {
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        PathBuf::from(staging)
    }

    async fn read_entries(&self) -> Result<Vec<ConfigEntry>> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_slice(&content).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    async fn write_entries(&self, entries: &[ConfigEntry]) -> Result<()> {
        let io_error = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        let json = serde_json::to_vec_pretty(entries).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        // Readers see either the old file or the new one, never a partial write
        let staging = self.staging_path();
        tokio::fs::write(&staging, json).await.map_err(io_error)?;
        tokio::fs::rename(&staging, &self.path).await.map_err(io_error)
    }
}

#[async_trait]
impl EntryStore for JsonEntryStore {
    async fn entries(&self) -> Result<Vec<ConfigEntry>> {
        self.read_entries().await
    }

    async fn create(&self, entry: ConfigEntry) -> Result<ConfigEntry> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_entries().await?;
        entries.push(entry.clone());
        self.write_entries(&entries).await?;
        log::info!("Stored entry {} in {}", entry.entry_id, self.path.display());
        Ok(entry)
    }
}

/// Entries held in memory only
#[derive(Default)]
pub struct MemoryEntryStore {
    entries: RwLock<Vec<ConfigEntry>>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntryStore for MemoryEntryStore {
    async fn entries(&self) -> Result<Vec<ConfigEntry>> {
        Ok(self.entries.read().await.clone())
    }

    async fn create(&self, entry: ConfigEntry) -> Result<ConfigEntry> {
        self.entries.write().await.push(entry.clone());
        Ok(entry)
    }
}
