use crate::env;
use crate::resilience::SyncError;
use crate::storage::store::KeyValueStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// File-backed store, one file per key.
///
/// Writes go to a temp file which is synced and then renamed over the
/// record, so a crash mid-write never leaves a truncated record behind.
#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `directory`, creating it if needed.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory).with_context(|| {
            format!("Failed to create store directory: {}", directory.display())
        })?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the record for `key`. Characters outside `[A-Za-z0-9._-]`
    /// are replaced so keys can never escape the store directory.
    pub fn record_path(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let file_name = file_name.trim_start_matches('.');
        self.directory
            .join(format!("{}.{}", file_name, env::storage::RECORD_EXTENSION))
    }

    async fn read_record(&self, key: &str) -> Result<Option<String>> {
        let path = self.record_path(key);
        match async_fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error)
                .with_context(|| format!("Failed to read record: {}", path.display())),
        }
    }

    async fn write_record(&self, key: &str, value: &str) -> Result<()> {
        let final_path = self.record_path(key);
        let temp_path = final_path.with_extension(env::storage::TEMP_EXTENSION);

        let mut file = async_fs::File::create(&temp_path)
            .await
            .context("Failed to create temp record")?;
        file.write_all(value.as_bytes())
            .await
            .context("Failed to write record data")?;
        file.sync_all().await.context("Failed to sync record")?;
        drop(file);

        async_fs::rename(&temp_path, &final_path)
            .await
            .with_context(|| format!("Failed to commit record: {}", final_path.display()))?;

        debug!(key, path = %final_path.display(), bytes = value.len(), "Record written");
        Ok(())
    }

    async fn delete_record(&self, key: &str) -> Result<()> {
        let path = self.record_path(key);
        match async_fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error)
                .with_context(|| format!("Failed to remove record: {}", path.display())),
        }
    }
}

fn storage_error(error: anyhow::Error) -> SyncError {
    SyncError::Storage(format!("{:#}", error))
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, SyncError> {
        self.read_record(key).await.map_err(storage_error)
    }

    async fn set_item(&self, key: &str, value: String) -> Result<(), SyncError> {
        self.write_record(key, &value).await.map_err(storage_error)
    }

    async fn remove_item(&self, key: &str) -> Result<(), SyncError> {
        self.delete_record(key).await.map_err(storage_error)
    }
}
