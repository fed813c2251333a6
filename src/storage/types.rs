use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the file backend; defaults to `.resync/store` under the
    /// working directory.
    pub directory: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolve_directory(&self, workspace_root: &Path) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| crate::env::store_dir_path(workspace_root))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            directory: None,
        }
    }
}
