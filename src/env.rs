//! Environment constants and path utilities for the resync core.
//!
//! Centralizes the storage keys, directory names and file names used
//! throughout the crate.

use std::path::{Path, PathBuf};

/// Hidden application directory (like .git)
pub const RESYNC_DIR_NAME: &str = ".resync";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name when placed directly in the working directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "resync.toml";

/// System-wide configuration directory (unix only)
pub const SYSTEM_CONFIG_DIR: &str = "/etc/resync";

/// Keys under which the core persists records in the key-value store
pub mod keys {
    /// Session saved before suspend for connection recovery
    pub const SESSION_RECOVERY_KEY: &str = "resync.session_recovery";

    /// Write queue bookkeeping and descriptors
    pub const WRITE_QUEUE_KEY: &str = "resync.write_queue";
}

/// Directory and file names used by the file-backed store
pub mod storage {
    /// Store directory within .resync
    pub const STORE_DIR_NAME: &str = "store";

    /// Extension for persisted records
    pub const RECORD_EXTENSION: &str = "json";

    /// Extension for in-progress atomic writes
    pub const TEMP_EXTENSION: &str = "tmp";
}

/// Well-known resource names used by the default resync plan
pub mod resources {
    pub const PROFILE: &str = "profile";
    pub const PRIMARY_AGGREGATE: &str = "primaryAggregate";
    pub const COLLECTION_A: &str = "collectionA";
    pub const COLLECTION_B: &str = "collectionB";
    pub const COLLECTION_C: &str = "collectionC";

    /// Single-flight key for whole-plan resync requests
    pub const GLOBAL_RESYNC_KEY: &str = "resync:global";
}

/// Build the .resync directory path from a workspace root
pub fn resync_dir_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(RESYNC_DIR_NAME)
}

/// Build the default file-store directory from a workspace root
pub fn store_dir_path(workspace_root: &Path) -> PathBuf {
    resync_dir_path(workspace_root).join(storage::STORE_DIR_NAME)
}

/// Build the workspace configuration file path
pub fn workspace_config_path(workspace_root: &Path) -> PathBuf {
    resync_dir_path(workspace_root).join(CONFIG_FILE_NAME)
}

/// Build the per-user configuration file path
pub fn user_config_path(home: &Path) -> PathBuf {
    home.join(RESYNC_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// Build the system-wide configuration file path
pub fn system_config_path() -> PathBuf {
    Path::new(SYSTEM_CONFIG_DIR).join(CONFIG_FILE_NAME)
}
