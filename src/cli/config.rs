//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Current directory: ./resync.toml or ./.resync/config.toml
//! 2. User config: ~/.resync/config.toml
//! 3. System config: /etc/resync/config.toml
//! 4. Built-in defaults

use crate::{config::SyncConfig, env};
use anyhow::{Context, Result, bail};
use std::env as std_env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Load `override_path` when given, otherwise walk the hierarchy.
    pub fn load(override_path: Option<&Path>) -> Result<SyncConfig> {
        match override_path {
            Some(path) => {
                info!("Loading configuration override from: {:?}", path);
                SyncConfig::from_toml_file(path)
            }
            None => Self::discover_config(),
        }
    }

    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> Result<SyncConfig> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return SyncConfig::from_toml_file(config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(SyncConfig::default())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        for candidate in Self::get_config_candidates() {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found config file: {:?}", candidate);
                return Some(candidate);
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    /// Configuration file candidates in priority order
    fn get_config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(current_dir.join(env::LOCAL_CONFIG_FILE_NAME));
            candidates.push(env::workspace_config_path(&current_dir));
        }

        if let Some(home_dir) = Self::get_home_dir() {
            candidates.push(env::user_config_path(&home_dir));
        }

        #[cfg(unix)]
        candidates.push(env::system_config_path());

        candidates
    }

    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .filter(|home| !home.is_empty())
            .map(PathBuf::from)
    }

    /// Write the default configuration to `path`, or to the user config
    /// location when no path is given.
    pub fn create_default_config(path: Option<&Path>, force: bool) -> Result<PathBuf> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let home_dir =
                    Self::get_home_dir().context("Could not determine home directory")?;
                env::user_config_path(&home_dir)
            }
        };

        if config_path.exists() && !force {
            bail!(
                "Configuration file already exists: {} (use --force to overwrite)",
                config_path.display()
            );
        }

        SyncConfig::default().to_toml_file(&config_path)?;
        info!("Created default configuration file: {:?}", config_path);
        Ok(config_path)
    }

    /// Show configuration discovery information for debugging
    pub fn show_discovery_info() {
        println!("Configuration Discovery Hierarchy:");
        println!();

        for (i, candidate) in Self::get_config_candidates().iter().enumerate() {
            let status = if candidate.is_file() {
                "EXISTS"
            } else if candidate.exists() {
                "NOT A FILE"
            } else {
                "NOT FOUND"
            };
            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        match Self::find_config_file() {
            Some(found) => println!("Active configuration: {:?}", found),
            None => println!("Active configuration: Built-in defaults"),
        }
    }
}
