//! Aggregate configuration for the resync core.
//!
//! Every section has defaults, so a TOML file only needs the values it
//! overrides.

use crate::resilience::{CircuitBreakerConfig, RetryPolicy};
use crate::resync::ResyncPlan;
use crate::session::{CoordinatorConfig, RecoveryConfig};
use crate::storage::StorageConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub coordinator: CoordinatorConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Policy for resync loads.
    pub read_retry: RetryPolicy,
    /// Policy for queued writes.
    pub write_retry: RetryPolicy,
    pub recovery: RecoveryConfig,
    pub resync: ResyncPlan,
    pub storage: StorageConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            read_retry: RetryPolicy::reads(),
            write_retry: RetryPolicy::writes(),
            recovery: RecoveryConfig::default(),
            resync: ResyncPlan::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse configuration")
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Save to TOML file, creating parent directories as needed
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        fs::write(path, self.to_toml_string()?)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_use_one_policy_per_class() {
        let config = SyncConfig::default();

        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.cooldown, Duration::from_secs(30));
        assert_eq!(config.read_retry.max_retries, 2);
        assert_eq!(config.read_retry.initial_delay, Duration::from_millis(300));
        assert_eq!(config.write_retry.max_retries, 3);
        assert_eq!(config.write_retry.jitter, Duration::from_millis(1000));
        assert_eq!(config.coordinator.lock_safety_timeout, Duration::from_secs(15));
        assert_eq!(config.recovery.probe_timeout, Duration::from_millis(500));
        assert_eq!(config.resync.phases.len(), 4);
    }

    #[test]
    fn test_toml_roundtrip_through_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = SyncConfig::default();
        config.circuit_breaker.failure_threshold = 5;
        config.write_retry.max_retries = 6;
        config.to_toml_file(&path).unwrap();

        let loaded = SyncConfig::from_toml_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SyncConfig::from_toml_str(
            r#"
            [circuit_breaker]
            failure_threshold = 7

            [recovery]
            skip_probe_when_degraded = false
            "#,
        )
        .unwrap();

        assert_eq!(config.circuit_breaker.failure_threshold, 7);
        assert_eq!(config.circuit_breaker.cooldown, Duration::from_secs(30));
        assert!(!config.recovery.skip_probe_when_degraded);
        assert_eq!(config.write_retry, RetryPolicy::writes());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(SyncConfig::from_toml_str("circuit_breaker = 3").is_err());
    }
}
