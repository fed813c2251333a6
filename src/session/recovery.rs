//! Connection recovery after resume.
//!
//! A suspend can leave the transport handle frozen: sockets that never
//! complete, a session that silently expired. Recovery tries, in order,
//! stopping at the first success:
//!
//! 1. probe the current handle (skipped when a degradation was detected);
//! 2. restore the stored session directly onto the current handle;
//! 3. recreate the handle and restore the stored session onto it;
//! 4. recreate the handle with no session.

use crate::backend::{BackendClient, ClientFactory, ConnectivityMonitor, Session, SessionRecoveryRecord};
use crate::env::keys::SESSION_RECOVERY_KEY;
use crate::resilience::{SyncError, with_timeout};
use crate::storage::{KeyValueStore, load_json, save_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for recovery operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub probe_timeout: Duration,
    pub probe_attempts: u32,
    pub probe_gap: Duration,
    /// Timeout for attaching a session to a handle.
    pub restore_timeout: Duration,
    /// A session must stay valid at least this long to be reused.
    pub min_session_validity: Duration,
    pub stability_max_wait: Duration,
    pub stability_step: Duration,
    pub stable_readings: u32,
    pub healthy_latency: Duration,
    /// Start at stored-session restore when the before/after snapshot
    /// comparison reports a degradation.
    pub skip_probe_when_degraded: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(500),
            probe_attempts: 3,
            probe_gap: Duration::from_millis(100),
            restore_timeout: Duration::from_millis(2000),
            min_session_validity: Duration::from_secs(30),
            stability_max_wait: Duration::from_millis(8000),
            stability_step: Duration::from_millis(1000),
            stable_readings: 3,
            healthy_latency: Duration::from_millis(2000),
            skip_probe_when_degraded: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMethod {
    /// Current handle answered with a usable session; nothing changed.
    Healthy,
    DirectTokenRestore,
    ClientRecreatedWithSession,
    FreshClientCreated,
}

impl RecoveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::DirectTokenRestore => "direct_token_restore",
            Self::ClientRecreatedWithSession => "client_recreated_with_session",
            Self::FreshClientCreated => "fresh_client_created",
        }
    }
}

impl std::fmt::Display for RecoveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct RecoveryOutcome {
    pub client: Arc<dyn BackendClient>,
    pub recovered: bool,
    pub method: RecoveryMethod,
}

impl std::fmt::Debug for RecoveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryOutcome")
            .field("client_id", &self.client.client_id())
            .field("recovered", &self.recovered)
            .field("method", &self.method)
            .finish()
    }
}

/// Transport state captured around a suspend, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub label: String,
    pub has_auth_client: bool,
    pub has_realtime_client: bool,
    pub session_valid: bool,
    pub user_id: Option<String>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Degradation {
    pub reasons: Vec<String>,
}

impl Degradation {
    pub fn is_degraded(&self) -> bool {
        !self.reasons.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub healthy: bool,
    pub latency: Duration,
    pub error: Option<String>,
}

pub struct ConnectionRecoveryManager {
    pub config: RecoveryConfig,
    factory: Arc<dyn ClientFactory>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    store: Arc<dyn KeyValueStore>,
}

impl ConnectionRecoveryManager {
    pub fn new(
        config: RecoveryConfig,
        factory: Arc<dyn ClientFactory>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            config,
            factory,
            connectivity,
            store,
        }
    }

    pub async fn capture_snapshot(&self, label: &str, client: &Arc<dyn BackendClient>) -> StateSnapshot {
        let session = with_timeout(self.config.probe_timeout, client.get_session())
            .await
            .ok()
            .flatten();

        let snapshot = StateSnapshot {
            label: label.to_string(),
            has_auth_client: client.has_auth_client(),
            has_realtime_client: client.has_realtime_client(),
            session_valid: session
                .as_ref()
                .is_some_and(|s| s.is_valid_for(self.config.min_session_validity)),
            user_id: session.map(|s| s.user_id),
            captured_at: Utc::now(),
        };
        debug!(?snapshot, "Captured transport snapshot");
        snapshot
    }

    /// Diagnostic comparison of two snapshots.
    pub fn compare(&self, before: &StateSnapshot, after: &StateSnapshot) -> Degradation {
        let mut reasons = Vec::new();
        if before.has_auth_client && !after.has_auth_client {
            reasons.push("auth_client_lost".to_string());
        }
        if before.has_realtime_client && !after.has_realtime_client {
            reasons.push("realtime_client_lost".to_string());
        }
        if before.session_valid && !after.session_valid {
            reasons.push("session_invalidated".to_string());
        }
        if before.user_id.is_some() && after.user_id.is_some() && before.user_id != after.user_id {
            reasons.push("user_changed".to_string());
        }

        let degradation = Degradation { reasons };
        if degradation.is_degraded() {
            warn!(
                before = %before.label,
                after = %after.label,
                reasons = ?degradation.reasons,
                "Transport degraded across suspend"
            );
        }
        degradation
    }

    /// Short-timeout session probe against `client`, retried with small gaps.
    /// Returns the session if it stays valid for the minimum validity window.
    pub async fn probe_current(&self, client: &Arc<dyn BackendClient>) -> Option<Session> {
        for attempt in 1..=self.config.probe_attempts {
            match with_timeout(self.config.probe_timeout, client.get_session()).await {
                Ok(Some(session)) if session.is_valid_for(self.config.min_session_validity) => {
                    return Some(session);
                }
                Ok(_) => {
                    debug!(attempt, "Current handle has no usable session");
                    return None;
                }
                Err(error) => debug!(attempt, error = %error, "Session probe failed"),
            }
            if attempt < self.config.probe_attempts {
                tokio::time::sleep(self.config.probe_gap).await;
            }
        }
        None
    }

    pub async fn recover(
        &self,
        current: Arc<dyn BackendClient>,
        degradation: Option<&Degradation>,
    ) -> RecoveryOutcome {
        let skip_probe = self.config.skip_probe_when_degraded
            && degradation.is_some_and(Degradation::is_degraded);

        if skip_probe {
            info!("Degradation detected, skipping current-handle probe");
        } else if self.probe_current(&current).await.is_some() {
            debug!("Current handle healthy");
            return RecoveryOutcome {
                client: current,
                recovered: false,
                method: RecoveryMethod::Healthy,
            };
        }

        let stored = self
            .load_stored_session()
            .await
            .filter(|session| session.is_valid_for(self.config.min_session_validity));

        if let Some(session) = stored {
            match self.attach_session(&current, session.clone()).await {
                Ok(()) => return self.recovered(current, RecoveryMethod::DirectTokenRestore),
                Err(error) => warn!(error = %error, "Direct token restore failed"),
            }

            let fresh = self.factory.create_client();
            match self.attach_session(&fresh, session).await {
                Ok(()) => return self.recovered(fresh, RecoveryMethod::ClientRecreatedWithSession),
                Err(error) => warn!(error = %error, "Restore onto recreated handle failed"),
            }
        } else {
            debug!("No stored session usable for recovery");
        }

        self.recovered(self.factory.create_client(), RecoveryMethod::FreshClientCreated)
    }

    fn recovered(&self, client: Arc<dyn BackendClient>, method: RecoveryMethod) -> RecoveryOutcome {
        info!(%method, client_id = %client.client_id(), "Connection recovered");
        RecoveryOutcome {
            client,
            recovered: true,
            method,
        }
    }

    async fn attach_session(
        &self,
        client: &Arc<dyn BackendClient>,
        session: Session,
    ) -> Result<(), SyncError> {
        with_timeout(self.config.restore_timeout, client.set_session(session))
            .await
            .map(|_| ())
    }

    /// Build a new handle, attaching `session` to it when given.
    pub async fn recreate_client(&self, session: Option<Session>) -> Arc<dyn BackendClient> {
        let client = self.factory.create_client();
        if let Some(session) = session
            && let Err(error) = self.attach_session(&client, session).await
        {
            warn!(error = %error, "Could not attach session to recreated handle");
        }
        info!(client_id = %client.client_id(), "Transport handle recreated");
        client
    }

    pub async fn load_stored_session(&self) -> Option<Session> {
        match load_json::<SessionRecoveryRecord>(self.store.as_ref(), SESSION_RECOVERY_KEY).await {
            Ok(record) => record.map(|record| record.session),
            Err(error) => {
                warn!(error = %error, "Could not read stored session");
                None
            }
        }
    }

    pub async fn persist_session(&self, session: &Session) -> Result<(), SyncError> {
        let record = SessionRecoveryRecord {
            session: session.clone(),
            saved_at: Utc::now(),
        };
        save_json(self.store.as_ref(), SESSION_RECOVERY_KEY, &record).await?;
        debug!(user_id = %session.user_id, "Session persisted for recovery");
        Ok(())
    }

    /// Poll connectivity until `stable_readings` consecutive readings are
    /// online. Returns false after `stability_max_wait` so callers proceed
    /// with caution instead of blocking.
    pub async fn wait_for_network_stability(&self) -> bool {
        let started = Instant::now();
        let mut stable = 0;

        loop {
            if self.connectivity.is_connected().await {
                stable += 1;
                if stable >= self.config.stable_readings {
                    debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Network stable");
                    return true;
                }
            } else {
                stable = 0;
            }

            if started.elapsed() + self.config.stability_step > self.config.stability_max_wait {
                warn!(
                    max_wait_ms = self.config.stability_max_wait.as_millis() as u64,
                    "Network did not stabilize"
                );
                return false;
            }
            tokio::time::sleep(self.config.stability_step).await;
        }
    }

    /// Minimal read probe. Healthy iff it succeeds within `timeout` and
    /// faster than the latency threshold.
    pub async fn ensure_connection_healthy(
        &self,
        client: &Arc<dyn BackendClient>,
        timeout: Duration,
    ) -> HealthCheck {
        let started = Instant::now();
        let result = with_timeout(timeout, client.probe()).await;
        let latency = started.elapsed();

        let check = match result {
            Ok(()) if latency < self.config.healthy_latency => HealthCheck {
                healthy: true,
                latency,
                error: None,
            },
            Ok(()) => HealthCheck {
                healthy: false,
                latency,
                error: Some(format!("probe too slow ({}ms)", latency.as_millis())),
            },
            Err(error) => HealthCheck {
                healthy: false,
                latency,
                error: Some(error.to_string()),
            },
        };
        debug!(healthy = check.healthy, latency_ms = latency.as_millis() as u64, "Health check");
        check
    }
}

impl std::fmt::Debug for ConnectionRecoveryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRecoveryManager")
            .field("config", &self.config)
            .finish()
    }
}
