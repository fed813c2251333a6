//! Per-resource circuit breakers.
//!
//! ```text
//! Closed --[failure_count >= threshold]--> Open
//! Open --[cooldown elapsed, next call]--> HalfOpen (single probe admitted)
//! HalfOpen --[probe succeeds]--> Closed
//! HalfOpen --[probe fails]--> Open (cooldown re-armed)
//! ```
//!
//! Breakers are created lazily the first time a resource name is seen, so a
//! failing resource never starves the others.

use crate::events::{EventBus, SyncEvent};
use crate::resilience::types::SyncError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct BreakerEntry {
    state: CircuitState,
    failure_count: u32,
    next_attempt: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
}

impl Default for BreakerEntry {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            next_attempt: None,
            last_failure_at: None,
            probe_in_flight: false,
        }
    }
}

/// Point-in-time view of one breaker, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub next_attempt_in: Option<Duration>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, BreakerEntry>,
    events: Arc<EventBus>,
}

/// Clears a half-open probe reservation if the guarded call is dropped
/// before it settles.
struct ProbeReservation<'a> {
    registry: &'a CircuitBreakerRegistry,
    resource: &'a str,
    settled: bool,
}

impl Drop for ProbeReservation<'_> {
    fn drop(&mut self) {
        if !self.settled
            && let Some(mut entry) = self.registry.breakers.get_mut(self.resource)
        {
            entry.probe_in_flight = false;
        }
    }
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, events: Arc<EventBus>) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
            events,
        }
    }

    /// Run `operation` through the breaker for `resource`.
    ///
    /// Fails with [`SyncError::CircuitOpen`] without invoking the operation
    /// while the breaker is open, or while a half-open probe is already in
    /// flight.
    pub async fn execute<T, F, Fut>(&self, resource: &str, operation: F) -> Result<T, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        self.admit(resource)?;

        let mut reservation = ProbeReservation {
            registry: self,
            resource,
            settled: false,
        };

        let result = operation().await;
        reservation.settled = true;

        match &result {
            Ok(_) => self.record_success(resource),
            Err(error) => self.record_failure(resource, error),
        }

        result
    }

    fn admit(&self, resource: &str) -> Result<(), SyncError> {
        let now = Instant::now();
        let mut entry = self.breakers.entry(resource.to_string()).or_default();

        let state = entry.state;
        let next_attempt = entry.next_attempt;
        let rejection = match state {
            CircuitState::Closed => None,
            CircuitState::Open => match next_attempt {
                Some(next_attempt) if now < next_attempt => Some(next_attempt - now),
                _ => {
                    info!(resource, "Circuit breaker cooldown elapsed, entering half-open");
                    entry.state = CircuitState::HalfOpen;
                    entry.probe_in_flight = true;
                    None
                }
            },
            CircuitState::HalfOpen => {
                if entry.probe_in_flight {
                    Some(Duration::ZERO)
                } else {
                    entry.probe_in_flight = true;
                    None
                }
            }
        };
        drop(entry);

        match rejection {
            None => Ok(()),
            Some(retry_in) => {
                debug!(
                    resource,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "Circuit breaker rejected call"
                );
                self.events.emit(SyncEvent::CircuitOpen {
                    resource: resource.to_string(),
                    retry_in,
                });
                Err(SyncError::CircuitOpen {
                    resource: resource.to_string(),
                    retry_at: Utc::now()
                        + chrono::Duration::from_std(retry_in).unwrap_or_default(),
                })
            }
        }
    }

    fn record_success(&self, resource: &str) {
        if let Some(mut entry) = self.breakers.get_mut(resource) {
            if entry.state != CircuitState::Closed {
                info!(resource, previous = %entry.state, "Circuit breaker closed");
            }
            entry.state = CircuitState::Closed;
            entry.failure_count = 0;
            entry.next_attempt = None;
            entry.probe_in_flight = false;
        }
    }

    fn record_failure(&self, resource: &str, error: &SyncError) {
        let Some(mut entry) = self.breakers.get_mut(resource) else {
            return;
        };
        entry.probe_in_flight = false;

        // Cancellation says nothing about the health of the resource.
        if error.is_aborted() {
            return;
        }

        entry.failure_count += 1;
        entry.last_failure_at = Some(Utc::now());
        let failure_count = entry.failure_count;

        let opened = entry.state == CircuitState::HalfOpen
            || failure_count >= self.config.failure_threshold;
        if opened {
            entry.state = CircuitState::Open;
            entry.next_attempt = Some(Instant::now() + self.config.cooldown);
        }
        drop(entry);

        self.events.emit(SyncEvent::ResourceFailure {
            resource: resource.to_string(),
            error: error.to_string(),
            failure_count,
        });

        if opened {
            warn!(
                resource,
                failure_count,
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "Circuit breaker opened"
            );
            self.events.emit(SyncEvent::CircuitOpen {
                resource: resource.to_string(),
                retry_in: self.config.cooldown,
            });
        }
    }

    pub fn state(&self, resource: &str) -> Option<CircuitState> {
        self.breakers.get(resource).map(|entry| entry.state)
    }

    pub fn snapshot(&self) -> BTreeMap<String, BreakerSnapshot> {
        let now = Instant::now();
        self.breakers
            .iter()
            .map(|entry| {
                let snapshot = BreakerSnapshot {
                    state: entry.state,
                    failure_count: entry.failure_count,
                    next_attempt_in: entry
                        .next_attempt
                        .map(|next| next.saturating_duration_since(now)),
                    last_failure_at: entry.last_failure_at,
                };
                (entry.key().clone(), snapshot)
            })
            .collect()
    }

    /// Give every open breaker a fresh probe; failure history from before a
    /// suspend may no longer apply. Returns how many breakers moved.
    pub fn reset_open_to_half_open(&self) -> usize {
        let mut moved = 0;
        for mut entry in self.breakers.iter_mut() {
            if entry.state == CircuitState::Open {
                entry.state = CircuitState::HalfOpen;
                entry.next_attempt = None;
                entry.probe_in_flight = false;
                moved += 1;
            }
        }
        if moved > 0 {
            info!(count = moved, "Moved open circuit breakers to half-open");
        }
        moved
    }

    /// Return every breaker to closed with a zero failure count.
    pub fn reset_all(&self) {
        for mut entry in self.breakers.iter_mut() {
            let last_failure_at = entry.last_failure_at;
            *entry = BreakerEntry {
                last_failure_at,
                ..BreakerEntry::default()
            };
        }
        debug!("All circuit breakers reset");
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("config", &self.config)
            .field("breakers", &self.breakers.len())
            .finish()
    }
}
