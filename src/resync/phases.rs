//! Phased resynchronization.
//!
//! ```text
//! sequential: [1 profile] -> settle -> [2 aggregate] -> settle -> [3 a | b] -> [4 optional]
//! parallel:   [1+2 profile | aggregate] -> [3 a | b] -> [4 optional]
//! ```
//!
//! Every load goes through single-flight (which wraps the circuit breaker),
//! then the read retry policy, then the registered loader.

use crate::events::{EventBus, SyncEvent};
use crate::resilience::{RetryExecutor, SingleFlight, SyncError};
use crate::resync::registry::ResourceLoaderRegistry;
use crate::resync::types::*;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Last-known-good data per resource, served when a resync fails.
#[derive(Debug, Default)]
pub struct ResourceCache {
    entries: DashMap<String, CachedResource>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<CachedResource> {
        self.entries.get(name).map(|entry| entry.clone())
    }

    pub fn insert(&self, name: &str, data: ResourceData) {
        self.entries.insert(
            name.to_string(),
            CachedResource {
                data,
                loaded_at: Utc::now(),
            },
        );
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct PhasedResync {
    loaders: Arc<ResourceLoaderRegistry>,
    flights: Arc<SingleFlight<ResourceData>>,
    retry: RetryExecutor,
    cache: Arc<ResourceCache>,
    events: Arc<EventBus>,
}

impl PhasedResync {
    pub fn new(
        loaders: Arc<ResourceLoaderRegistry>,
        flights: Arc<SingleFlight<ResourceData>>,
        retry: RetryExecutor,
        cache: Arc<ResourceCache>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            loaders,
            flights,
            retry,
            cache,
            events,
        }
    }

    pub fn loaders(&self) -> &Arc<ResourceLoaderRegistry> {
        &self.loaders
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    /// Load one resource, joining any in-flight load for the same name.
    ///
    /// A successful load refreshes the cache and emits `resource:loaded`
    /// exactly once, however many callers were coalesced.
    pub async fn load_resource(&self, name: &str) -> Result<ResourceData, SyncError> {
        let loader = self.loaders.get(name).ok_or_else(|| {
            SyncError::ResyncFailure(format!("no loader registered for '{}'", name))
        })?;

        let retry = self.retry.clone();
        let cache = self.cache.clone();
        let events = self.events.clone();
        let resource = name.to_string();

        self.flights
            .run(name, move || async move {
                let value = retry.with_retries(&resource, || loader()).await?;
                let data: ResourceData = Arc::new(value);
                cache.insert(&resource, data.clone());
                events.emit(SyncEvent::ResourceLoaded {
                    resource: resource.clone(),
                });
                Ok(data)
            })
            .await
    }

    /// Run `plan` in `mode`. `on_phase` is called with each phase number
    /// before the phase starts.
    ///
    /// Never returns early with an error: a failing non-tolerated phase
    /// stops the run and is recorded in the report.
    pub async fn run<F>(&self, plan: &ResyncPlan, mode: ResyncMode, on_phase: F) -> ResyncReport
    where
        F: Fn(u8) + Send + Sync,
    {
        let started = Instant::now();
        let mut report = ResyncReport {
            mode,
            loaded: Vec::new(),
            failed: BTreeMap::new(),
            skipped: Vec::new(),
            failed_phase: None,
            success: true,
            duration: Duration::ZERO,
        };

        for phase in plan.phases_for(mode) {
            let (runnable, missing): (Vec<String>, Vec<String>) = phase
                .resources
                .iter()
                .cloned()
                .partition(|name| self.loaders.contains(name));
            for name in missing {
                debug!(resource = %name, phase = phase.number, "No loader registered, skipping");
                report.skipped.push(name);
            }

            on_phase(phase.number);
            self.events.emit(SyncEvent::ResyncPhase {
                phase: phase.number,
                resources: runnable.clone(),
            });
            info!(phase = phase.number, resources = ?runnable, %mode, "Starting resync phase");

            let outcomes = join_all(runnable.iter().map(|name| async move {
                (name.clone(), self.load_resource(name).await)
            }))
            .await;

            let mut phase_failed = false;
            for (name, outcome) in outcomes {
                match outcome {
                    Ok(_) => report.loaded.push(name),
                    Err(error) => {
                        if phase.tolerate_failure {
                            warn!(resource = %name, error = %error, "Optional resource failed, continuing");
                        } else {
                            warn!(resource = %name, phase = phase.number, error = %error, "Resync phase failed");
                            phase_failed = true;
                        }
                        report.failed.insert(name, error.to_string());
                    }
                }
            }

            if phase_failed {
                report.failed_phase = Some(phase.number);
                report.success = false;
                break;
            }

            if mode == ResyncMode::Sequential && !phase.settle_delay.is_zero() {
                tokio::time::sleep(phase.settle_delay).await;
            }
        }

        report.duration = started.elapsed();
        info!(
            %mode,
            success = report.success,
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            duration_ms = report.duration.as_millis() as u64,
            "Resync finished"
        );
        report
    }
}

impl std::fmt::Debug for PhasedResync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhasedResync")
            .field("loaders", &self.loaders)
            .field("cached", &self.cache.len())
            .field("in_flight", &self.flights.in_flight_count())
            .finish()
    }
}
