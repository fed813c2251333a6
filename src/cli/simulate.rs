//! Scripted suspend/resume cycles against the simulated backend.

use super::args::SimulationConfig;
use crate::backend::{BackendClient, Session, SimulatedBackend};
use crate::config::SyncConfig;
use crate::queue::WriteDescriptor;
use crate::resilience::{BreakerSnapshot, SingleFlightStats, SyncError};
use crate::session::{ResumeOutcome, SessionLifecycleCoordinator};
use crate::storage::{FileStore, KeyValueStore, MemoryStore, StorageBackend};
use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

const SIMULATED_USER: &str = "sim-user";

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u32,
    pub outcome: ResumeOutcome,
    pub duration: Duration,
    pub offline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub cycles: Vec<CycleReport>,
    pub writes_applied: usize,
    pub writes_failed: usize,
    pub circuit_breakers: BTreeMap<String, BreakerSnapshot>,
    pub single_flight: SingleFlightStats,
    /// Emitted events by name.
    pub events: BTreeMap<String, usize>,
}

impl SimulationSummary {
    pub fn completed_cycles(&self) -> usize {
        self.cycles
            .iter()
            .filter(|cycle| cycle.outcome == ResumeOutcome::Completed)
            .count()
    }
}

fn open_store(config: &SyncConfig, workspace: &Path) -> Result<Arc<dyn KeyValueStore>> {
    Ok(match config.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::File => {
            Arc::new(FileStore::new(config.storage.resolve_directory(workspace))?)
        }
    })
}

pub async fn run_simulation(
    config: SyncConfig,
    options: &SimulationConfig,
    workspace: &Path,
) -> Result<SimulationSummary> {
    let store = open_store(&config, workspace)?;
    let backend = SimulatedBackend::new();
    let resources = config.resync.resource_names();
    for name in &resources {
        backend.set_resource(name, json!({ "resource": name, "version": 1 }));
    }

    let coordinator = SessionLifecycleCoordinator::new(
        config,
        Arc::new(backend.clone()),
        Arc::new(backend.clone()),
        store,
    );

    let event_counts = Arc::new(Mutex::new(BTreeMap::<String, usize>::new()));
    let counts = event_counts.clone();
    coordinator.on(move |event| {
        debug!(event = event.name(), details = ?event, "Event");
        let mut counts = counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *counts.entry(event.name().to_string()).or_default() += 1;
    });

    for name in resources {
        let backend = backend.clone();
        let failure_rate = options.failure_rate;
        let resource = name.clone();
        coordinator.register_resource_loader(&name, move || {
            let backend = backend.clone();
            let resource = resource.clone();
            let inject = failure_rate > 0.0 && rand::random_bool(failure_rate);
            async move {
                if inject {
                    return Err(SyncError::from_status(
                        503,
                        format!("injected failure loading {}", resource),
                    ));
                }
                backend.fetch(&resource).await
            }
        });
    }

    let writer = backend.clone();
    coordinator.register_write_handler("add_item", move |payload| {
        let backend = writer.clone();
        async move { backend.write("add_item", payload).await }
    });

    coordinator
        .client()
        .set_session(Session::issue(SIMULATED_USER, Duration::from_secs(3600)))
        .await?;
    let restored = coordinator.initialize().await?;
    if !restored.replayed.is_empty() {
        info!(replayed = restored.replayed.len(), "Replayed writes from a previous run");
    }

    let mut pending_writes = Vec::new();
    let mut cycles = Vec::new();

    for cycle in 1..=options.cycles {
        for n in 0..options.writes_per_cycle {
            let descriptor = WriteDescriptor::new("add_item", json!({ "cycle": cycle, "n": n }));
            pending_writes.push(coordinator.enqueue_write(&format!("add_item_{}_{}", cycle, n), descriptor));
        }

        coordinator.on_background().await;
        if options.freeze_on_suspend {
            backend.freeze_existing_clients();
        }
        let offline = options.offline_cycles.contains(&cycle);
        if offline {
            backend.set_online(false);
        }
        tokio::time::sleep(options.suspend).await;

        let started = Instant::now();
        let outcome = coordinator.on_resume().await;
        backend.set_online(true);

        info!(cycle, ?outcome, offline, "Cycle finished");
        cycles.push(CycleReport {
            cycle,
            outcome,
            duration: started.elapsed(),
            offline,
        });
    }

    let results = futures::future::join_all(pending_writes).await;
    let writes_applied = results.iter().filter(|result| result.is_ok()).count();

    let events = event_counts
        .lock()
        .map(|counts| counts.clone())
        .unwrap_or_else(|poisoned| poisoned.into_inner().clone());

    Ok(SimulationSummary {
        cycles,
        writes_applied,
        writes_failed: results.len() - writes_applied,
        circuit_breakers: coordinator.circuit_breaker_states(),
        single_flight: coordinator.single_flight_stats(),
        events,
    })
}
