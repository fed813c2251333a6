use crate::env::resources;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Payload produced by a resource loader, shared between coalesced callers.
pub type ResourceData = Arc<serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResyncMode {
    /// One phase at a time with settle delays. Used after a resume, when the
    /// connection may just have thawed.
    Sequential,
    /// Phases 1 and 2 merged and loaded together. Used when the connection
    /// is presumed healthy.
    Parallel,
}

impl std::fmt::Display for ResyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
        }
    }
}

/// One priority tier of a resync. Resources inside a phase load in parallel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResyncPhase {
    pub number: u8,
    pub resources: Vec<String>,
    /// Failures in this phase are logged but do not fail the resync.
    #[serde(default)]
    pub tolerate_failure: bool,
    /// Pause after the phase completes, sequential mode only.
    #[serde(default)]
    pub settle_delay: Duration,
}

impl ResyncPhase {
    pub fn new(number: u8, resources: &[&str]) -> Self {
        Self {
            number,
            resources: resources.iter().map(|r| r.to_string()).collect(),
            tolerate_failure: false,
            settle_delay: Duration::ZERO,
        }
    }

    pub fn tolerating_failure(mut self) -> Self {
        self.tolerate_failure = true;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}

/// Ordered phase membership by resource name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResyncPlan {
    pub phases: Vec<ResyncPhase>,
}

impl ResyncPlan {
    pub fn new(phases: Vec<ResyncPhase>) -> Self {
        Self { phases }
    }

    pub fn phases_for(&self, mode: ResyncMode) -> Vec<ResyncPhase> {
        match mode {
            ResyncMode::Sequential => self.phases.clone(),
            ResyncMode::Parallel => self.parallel_phases(),
        }
    }

    /// The first two phases merged into one, settle delays dropped.
    pub fn parallel_phases(&self) -> Vec<ResyncPhase> {
        let mut phases = self.phases.iter();
        let mut merged: Option<ResyncPhase> = None;

        for phase in phases.by_ref().take(2) {
            match merged.as_mut() {
                Some(combined) => {
                    combined.resources.extend(phase.resources.iter().cloned());
                    combined.tolerate_failure &= phase.tolerate_failure;
                }
                None => merged = Some(phase.clone()),
            }
        }

        merged
            .into_iter()
            .chain(phases.cloned())
            .map(|mut phase| {
                phase.settle_delay = Duration::ZERO;
                phase
            })
            .collect()
    }

    pub fn resource_names(&self) -> Vec<String> {
        self.phases
            .iter()
            .flat_map(|phase| phase.resources.iter().cloned())
            .collect()
    }
}

impl Default for ResyncPlan {
    fn default() -> Self {
        Self::new(vec![
            ResyncPhase::new(1, &[resources::PROFILE])
                .with_settle_delay(Duration::from_millis(500)),
            ResyncPhase::new(2, &[resources::PRIMARY_AGGREGATE])
                .with_settle_delay(Duration::from_millis(300)),
            ResyncPhase::new(3, &[resources::COLLECTION_A, resources::COLLECTION_B]),
            ResyncPhase::new(4, &[resources::COLLECTION_C]).tolerating_failure(),
        ])
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResyncReport {
    pub mode: ResyncMode,
    pub loaded: Vec<String>,
    /// Resource name to error message.
    pub failed: BTreeMap<String, String>,
    /// Resources in the plan with no registered loader.
    pub skipped: Vec<String>,
    /// First non-tolerated phase that failed; later phases did not run.
    pub failed_phase: Option<u8>,
    pub success: bool,
    pub duration: Duration,
}

impl ResyncReport {
    pub fn failed_names(&self) -> Vec<String> {
        self.failed.keys().cloned().collect()
    }
}

/// Last-known-good copy of a resource.
#[derive(Debug, Clone)]
pub struct CachedResource {
    pub data: ResourceData,
    pub loaded_at: DateTime<Utc>,
}
