//! Request coalescing keyed by resource name.
//!
//! ```text
//! caller A ─┐
//! caller B ─┼──► SingleFlight ──► CircuitBreakerRegistry ──► operation (once)
//! caller C ─┘         │
//!                     └── all callers receive the same Result
//! ```
//!
//! The in-flight entry is removed as soon as the shared future settles, so
//! the next call for the same key starts a fresh operation.

use crate::resilience::circuit_breaker::CircuitBreakerRegistry;
use crate::resilience::types::SyncError;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

type SharedResult<T> = Shared<BoxFuture<'static, Result<T, SyncError>>>;

struct InFlight<T: Clone> {
    generation: u64,
    future: SharedResult<T>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SingleFlightStats {
    pub total_requests: u64,
    pub coalesced_requests: u64,
    pub new_requests: u64,
}

impl SingleFlightStats {
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.coalesced_requests as f64 / self.total_requests as f64
        }
    }
}

pub struct SingleFlight<T: Clone> {
    in_flight: Arc<Mutex<HashMap<String, InFlight<T>>>>,
    breakers: Arc<CircuitBreakerRegistry>,
    next_generation: AtomicU64,
    stats: Mutex<SingleFlightStats>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            breakers,
            next_generation: AtomicU64::new(1),
            stats: Mutex::new(SingleFlightStats::default()),
        }
    }

    /// Join the pending call for `key`, or start `operation` through the
    /// circuit breaker for `key` if none is pending.
    pub async fn run<F, Fut>(&self, key: &str, operation: F) -> Result<T, SyncError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        let shared = {
            let mut in_flight = self
                .in_flight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            if let Some(existing) = in_flight.get(key) {
                self.record(true);
                debug!(key, "Joining in-flight request");
                existing.future.clone()
            } else {
                self.record(false);
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let future = self.start(key.to_string(), generation, operation);
                in_flight.insert(
                    key.to_string(),
                    InFlight {
                        generation,
                        future: future.clone(),
                    },
                );
                future
            }
        };

        shared.await
    }

    fn start<F, Fut>(&self, key: String, generation: u64, operation: F) -> SharedResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        let breakers = self.breakers.clone();
        let in_flight = self.in_flight.clone();

        async move {
            let result = breakers.execute(&key, operation).await;

            let mut in_flight = in_flight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if in_flight
                .get(&key)
                .is_some_and(|entry| entry.generation == generation)
            {
                in_flight.remove(&key);
            }

            result
        }
        .boxed()
        .shared()
    }

    fn record(&self, coalesced: bool) {
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        stats.total_requests += 1;
        if coalesced {
            stats.coalesced_requests += 1;
        } else {
            stats.new_requests += 1;
        }
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight
            .lock()
            .map(|in_flight| in_flight.contains_key(key))
            .unwrap_or(false)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .map(|in_flight| in_flight.len())
            .unwrap_or(0)
    }

    /// Drop every pending entry. Callers already awaiting keep their
    /// futures; new callers start fresh operations.
    pub fn clear(&self) -> usize {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = in_flight.len();
        in_flight.clear();
        count
    }

    pub fn stats(&self) -> SingleFlightStats {
        self.stats
            .lock()
            .map(|stats| *stats)
            .unwrap_or_default()
    }
}
