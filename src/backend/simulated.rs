//! In-memory backend with fault injection.
//!
//! Drives the `resync-sim` binary and the test suite. Handles created by the
//! factory share one server-side state; [`SimulatedBackend::freeze_existing_clients`]
//! makes every handle created so far hang forever, which is what a socket
//! frozen by an OS suspend looks like from the client.

use crate::backend::client::{BackendClient, ClientFactory, ConnectivityMonitor};
use crate::backend::types::Session;
use crate::resilience::SyncError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Key used for scripted probe failures.
pub const PROBE_KEY: &str = "__probe";

#[derive(Debug)]
struct SimulatedState {
    resources: DashMap<String, Value>,
    scripted_failures: Mutex<HashMap<String, VecDeque<SyncError>>>,
    calls: DashMap<String, u64>,
    writes: Mutex<Vec<(String, Value)>>,
    latency_ms: AtomicU64,
    online: AtomicBool,
    refresh_failing: AtomicBool,
    /// Handles with a generation below this value are frozen.
    frozen_below: AtomicU64,
    next_generation: AtomicU64,
    session_ttl_secs: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    state: Arc<SimulatedState>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SimulatedState {
                resources: DashMap::new(),
                scripted_failures: Mutex::new(HashMap::new()),
                calls: DashMap::new(),
                writes: Mutex::new(Vec::new()),
                latency_ms: AtomicU64::new(0),
                online: AtomicBool::new(true),
                refresh_failing: AtomicBool::new(false),
                frozen_below: AtomicU64::new(0),
                next_generation: AtomicU64::new(1),
                session_ttl_secs: AtomicU64::new(3600),
            }),
        }
    }

    pub fn set_resource(&self, name: &str, value: Value) {
        self.state.resources.insert(name.to_string(), value);
    }

    /// Fail the next `times` calls for `key` with `error`.
    pub fn fail_next(&self, key: &str, error: SyncError, times: usize) {
        let mut failures = self
            .state
            .scripted_failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let queue = failures.entry(key.to_string()).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_online(&self, online: bool) {
        self.state.online.store(online, Ordering::SeqCst);
    }

    pub fn set_refresh_failing(&self, failing: bool) {
        self.state.refresh_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_session_ttl(&self, ttl: Duration) {
        self.state
            .session_ttl_secs
            .store(ttl.as_secs(), Ordering::SeqCst);
    }

    /// Every handle created before this call hangs on every operation.
    pub fn freeze_existing_clients(&self) {
        let current = self.state.next_generation.load(Ordering::SeqCst);
        self.state.frozen_below.store(current, Ordering::SeqCst);
    }

    pub fn call_count(&self, key: &str) -> u64 {
        self.state.calls.get(key).map(|count| *count).unwrap_or(0)
    }

    pub fn writes(&self) -> Vec<(String, Value)> {
        self.state
            .writes
            .lock()
            .map(|writes| writes.clone())
            .unwrap_or_default()
    }

    /// Build a concrete handle; the factory impl returns it type-erased.
    pub fn client(&self) -> Arc<SimulatedClient> {
        let generation = self.state.next_generation.fetch_add(1, Ordering::SeqCst);
        Arc::new(SimulatedClient {
            id: Uuid::new_v4(),
            generation,
            session: Mutex::new(None),
            state: self.state.clone(),
        })
    }

    /// Read a resource the way a data-layer loader would.
    pub async fn fetch(&self, name: &str) -> Result<Value, SyncError> {
        self.state.simulate_call(name).await?;
        self.state
            .resources
            .get(name)
            .map(|value| value.clone())
            .ok_or_else(|| SyncError::from_status(404, format!("resource '{}' not found", name)))
    }

    /// Apply a write the way a data-layer mutation would.
    pub async fn write(&self, kind: &str, payload: Value) -> Result<Value, SyncError> {
        self.state.simulate_call(kind).await?;
        let mut writes = self
            .state
            .writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writes.push((kind.to_string(), payload.clone()));
        Ok(serde_json::json!({ "kind": kind, "accepted": payload }))
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedState {
    async fn simulate_call(&self, key: &str) -> Result<(), SyncError> {
        *self.calls.entry(key.to_string()).or_insert(0) += 1;

        if !self.online.load(Ordering::SeqCst) {
            return Err(SyncError::Network("network unreachable".to_string()));
        }

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let scripted = self
            .scripted_failures
            .lock()
            .ok()
            .and_then(|mut failures| failures.get_mut(key).and_then(|queue| queue.pop_front()));
        match scripted {
            Some(error) => {
                debug!(key, error = %error, "Injected failure");
                Err(error)
            }
            None => Ok(()),
        }
    }
}

impl ClientFactory for SimulatedBackend {
    fn create_client(&self) -> Arc<dyn BackendClient> {
        self.client()
    }
}

#[async_trait]
impl ConnectivityMonitor for SimulatedBackend {
    async fn is_connected(&self) -> bool {
        self.state.online.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct SimulatedClient {
    id: Uuid,
    generation: u64,
    session: Mutex<Option<Session>>,
    state: Arc<SimulatedState>,
}

impl SimulatedClient {
    fn is_frozen(&self) -> bool {
        self.generation < self.state.frozen_below.load(Ordering::SeqCst)
    }

    async fn hang_if_frozen(&self) {
        if self.is_frozen() {
            futures::future::pending::<()>().await;
        }
    }

    fn current_session(&self) -> Option<Session> {
        self.session
            .lock()
            .map(|session| session.clone())
            .unwrap_or(None)
    }

    fn store_session(&self, session: Option<Session>) {
        let mut slot = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = session;
    }
}

#[async_trait]
impl BackendClient for SimulatedClient {
    fn client_id(&self) -> Uuid {
        self.id
    }

    async fn get_session(&self) -> Result<Option<Session>, SyncError> {
        self.hang_if_frozen().await;
        Ok(self.current_session())
    }

    async fn set_session(&self, session: Session) -> Result<Session, SyncError> {
        self.hang_if_frozen().await;
        if session.is_expired() {
            return Err(SyncError::SessionInvalid("session already expired".to_string()));
        }
        self.store_session(Some(session.clone()));
        Ok(session)
    }

    async fn refresh_session(&self) -> Result<Session, SyncError> {
        self.hang_if_frozen().await;
        self.state.simulate_call("__refresh").await?;

        if self.state.refresh_failing.load(Ordering::SeqCst) {
            return Err(SyncError::SessionInvalid("refresh token rejected".to_string()));
        }
        let current = self
            .current_session()
            .ok_or_else(|| SyncError::SessionInvalid("no session to refresh".to_string()))?;

        let ttl = Duration::from_secs(self.state.session_ttl_secs.load(Ordering::SeqCst));
        let refreshed = Session::issue(current.user_id, ttl);
        self.store_session(Some(refreshed.clone()));
        Ok(refreshed)
    }

    async fn probe(&self) -> Result<(), SyncError> {
        self.hang_if_frozen().await;
        self.state.simulate_call(PROBE_KEY).await
    }

    fn has_realtime_client(&self) -> bool {
        !self.is_frozen()
    }
}
