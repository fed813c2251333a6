//! Top-level orchestration of suspend, resume and resync.
//!
//! ```text
//! Idle -> ResumePending -> RecoveringConnection -> CheckingSession
//!      -> Resyncing(1..4) -> DrainingWriteQueue -> Idle
//! Background (entered on suspend, outside the resume machine)
//! ```
//!
//! The resume routine never propagates an error to the lifecycle callback.
//! Whatever fails, the lock is released within the safety timeout and the
//! data layer keeps serving the last-known-good cache.

use crate::backend::{BackendClient, ClientFactory, ConnectivityMonitor, Session};
use crate::config::SyncConfig;
use crate::env::resources::GLOBAL_RESYNC_KEY;
use crate::events::{EventBus, ListenerId, SyncEvent};
use crate::queue::{RestoreReport, WriteDescriptor, WriteQueue, WriteQueueStatus};
use crate::resilience::{
    BreakerSnapshot, CircuitBreakerRegistry, RetryExecutor, SingleFlight, SingleFlightStats,
    SyncError, with_timeout,
};
use crate::resync::{
    CachedResource, PhasedResync, ResourceCache, ResourceData, ResourceLoaderRegistry,
    ResyncMode, ResyncPlan, ResyncReport,
};
use crate::session::lock::{LockStatus, RefreshLock};
use crate::session::recovery::{ConnectionRecoveryManager, StateSnapshot};
use crate::storage::KeyValueStore;
use futures::future::{AbortHandle, Abortable};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Resume signals closer together than this collapse into one.
    pub resume_debounce: Duration,
    /// Hard upper bound on how long the refresh lock can be held.
    pub lock_safety_timeout: Duration,
    pub deferred_retry_delay: Duration,
    /// Sessions expiring within this window are refreshed.
    pub refresh_window: Duration,
    pub recovery_grace: Duration,
    pub token_refresh_timeout: Duration,
    pub health_check_attempts: u32,
    pub health_check_backoff: Duration,
    pub health_check_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            resume_debounce: Duration::from_millis(2000),
            lock_safety_timeout: Duration::from_secs(15),
            deferred_retry_delay: Duration::from_secs(5),
            refresh_window: Duration::from_secs(600),
            recovery_grace: Duration::from_secs(60),
            token_refresh_timeout: Duration::from_secs(8),
            health_check_attempts: 3,
            health_check_backoff: Duration::from_secs(2),
            health_check_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "phase", rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Background,
    ResumePending,
    RecoveringConnection,
    CheckingSession,
    Resyncing(u8),
    DrainingWriteQueue,
}

/// What a resume signal ended up doing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ResumeOutcome {
    /// Within the debounce window of the previous resume.
    Debounced,
    /// A resume or resync already holds the lock.
    AlreadyInProgress,
    Completed,
    /// Session could not be validated; cached data is served.
    SessionStale,
    /// Connection could not be established; cached data is served.
    ConnectionDelayed,
    /// Cancelled by a background transition.
    Aborted,
    /// Resync failed or timed out; a deferred retry is scheduled.
    Fallback(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionCheck {
    pub session_valid: bool,
    pub was_refreshed: bool,
}

pub struct SessionLifecycleCoordinator {
    config: CoordinatorConfig,
    plan: ResyncPlan,
    events: Arc<EventBus>,
    breakers: Arc<CircuitBreakerRegistry>,
    loads: Arc<SingleFlight<ResourceData>>,
    resyncs: SingleFlight<Option<ResyncReport>>,
    runner: PhasedResync,
    write_queue: WriteQueue,
    recovery: ConnectionRecoveryManager,
    store: Arc<dyn KeyValueStore>,
    client: RwLock<Arc<dyn BackendClient>>,
    lock: RefreshLock,
    state: Mutex<LifecycleState>,
    last_resume: Mutex<Option<Instant>>,
    resume_in_progress: Arc<AtomicBool>,
    snapshot_before: Mutex<Option<StateSnapshot>>,
    cancellables: Mutex<HashMap<u64, AbortHandle>>,
    next_cancellable: AtomicU64,
    deferred_retry: Mutex<Option<JoinHandle<()>>>,
    initialized: AtomicBool,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SessionLifecycleCoordinator {
    pub fn new(
        config: SyncConfig,
        factory: Arc<dyn ClientFactory>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        store: Arc<dyn KeyValueStore>,
    ) -> Arc<Self> {
        let events = Arc::new(EventBus::new());
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            config.circuit_breaker.clone(),
            events.clone(),
        ));
        let loads = Arc::new(SingleFlight::new(breakers.clone()));
        let runner = PhasedResync::new(
            Arc::new(ResourceLoaderRegistry::new()),
            loads.clone(),
            RetryExecutor::new(config.read_retry.clone()),
            Arc::new(ResourceCache::new()),
            events.clone(),
        );
        let write_queue = WriteQueue::new(config.write_retry.clone(), events.clone());
        let client = factory.create_client();
        let recovery = ConnectionRecoveryManager::new(
            config.recovery.clone(),
            factory,
            connectivity,
            store.clone(),
        );

        Arc::new(Self {
            config: config.coordinator,
            plan: config.resync,
            events,
            resyncs: SingleFlight::new(breakers.clone()),
            breakers,
            loads,
            runner,
            write_queue,
            recovery,
            store,
            client: RwLock::new(client),
            lock: RefreshLock::new(),
            state: Mutex::new(LifecycleState::Idle),
            last_resume: Mutex::new(None),
            resume_in_progress: Arc::new(AtomicBool::new(false)),
            snapshot_before: Mutex::new(None),
            cancellables: Mutex::new(HashMap::new()),
            next_cancellable: AtomicU64::new(1),
            deferred_retry: Mutex::new(None),
            initialized: AtomicBool::new(false),
        })
    }

    /// Restore writes left by a previous process, reattach a stored session
    /// to a handle that has none, and announce readiness.
    pub async fn initialize(&self) -> Result<RestoreReport, SyncError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("Coordinator already initialized");
            return Ok(RestoreReport::default());
        }

        let report = self.write_queue.restore(self.store.as_ref()).await?;

        let client = self.client();
        let mut session = with_timeout(self.config.token_refresh_timeout, client.get_session())
            .await
            .ok()
            .flatten();
        if session.is_none()
            && let Some(stored) = self.recovery.load_stored_session().await
            && stored.is_valid_for(self.config.recovery_grace)
        {
            match with_timeout(self.config.token_refresh_timeout, client.set_session(stored)).await {
                Ok(restored) => session = Some(restored),
                Err(error) => warn!(error = %error, "Could not reattach stored session"),
            }
        }

        info!(
            replayed_writes = report.replayed.len(),
            has_session = session.is_some(),
            "Coordinator initialized"
        );
        self.events.emit(SyncEvent::ManagerInitialized);
        if let Some(session) = session {
            self.events.emit(SyncEvent::SessionActive {
                user_id: session.user_id,
            });
        }
        Ok(report)
    }

    /// Suspend routine: snapshot, persist the session, cancel reads,
    /// persist write bookkeeping. Writes keep running.
    pub async fn on_background(&self) {
        info!("App moved to background");
        let client = self.client();

        let snapshot = self.recovery.capture_snapshot("before_suspend", &client).await;
        *locked(&self.snapshot_before) = Some(snapshot);

        match with_timeout(self.recovery.config.probe_timeout, client.get_session()).await {
            Ok(Some(session)) => {
                if let Err(error) = self.recovery.persist_session(&session).await {
                    warn!(error = %error, "Failed to persist session before suspend");
                }
            }
            Ok(None) => debug!("No session to persist"),
            Err(error) => warn!(error = %error, "Could not read session before suspend"),
        }

        let aborted = self.abort_cancellables();
        let cleared = self.loads.clear() + self.resyncs.clear();
        if let Some(deferred) = locked(&self.deferred_retry).take() {
            deferred.abort();
        }
        debug!(aborted, cleared, "Cancelled in-flight reads");

        match self.write_queue.persist(self.store.as_ref()).await {
            Ok(count) => debug!(count, "Write queue persisted"),
            Err(error) => error!(error = %error, "Failed to persist write queue"),
        }

        self.set_state(LifecycleState::Background);
        self.events.emit(SyncEvent::AppBackground);
    }

    /// Resume routine. Never fails; see [`ResumeOutcome`].
    pub async fn on_resume(self: &Arc<Self>) -> ResumeOutcome {
        let now = Instant::now();
        {
            let mut last = locked(&self.last_resume);
            if let Some(previous) = *last
                && now.duration_since(previous) < self.config.resume_debounce
            {
                debug!(
                    since_ms = now.duration_since(previous).as_millis() as u64,
                    "Resume debounced"
                );
                return ResumeOutcome::Debounced;
            }
            *last = Some(now);
        }

        if self.resume_in_progress.load(Ordering::SeqCst) {
            debug!("Resume already running");
            return ResumeOutcome::AlreadyInProgress;
        }
        let Some(guard) = self.lock.try_acquire("app_resume") else {
            return ResumeOutcome::AlreadyInProgress;
        };
        self.resume_in_progress.store(true, Ordering::SeqCst);
        self.set_state(LifecycleState::ResumePending);
        info!("App resumed, starting recovery");

        let watchdog = self.arm_watchdog(guard.token());

        let outcome = match tokio::time::timeout(self.config.lock_safety_timeout, self.resume_steps())
            .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(error)) if error.is_aborted() => {
                info!("Resume cancelled by background transition");
                ResumeOutcome::Aborted
            }
            Ok(Err(error)) => {
                warn!(error = %error, "Resync failed during resume");
                self.fallback("resync_failed")
            }
            Err(_) => self.fallback("timeout"),
        };

        if outcome != ResumeOutcome::Aborted {
            self.set_state(LifecycleState::DrainingWriteQueue);
            match self.write_queue.restore(self.store.as_ref()).await {
                Ok(report) => debug!(?report, "Write queue restored"),
                Err(error) => warn!(error = %error, "Write queue restore failed"),
            }
        }

        watchdog.abort();
        drop(guard);
        self.resume_in_progress.store(false, Ordering::SeqCst);
        if *locked(&self.state) != LifecycleState::Background {
            self.set_state(LifecycleState::Idle);
        }

        let duration = now.elapsed();
        info!(?outcome, duration_ms = duration.as_millis() as u64, "Resume finished");
        self.events.emit(SyncEvent::SessionResumed {
            duration,
            resynced: outcome == ResumeOutcome::Completed,
        });
        outcome
    }

    fn arm_watchdog(self: &Arc<Self>, token: u64) -> JoinHandle<()> {
        let lock = self.lock.clone();
        let in_progress = self.resume_in_progress.clone();
        let safety = self.config.lock_safety_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(safety).await;
            if lock.force_release(token) {
                in_progress.store(false, Ordering::SeqCst);
            }
        })
    }

    async fn resume_steps(self: &Arc<Self>) -> Result<ResumeOutcome, SyncError> {
        let reopened = self.breakers.reset_open_to_half_open();
        if reopened > 0 {
            info!(reopened, "Open circuit breakers moved to half-open");
        }

        self.set_state(LifecycleState::RecoveringConnection);
        let client = self.client();
        let after = self.recovery.capture_snapshot("after_resume", &client).await;
        let before = locked(&self.snapshot_before).take();
        let degradation = before.map(|before| self.recovery.compare(&before, &after));

        let recovery = self.recovery.recover(client, degradation.as_ref()).await;
        if recovery.recovered {
            self.set_client(recovery.client);
        }

        self.set_state(LifecycleState::CheckingSession);
        if !self.ensure_session().await.session_valid {
            return Ok(ResumeOutcome::SessionStale);
        }

        if !self.wait_for_connection().await {
            self.events.emit(SyncEvent::ResyncDelayed {
                reason: "connection_unavailable".to_string(),
            });
            return Ok(ResumeOutcome::ConnectionDelayed);
        }

        self.events.emit(SyncEvent::ResyncStart {
            reason: "app_resume".to_string(),
            mode: ResyncMode::Sequential,
        });
        let report = self.run_resync(ResyncMode::Sequential).await?;
        if !report.success {
            return Err(SyncError::ResyncFailure(format!(
                "phase {} failed: {}",
                report.failed_phase.unwrap_or_default(),
                report.failed_names().join(", ")
            )));
        }
        Ok(ResumeOutcome::Completed)
    }

    fn fallback(self: &Arc<Self>, reason: &str) -> ResumeOutcome {
        warn!(reason, "Resume fell back to cached data");
        self.events.emit(SyncEvent::ResyncFallback {
            reason: reason.to_string(),
        });
        self.schedule_deferred_retry();
        ResumeOutcome::Fallback(reason.to_string())
    }

    /// One best-effort resync after the deferred retry delay, replacing any
    /// retry already pending.
    fn schedule_deferred_retry(self: &Arc<Self>) {
        let this = self.clone();
        let delay = self.config.deferred_retry_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match this.request_resync("deferred_retry").await {
                Ok(report) => info!(loaded = report.loaded.len(), "Deferred resync succeeded"),
                Err(error) => warn!(error = %error, "Deferred resync failed"),
            }
        });
        if let Some(previous) = locked(&self.deferred_retry).replace(handle) {
            previous.abort();
        }
    }

    /// Validate the current session, refreshing it when it expires within
    /// the refresh window. Emits `session:validated` or `session:stale`.
    pub async fn ensure_session(&self) -> SessionCheck {
        let client = self.client();
        let session = match with_timeout(self.config.token_refresh_timeout, client.get_session()).await {
            Ok(session) => session,
            Err(error) => {
                warn!(error = %error, "Could not read current session");
                None
            }
        };

        let Some(session) = session else {
            self.events.emit(SyncEvent::SessionStale {
                reason: "no_session".to_string(),
            });
            return SessionCheck {
                session_valid: false,
                was_refreshed: false,
            };
        };

        if session.is_valid_for(self.config.refresh_window) {
            self.events.emit(SyncEvent::SessionValidated {
                was_refreshed: false,
            });
            return SessionCheck {
                session_valid: true,
                was_refreshed: false,
            };
        }

        debug!(
            seconds_remaining = session.seconds_remaining(),
            "Session near expiry, refreshing"
        );
        match with_timeout(self.config.token_refresh_timeout, client.refresh_session()).await {
            Ok(refreshed) => {
                self.remember_session(&refreshed).await;
                self.events.emit(SyncEvent::SessionValidated {
                    was_refreshed: true,
                });
                SessionCheck {
                    session_valid: true,
                    was_refreshed: true,
                }
            }
            Err(error) => {
                warn!(error = %error, "Session refresh failed");
                self.events.emit(SyncEvent::SessionStale {
                    reason: error.to_string(),
                });
                SessionCheck {
                    session_valid: false,
                    was_refreshed: false,
                }
            }
        }
    }

    async fn remember_session(&self, session: &Session) {
        if let Err(error) = self.recovery.persist_session(session).await {
            warn!(error = %error, "Failed to persist refreshed session");
        }
    }

    /// Stability wait, best-effort token refresh, then health checks with
    /// backoff. The handle is recreated once after the first failed check.
    async fn wait_for_connection(&self) -> bool {
        if !self.recovery.wait_for_network_stability().await {
            warn!("Network unstable, proceeding with caution");
        }

        let mut client = self.client();
        match with_timeout(self.config.token_refresh_timeout, client.refresh_session()).await {
            Ok(session) => self.remember_session(&session).await,
            Err(error) => debug!(error = %error, "Token refresh before health check failed"),
        }

        let mut recreated = false;
        let attempts = self.config.health_check_attempts.max(1);
        for attempt in 1..=attempts {
            let check = self
                .recovery
                .ensure_connection_healthy(&client, self.config.health_check_timeout)
                .await;
            if check.healthy {
                if attempt > 1 {
                    self.breakers.reset_all();
                }
                return true;
            }
            warn!(attempt, error = ?check.error, "Health check failed");

            if !recreated {
                recreated = true;
                let session = with_timeout(self.recovery.config.probe_timeout, client.get_session())
                    .await
                    .ok()
                    .flatten();
                let session = match session {
                    Some(session) => Some(session),
                    None => self.recovery.load_stored_session().await,
                };
                client = self.recovery.recreate_client(session).await;
                self.set_client(client.clone());

                let retry = self
                    .recovery
                    .ensure_connection_healthy(&client, self.config.health_check_timeout)
                    .await;
                if retry.healthy {
                    self.breakers.reset_all();
                    return true;
                }
            }

            if attempt < attempts {
                let delay = self
                    .config
                    .health_check_backoff
                    .saturating_mul(2u32.saturating_pow(attempt - 1));
                tokio::time::sleep(delay).await;
            }
        }
        false
    }

    /// Resync on behalf of an ordinary trigger (pull to refresh, event).
    /// Concurrent requests share one run. Fails with `ResyncInProgress`
    /// while a resume holds the lock.
    ///
    /// The run is spawned, so a caller that stops waiting does not leave
    /// the refresh lock held.
    pub async fn request_resync(self: &Arc<Self>, reason: &str) -> Result<ResyncReport, SyncError> {
        let this = self.clone();
        let reason = reason.to_string();
        let task = tokio::spawn(async move {
            let runner = this.clone();
            this.resyncs
                .run(GLOBAL_RESYNC_KEY, move || async move {
                    runner.run_requested_resync(&reason).await
                })
                .await
        });
        let report = match task.await {
            Ok(result) => result?,
            Err(error) if error.is_cancelled() => return Err(SyncError::Aborted),
            Err(error) => {
                error!(error = %error, "Resync task panicked");
                return Err(SyncError::ResyncFailure("resync task panicked".to_string()));
            }
        };

        match report {
            Some(report) if report.success => Ok(report),
            Some(report) => Err(SyncError::ResyncFailure(format!(
                "failed resources: {}",
                report.failed_names().join(", ")
            ))),
            None => Err(SyncError::ResyncInProgress),
        }
    }

    async fn run_requested_resync(
        self: &Arc<Self>,
        reason: &str,
    ) -> Result<Option<ResyncReport>, SyncError> {
        let Some(guard) = self.lock.try_acquire(reason) else {
            return Ok(None);
        };
        let watchdog = self.arm_watchdog(guard.token());

        self.events.emit(SyncEvent::ResyncStart {
            reason: reason.to_string(),
            mode: ResyncMode::Parallel,
        });
        let result = tokio::time::timeout(
            self.config.lock_safety_timeout,
            self.run_resync(ResyncMode::Parallel),
        )
        .await;
        watchdog.abort();
        drop(guard);

        {
            let mut state = locked(&self.state);
            if matches!(*state, LifecycleState::Resyncing(_)) {
                *state = LifecycleState::Idle;
            }
        }

        match result {
            Ok(Ok(report)) => Ok(Some(report)),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(SyncError::Timeout(self.config.lock_safety_timeout)),
        }
    }

    /// Run the plan as a cancellable read, then report it.
    async fn run_resync(&self, mode: ResyncMode) -> Result<ResyncReport, SyncError> {
        let report = self
            .cancellable(
                self.runner
                    .run(&self.plan, mode, |phase| self.set_state(LifecycleState::Resyncing(phase))),
            )
            .await?;

        self.events.emit(SyncEvent::ResyncComplete {
            success: report.success,
            loaded: report.loaded.clone(),
            failed: report.failed_names(),
        });
        if report.success {
            self.breakers.reset_all();
        }
        Ok(report)
    }

    /// Load a single resource for an ordinary refresh. Returns `Ok(None)`
    /// without loading while a resync holds the lock.
    pub async fn refresh_resource(&self, name: &str) -> Result<Option<ResourceData>, SyncError> {
        if self.lock.is_locked() {
            debug!(resource = name, "Resync in progress, skipping refresh");
            return Ok(None);
        }
        self.cancellable(self.runner.load_resource(name))
            .await?
            .map(Some)
    }

    /// Register `future` so a background transition can abort it.
    async fn cancellable<F: Future>(&self, future: F) -> Result<F::Output, SyncError> {
        let (handle, registration) = AbortHandle::new_pair();
        let id = self.next_cancellable.fetch_add(1, Ordering::Relaxed);
        locked(&self.cancellables).insert(id, handle);

        let result = Abortable::new(future, registration).await;
        locked(&self.cancellables).remove(&id);
        Ok(result?)
    }

    fn abort_cancellables(&self) -> usize {
        let handles: Vec<AbortHandle> = locked(&self.cancellables).drain().map(|(_, h)| h).collect();
        for handle in &handles {
            handle.abort();
        }
        handles.len()
    }

    /// Wait for any running resync to release the lock.
    pub async fn wait_for_resync(&self, timeout: Duration) -> bool {
        self.lock.wait_until_released(timeout).await
    }

    pub fn is_resync_in_progress(&self) -> bool {
        self.lock.is_locked() || self.resume_in_progress.load(Ordering::SeqCst)
    }

    fn set_state(&self, next: LifecycleState) {
        let mut state = locked(&self.state);
        if *state != next {
            debug!(from = ?*state, to = ?next, "Lifecycle transition");
            *state = next;
        }
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        *locked(&self.state)
    }

    pub fn client(&self) -> Arc<dyn BackendClient> {
        self.client
            .read()
            .map(|client| client.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn set_client(&self, client: Arc<dyn BackendClient>) {
        info!(client_id = %client.client_id(), "Adopting transport handle");
        let mut slot = self
            .client
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = client;
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.events.on(listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.events.off(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn register_resource_loader<F, Fut>(&self, name: &str, loader: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, SyncError>> + Send + 'static,
    {
        self.runner.loaders().register(name, loader);
    }

    pub fn register_write_handler<F, Fut>(&self, kind: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, SyncError>> + Send + 'static,
    {
        self.write_queue.handlers().register(kind, handler);
    }

    pub fn enqueue<T, F, Fut>(
        &self,
        id: &str,
        operation: F,
    ) -> impl Future<Output = Result<T, SyncError>> + Send + 'static
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        self.write_queue.enqueue(id, operation)
    }

    pub fn enqueue_write(
        &self,
        id: &str,
        descriptor: WriteDescriptor,
    ) -> impl Future<Output = Result<Value, SyncError>> + Send + 'static {
        self.write_queue.enqueue_write(id, descriptor)
    }

    pub fn cached(&self, name: &str) -> Option<CachedResource> {
        self.runner.cache().get(name)
    }

    pub fn circuit_breaker_states(&self) -> BTreeMap<String, BreakerSnapshot> {
        self.breakers.snapshot()
    }

    pub fn write_queue_status(&self) -> WriteQueueStatus {
        self.write_queue.status()
    }

    pub fn write_queue(&self) -> &WriteQueue {
        &self.write_queue
    }

    pub fn lock_status(&self) -> LockStatus {
        self.lock.status()
    }

    pub fn single_flight_stats(&self) -> SingleFlightStats {
        self.loads.stats()
    }

    pub fn plan(&self) -> &ResyncPlan {
        &self.plan
    }
}

impl std::fmt::Debug for SessionLifecycleCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLifecycleCoordinator")
            .field("state", &self.lifecycle_state())
            .field("lock", &self.lock_status())
            .field("write_queue", &self.write_queue)
            .finish()
    }
}
