use serde_json::{Value, json};
use session_resync::backend::{Session, SessionRecoveryRecord};
use session_resync::env::keys::SESSION_RECOVERY_KEY;
use session_resync::session::{RecoveryConfig, RecoveryMethod};
use session_resync::storage::save_json;
use session_resync::{
    BackendClient, ConnectionRecoveryManager, MemoryStore, ResumeOutcome,
    SessionLifecycleCoordinator, SimulatedBackend, SyncConfig, SyncError, SyncEvent,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

type Timeline = Arc<Mutex<HashMap<String, (Instant, Instant)>>>;

async fn signed_in_coordinator(backend: &SimulatedBackend) -> Arc<SessionLifecycleCoordinator> {
    let coordinator = SessionLifecycleCoordinator::new(
        SyncConfig::default(),
        Arc::new(backend.clone()),
        Arc::new(backend.clone()),
        Arc::new(MemoryStore::new()),
    );
    coordinator
        .client()
        .set_session(Session::issue("user-1", Duration::from_secs(3600)))
        .await
        .expect("Should attach session");
    coordinator
}

/// Register a loader per resource that takes 100ms and records when it ran.
fn register_timed_loaders(coordinator: &SessionLifecycleCoordinator, timeline: &Timeline) {
    for name in coordinator.plan().resource_names() {
        let timeline = timeline.clone();
        let resource = name.clone();
        coordinator.register_resource_loader(&name, move || {
            let timeline = timeline.clone();
            let resource = resource.clone();
            async move {
                let started = Instant::now();
                tokio::time::sleep(Duration::from_millis(100)).await;
                timeline
                    .lock()
                    .unwrap()
                    .insert(resource.clone(), (started, Instant::now()));
                Ok(json!({ "resource": resource }))
            }
        });
    }
}

#[tokio::test(start_paused = true)]
async fn test_resume_loads_phases_in_order() {
    let backend = SimulatedBackend::new();
    let coordinator = signed_in_coordinator(&backend).await;
    let timeline: Timeline = Arc::new(Mutex::new(HashMap::new()));
    register_timed_loaders(&coordinator, &timeline);

    assert_eq!(coordinator.on_resume().await, ResumeOutcome::Completed);

    let timeline = timeline.lock().unwrap();
    let (profile_start, profile_end) = timeline["profile"];
    let (aggregate_start, aggregate_end) = timeline["primaryAggregate"];
    let (a_start, a_end) = timeline["collectionA"];
    let (b_start, b_end) = timeline["collectionB"];
    let (c_start, _) = timeline["collectionC"];

    assert!(profile_start < aggregate_start);
    assert!(aggregate_start - profile_end >= Duration::from_millis(500));
    assert!(a_start - aggregate_end >= Duration::from_millis(300));
    // Phase 3 resources overlap.
    assert!(a_start < b_end && b_start < a_end);
    assert!(c_start >= a_end.max(b_end));
}

#[tokio::test(start_paused = true)]
async fn test_two_resume_signals_within_debounce_run_once() {
    let backend = SimulatedBackend::new();
    let coordinator = signed_in_coordinator(&backend).await;
    let timeline: Timeline = Arc::new(Mutex::new(HashMap::new()));
    register_timed_loaders(&coordinator, &timeline);

    let starts = Arc::new(AtomicU32::new(0));
    let counter = starts.clone();
    coordinator.on(move |event| {
        if matches!(event, SyncEvent::ResyncStart { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let first = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.on_resume().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = coordinator.on_resume().await;

    assert_eq!(second, ResumeOutcome::Debounced);
    assert_eq!(first.await.unwrap(), ResumeOutcome::Completed);
    assert_eq!(starts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lock_released_when_loader_never_resolves() {
    let backend = SimulatedBackend::new();
    let coordinator = signed_in_coordinator(&backend).await;
    coordinator.register_resource_loader("profile", || {
        futures::future::pending::<Result<Value, SyncError>>()
    });

    let resume = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.on_resume().await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(coordinator.is_resync_in_progress());

    tokio::time::sleep(Duration::from_millis(14_100)).await;
    assert!(!coordinator.is_resync_in_progress());
    assert!(!coordinator.lock_status().locked);
    assert!(matches!(resume.await.unwrap(), ResumeOutcome::Fallback(_)));
}

#[tokio::test(start_paused = true)]
async fn test_write_retries_until_success() {
    let backend = SimulatedBackend::new();
    let coordinator = signed_in_coordinator(&backend).await;
    let invocations = Arc::new(AtomicU32::new(0));

    let counter = invocations.clone();
    let started = Instant::now();
    let result = coordinator
        .enqueue("add_item_1", move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt <= 2 {
                    Err(SyncError::from_status(503, "unavailable"))
                } else {
                    Ok("written")
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "written");
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_recovery_falls_back_in_order() {
    let backend = SimulatedBackend::new();
    let store = Arc::new(MemoryStore::new());
    let recovery = ConnectionRecoveryManager::new(
        RecoveryConfig::default(),
        Arc::new(backend.clone()),
        Arc::new(backend.clone()),
        store.clone(),
    );

    // No stored session: a frozen handle is replaced by a bare one.
    let frozen: Arc<dyn BackendClient> = backend.client();
    backend.freeze_existing_clients();
    let outcome = recovery.recover(frozen, None).await;
    assert_eq!(outcome.method, RecoveryMethod::FreshClientCreated);

    // Stored session valid for another minute: restored onto a new handle.
    let record = SessionRecoveryRecord {
        session: Session::issue("user-1", Duration::from_secs(60)),
        saved_at: chrono::Utc::now(),
    };
    save_json(store.as_ref(), SESSION_RECOVERY_KEY, &record)
        .await
        .expect("Should store session");
    let frozen: Arc<dyn BackendClient> = backend.client();
    backend.freeze_existing_clients();
    let outcome = recovery.recover(frozen, None).await;
    assert!(matches!(
        outcome.method,
        RecoveryMethod::DirectTokenRestore | RecoveryMethod::ClientRecreatedWithSession
    ));
    let session = outcome
        .client
        .get_session()
        .await
        .expect("Recovered handle should answer")
        .expect("Recovered handle should carry the session");
    assert_eq!(session.user_id, "user-1");
}
