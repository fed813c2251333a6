use super::*;
use crate::events::{EventBus, SyncEvent};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

fn create_registry() -> (Arc<CircuitBreakerRegistry>, Arc<EventBus>) {
    let events = Arc::new(EventBus::new());
    let registry = Arc::new(CircuitBreakerRegistry::new(
        CircuitBreakerConfig::default(),
        events.clone(),
    ));
    (registry, events)
}

fn server_error() -> SyncError {
    SyncError::from_status(503, "unavailable")
}

async fn fail_times(registry: &CircuitBreakerRegistry, resource: &str, times: usize) {
    for _ in 0..times {
        let result: Result<(), SyncError> = registry
            .execute(resource, || async { Err(server_error()) })
            .await;
        assert!(result.is_err());
    }
}

#[test]
fn test_error_classification() {
    assert_eq!(SyncError::from_status(404, "missing").kind(), ErrorKind::ClientError);
    assert_eq!(SyncError::from_status(500, "boom").kind(), ErrorKind::ServerError);
    assert_eq!(SyncError::from_status(302, "moved").kind(), ErrorKind::Network);
    assert_eq!(SyncError::from_status(429, "slow").http_status(), Some(429));

    assert!(!SyncError::from_status(400, "bad").is_retryable());
    assert!(SyncError::from_status(502, "gateway").is_retryable());
    assert!(SyncError::Timeout(Duration::from_secs(1)).is_retryable());
    assert!(!SyncError::Aborted.is_retryable());
    assert!(!SyncError::Storage("disk full".into()).is_retryable());
    assert!(!SyncError::ResyncFailure("phase 1".into()).is_retryable());
    assert!(SyncError::Aborted.is_aborted());
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_after_threshold_and_fails_fast() {
    let (registry, _events) = create_registry();
    fail_times(&registry, "profile", 3).await;

    assert_eq!(registry.state("profile"), Some(CircuitState::Open));

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let result: Result<(), SyncError> = registry
        .execute("profile", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(SyncError::CircuitOpen { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_isolated_per_resource() {
    let (registry, _events) = create_registry();
    fail_times(&registry, "collectionA", 3).await;

    let result = registry.execute("collectionB", || async { Ok(7) }).await;
    assert_eq!(result.unwrap(), 7);
    assert_eq!(registry.state("collectionA"), Some(CircuitState::Open));
    assert_eq!(registry.state("collectionB"), Some(CircuitState::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_breaker_admits_single_probe_after_cooldown() {
    let (registry, _events) = create_registry();
    fail_times(&registry, "profile", 3).await;

    tokio::time::advance(Duration::from_secs(31)).await;

    let (started_tx, started_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let probe_registry = registry.clone();
    let probe = tokio::spawn(async move {
        probe_registry
            .execute("profile", move || async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Ok("fresh")
            })
            .await
    });

    started_rx.await.unwrap();
    assert_eq!(registry.state("profile"), Some(CircuitState::HalfOpen));

    let concurrent: Result<&str, SyncError> =
        registry.execute("profile", || async { Ok("second") }).await;
    assert!(matches!(concurrent, Err(SyncError::CircuitOpen { .. })));

    release_tx.send(()).unwrap();
    assert_eq!(probe.await.unwrap().unwrap(), "fresh");
    assert_eq!(registry.state("profile"), Some(CircuitState::Closed));
    assert_eq!(registry.snapshot()["profile"].failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens_immediately() {
    let (registry, _events) = create_registry();
    fail_times(&registry, "profile", 3).await;
    tokio::time::advance(Duration::from_secs(30)).await;

    fail_times(&registry, "profile", 1).await;
    assert_eq!(registry.state("profile"), Some(CircuitState::Open));

    let snapshot = registry.snapshot();
    let next = snapshot["profile"].next_attempt_in.unwrap();
    assert_eq!(next, Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_reset_open_to_half_open_and_reset_all() {
    let (registry, _events) = create_registry();
    fail_times(&registry, "profile", 3).await;
    fail_times(&registry, "collectionA", 1).await;

    assert_eq!(registry.reset_open_to_half_open(), 1);
    assert_eq!(registry.state("profile"), Some(CircuitState::HalfOpen));
    assert_eq!(registry.state("collectionA"), Some(CircuitState::Closed));

    registry.reset_all();
    let snapshot = registry.snapshot();
    assert!(snapshot.values().all(|s| s.state == CircuitState::Closed));
    assert!(snapshot.values().all(|s| s.failure_count == 0));
    assert!(snapshot["profile"].last_failure_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_breaker_emits_open_and_failure_events() {
    let (registry, events) = create_registry();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    events.on(move |event| sink.lock().unwrap().push(event.clone()));

    fail_times(&registry, "profile", 3).await;
    let _: Result<(), SyncError> = registry.execute("profile", || async { Ok(()) }).await;

    let seen = seen.lock().unwrap();
    let failures = seen
        .iter()
        .filter(|e| matches!(e, SyncEvent::ResourceFailure { .. }))
        .count();
    let opens = seen
        .iter()
        .filter(|e| matches!(e, SyncEvent::CircuitOpen { .. }))
        .count();
    assert_eq!(failures, 3);
    // One when tripping, one for the rejected call.
    assert_eq!(opens, 2);
}

#[tokio::test(start_paused = true)]
async fn test_aborted_errors_do_not_count() {
    let (registry, _events) = create_registry();
    for _ in 0..5 {
        let _: Result<(), SyncError> = registry
            .execute("profile", || async { Err(SyncError::Aborted) })
            .await;
    }
    assert_eq!(registry.state("profile"), Some(CircuitState::Closed));
    assert_eq!(registry.snapshot()["profile"].failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_single_flight_runs_operation_once() {
    let (registry, _events) = create_registry();
    let flight = Arc::new(SingleFlight::<String>::new(registry));
    let calls = Arc::new(AtomicUsize::new(0));

    let callers = (0..5).map(|_| {
        let flight = flight.clone();
        let calls = calls.clone();
        async move {
            flight
                .run("profile", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok("alice".to_string())
                })
                .await
        }
    });

    let results = futures::future::join_all(callers).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| r.as_deref().ok() == Some("alice")));

    let stats = flight.stats();
    assert_eq!(stats.total_requests, 5);
    assert_eq!(stats.coalesced_requests, 4);
    assert_eq!(stats.new_requests, 1);
    assert!((stats.coalescing_ratio() - 0.8).abs() < f64::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn test_single_flight_shares_errors_and_clears_entry() {
    let (registry, _events) = create_registry();
    let flight = Arc::new(SingleFlight::<u32>::new(registry));
    let calls = Arc::new(AtomicUsize::new(0));

    let run = |calls: Arc<AtomicUsize>| {
        let flight = flight.clone();
        async move {
            flight
                .run("collectionA", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err(SyncError::from_status(500, "boom"))
                })
                .await
        }
    };

    let (a, b) = tokio::join!(run(calls.clone()), run(calls.clone()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.unwrap_err().http_status(), Some(500));
    assert_eq!(b.unwrap_err().http_status(), Some(500));
    assert!(!flight.is_in_flight("collectionA"));

    let _ = run(calls.clone()).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_does_not_repeat_client_errors() {
    let executor = RetryExecutor::new(RetryPolicy::reads());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let result: Result<(), SyncError> = executor
        .with_retries("profile", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(SyncError::from_status(404, "not found")) }
        })
        .await;

    assert_eq!(result.unwrap_err().http_status(), Some(404));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_backoff_grows_to_cap() {
    let policy = RetryPolicy {
        max_retries: 5,
        ..RetryPolicy::reads()
    };
    let executor = RetryExecutor::new(policy);
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let recorder = attempts.clone();

    let result: Result<(), SyncError> = executor
        .with_retries("profile", || {
            recorder.lock().unwrap().push(Instant::now());
            async { Err(SyncError::Network("reset".to_string())) }
        })
        .await;
    assert!(result.is_err());

    let attempts = attempts.lock().unwrap();
    assert_eq!(attempts.len(), 6);
    let gaps: Vec<u128> = attempts
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_millis())
        .collect();
    assert_eq!(gaps, vec![300, 600, 1200, 2400, 3000]);
    assert!(gaps.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[tokio::test(start_paused = true)]
async fn test_retry_treats_timeout_as_failure() {
    let policy = RetryPolicy {
        max_retries: 1,
        attempt_timeout: Duration::from_millis(500),
        ..RetryPolicy::reads()
    };
    let executor = RetryExecutor::new(policy);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let result: Result<(), SyncError> = executor
        .with_retries("profile", || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::pending()
        })
        .await;

    assert!(matches!(result, Err(SyncError::Timeout(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_after_transient_failure() {
    let executor = RetryExecutor::new(RetryPolicy::reads());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let result = executor
        .with_retries("profile", || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(SyncError::from_status(503, "busy"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 1);
}

#[test]
fn test_write_policy_delay_includes_bounded_jitter() {
    let policy = RetryPolicy::writes();
    for retry in 1..=3 {
        let delay = policy.delay_for(retry);
        let base = policy.base_delay(retry);
        assert!(delay >= base);
        assert!(delay <= base + policy.jitter);
    }
    assert_eq!(policy.base_delay(1), Duration::from_millis(1000));
    assert_eq!(policy.base_delay(3), Duration::from_millis(4000));
    assert_eq!(policy.base_delay(10), policy.max_delay);
}
