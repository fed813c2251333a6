use super::*;
use crate::env::keys::WRITE_QUEUE_KEY;
use crate::events::{EventBus, SyncEvent};
use crate::resilience::{RetryPolicy, SyncError};
use crate::storage::{KeyValueStore, MemoryStore, load_json};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

fn create_queue() -> (WriteQueue, Arc<EventBus>) {
    let events = Arc::new(EventBus::new());
    (WriteQueue::new(RetryPolicy::writes(), events.clone()), events)
}

type AttemptLog = Arc<Mutex<Vec<String>>>;

/// Operation that fails retryably `failures` times before succeeding.
fn flaky(
    id: &'static str,
    failures: u32,
    log: AttemptLog,
) -> impl Fn() -> futures::future::BoxFuture<'static, Result<String, SyncError>> + Send + Sync {
    use futures::FutureExt;
    let calls = Arc::new(AtomicU32::new(0));
    move || {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        log.lock().unwrap().push(id.to_string());
        async move {
            if call < failures {
                Err(SyncError::from_status(503, "unavailable"))
            } else {
                Ok(format!("{}-done", id))
            }
        }
        .boxed()
    }
}

#[tokio::test(start_paused = true)]
async fn test_fifo_order_with_front_reinsertion() {
    let (queue, _events) = create_queue();
    let log: AttemptLog = Arc::new(Mutex::new(Vec::new()));

    let a = queue.enqueue("A", flaky("A", 1, log.clone()));
    let b = queue.enqueue("B", flaky("B", 0, log.clone()));
    let c = queue.enqueue("C", flaky("C", 0, log.clone()));

    let (a, b, c) = tokio::join!(a, b, c);
    assert_eq!(a.unwrap(), "A-done");
    assert_eq!(b.unwrap(), "B-done");
    assert_eq!(c.unwrap(), "C-done");
    assert_eq!(*log.lock().unwrap(), vec!["A", "A", "B", "C"]);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_reject_and_queue_continues() {
    let (queue, events) = create_queue();
    let log: AttemptLog = Arc::new(Mutex::new(Vec::new()));
    let processed = Arc::new(Mutex::new(Vec::new()));
    let sink = processed.clone();
    events.on(move |event| {
        if let SyncEvent::WriteProcessed {
            id,
            success,
            attempts,
            ..
        } = event
        {
            sink.lock().unwrap().push((id.clone(), *success, *attempts));
        }
    });

    let doomed = queue.enqueue("doomed", flaky("doomed", u32::MAX, log.clone()));
    let next = queue.enqueue("next", flaky("next", 0, log.clone()));

    let error = doomed.await.unwrap_err();
    assert_eq!(error.http_status(), Some(503));
    assert_eq!(next.await.unwrap(), "next-done");

    let attempts = log.lock().unwrap().iter().filter(|id| *id == "doomed").count();
    assert_eq!(attempts, 4);
    assert_eq!(
        *processed.lock().unwrap(),
        vec![("doomed".to_string(), false, 4), ("next".to_string(), true, 1)]
    );
    assert!(queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_terminal_error_is_not_retried() {
    let (queue, _events) = create_queue();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let result: Result<(), SyncError> = queue
        .enqueue("bad", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(SyncError::from_status(422, "invalid")) }
        })
        .await;

    assert_eq!(result.unwrap_err().http_status(), Some(422));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_storage_failure_in_handler_is_terminal() {
    let (queue, _events) = create_queue();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let started = Instant::now();

    let result: Result<(), SyncError> = queue
        .enqueue("local_mirror", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(SyncError::Storage("disk full".to_string())) }
        })
        .await;

    assert!(matches!(result, Err(SyncError::Storage(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_retry_delays_grow_between_attempts() {
    let (queue, _events) = create_queue();
    let instants = Arc::new(Mutex::new(Vec::new()));
    let recorder = instants.clone();
    let calls = Arc::new(AtomicU32::new(0));

    let result = queue
        .enqueue("add_item_1", move || {
            recorder.lock().unwrap().push(Instant::now());
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err(SyncError::Network("connection reset".to_string()))
                } else {
                    Ok(call + 1)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 3);
    let instants = instants.lock().unwrap();
    assert_eq!(instants.len(), 3);
    let first_gap = instants[1] - instants[0];
    let second_gap = instants[2] - instants[1];
    assert!(first_gap >= Duration::from_millis(1000));
    assert!(first_gap <= Duration::from_millis(2000));
    assert!(second_gap >= Duration::from_millis(2000));
    assert!(second_gap > first_gap);
}

#[tokio::test(start_paused = true)]
async fn test_hung_attempt_times_out_and_retries() {
    let (queue, _events) = create_queue();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let result = queue
        .enqueue("slow", move || {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    futures::future::pending::<()>().await;
                }
                Ok(call)
            }
        })
        .await;

    assert_eq!(result.unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_write_uses_registered_handler() {
    let (queue, _events) = create_queue();
    queue.handlers().register("add_item", |payload: Value| async move {
        Ok(json!({ "stored": payload["name"] }))
    });

    let stored = queue
        .enqueue_write("w1", WriteDescriptor::new("add_item", json!({ "name": "milk" })))
        .await
        .unwrap();
    assert_eq!(stored["stored"], "milk");

    let unknown = queue
        .enqueue_write("w2", WriteDescriptor::new("drop_table", json!({})))
        .await;
    assert!(matches!(unknown, Err(SyncError::UnknownWriteKind(kind)) if kind == "drop_table"));
}

#[tokio::test(start_paused = true)]
async fn test_persist_and_restore_within_same_process() {
    let (queue, _events) = create_queue();
    let store = MemoryStore::new();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

    let first = queue.enqueue("first", move || {
        let release_rx = release_rx.clone();
        async move {
            if let Some(rx) = release_rx.lock().await.take() {
                let _ = rx.await;
            }
            Ok(())
        }
    });
    let second = queue.enqueue("second", || async { Ok(()) });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let status = queue.status();
    assert_eq!(status.queue_length, 2);
    assert!(status.processing);

    assert_eq!(queue.persist(&store).await.unwrap(), 2);
    let record: PersistedWriteQueue = load_json(&store, WRITE_QUEUE_KEY).await.unwrap().unwrap();
    let ids: Vec<&str> = record.items.iter().map(|item| item.id.as_str()).collect();
    assert_eq!(ids, vec!["first", "second"]);
    assert!(record.items.iter().all(|item| item.is_persisted));
    assert!(queue.status().items.iter().all(|item| item.is_persisted));

    let report = queue.restore(&store).await.unwrap();
    assert_eq!(report.persisted, 2);
    assert_eq!(report.already_queued, 2);
    assert!(report.replayed.is_empty());
    assert!(store.get_item(WRITE_QUEUE_KEY).await.unwrap().is_none());

    release_tx.send(()).unwrap();
    first.await.unwrap();
    second.await.unwrap();
    queue.wait_until_idle().await;
    assert!(!queue.is_processing());
}

#[tokio::test(start_paused = true)]
async fn test_restore_replays_descriptors_after_restart() {
    let store = MemoryStore::new();

    {
        let (queue, _events) = create_queue();
        queue.handlers().register("add_item", |_payload: Value| {
            futures::future::pending::<Result<Value, SyncError>>()
        });
        let _hung = queue.enqueue_write("w1", WriteDescriptor::new("add_item", json!({ "n": 1 })));
        let _closure = queue.enqueue("c1", || futures::future::pending::<Result<(), SyncError>>());
        let _queued = queue.enqueue_write("w2", WriteDescriptor::new("add_item", json!({ "n": 2 })));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.persist(&store).await.unwrap(), 3);
    }

    let (queue, _events) = create_queue();
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    queue.handlers().register("add_item", move |payload: Value| {
        sink.lock().unwrap().push(payload["n"].clone());
        async { Ok(Value::Null) }
    });

    let report = queue.restore(&store).await.unwrap();
    assert_eq!(report.persisted, 3);
    assert_eq!(report.replayed, vec!["w1", "w2"]);
    assert_eq!(report.unrecoverable, vec!["c1"]);

    queue.wait_until_idle().await;
    assert_eq!(*received.lock().unwrap(), vec![json!(1), json!(2)]);
    assert!(store.get_item(WRITE_QUEUE_KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn test_persist_empty_queue_clears_record() {
    let (queue, _events) = create_queue();
    let store = MemoryStore::new();
    store
        .set_item(WRITE_QUEUE_KEY, "{\"items\":[],\"saved_at\":\"2024-01-01T00:00:00Z\"}".to_string())
        .await
        .unwrap();

    assert_eq!(queue.persist(&store).await.unwrap(), 0);
    assert!(store.get_item(WRITE_QUEUE_KEY).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_writes_settled_after_persist_are_not_replayed() {
    let (queue, _events) = create_queue();
    let store = MemoryStore::new();
    let applied = Arc::new(AtomicU32::new(0));
    let counter = applied.clone();
    queue.handlers().register("add_item", move |_payload: Value| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(Value::Null) }
    });

    // Persisted before the drainer gets a chance to run.
    let write = queue.enqueue_write("w1", WriteDescriptor::new("add_item", json!({ "n": 1 })));
    assert_eq!(queue.persist(&store).await.unwrap(), 1);

    write.await.unwrap();
    let report = queue.restore(&store).await.unwrap();

    assert_eq!(report.persisted, 1);
    assert_eq!(report.already_processed, 1);
    assert!(report.replayed.is_empty());
    queue.wait_until_idle().await;
    assert_eq!(applied.load(Ordering::SeqCst), 1);
}
