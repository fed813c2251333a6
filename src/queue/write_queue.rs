//! Ordered, persisted, retrying queue of pending writes.
//!
//! A single drainer processes items strictly FIFO, one at a time. A
//! retryable failure puts the item back at the front of the queue, so it is
//! retried before anything behind it is attempted. Writes are never
//! cancelled by a background transition.

use crate::env::keys::WRITE_QUEUE_KEY;
use crate::events::{EventBus, SyncEvent};
use crate::queue::handlers::WriteHandlerRegistry;
use crate::queue::types::*;
use crate::resilience::{RetryPolicy, SyncError, with_timeout};
use crate::storage::{KeyValueStore, load_json, save_json};
use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

type AttemptFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), SyncError>> + Send + Sync>;
type CompletionFn = Box<dyn FnOnce(Result<(), SyncError>) + Send>;

struct QueuedWrite {
    meta: WriteQueueItem,
    attempt: AttemptFn,
    completion: Option<CompletionFn>,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<QueuedWrite>,
    /// Item currently being attempted; not in `items` while set.
    current: Option<WriteQueueItem>,
    processing: bool,
    /// Persisted items that finished in this process since the last persist.
    settled: HashSet<String>,
}

#[derive(Clone)]
pub struct WriteQueue {
    state: Arc<Mutex<QueueState>>,
    idle: Arc<watch::Sender<bool>>,
    handlers: Arc<WriteHandlerRegistry>,
    policy: RetryPolicy,
    events: Arc<EventBus>,
}

impl WriteQueue {
    pub fn new(policy: RetryPolicy, events: Arc<EventBus>) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            idle: Arc::new(idle),
            handlers: Arc::new(WriteHandlerRegistry::new()),
            policy,
            events,
        }
    }

    pub fn handlers(&self) -> &Arc<WriteHandlerRegistry> {
        &self.handlers
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue `operation` under `id`.
    ///
    /// The item is queued immediately; the returned future resolves with the
    /// value of the successful attempt, or rejects with the last error once
    /// retries are exhausted or a terminal error occurs.
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
        let slot: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
        let attempt_slot = slot.clone();
        let attempt: AttemptFn = Arc::new(move || {
            let slot = attempt_slot.clone();
            let pending = operation();
            async move {
                let value = pending.await?;
                *slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(value);
                Ok(())
            }
            .boxed()
        });

        let completed = self.push(WriteQueueItem::new(id, None), attempt);

        async move {
            completed.await?;
            slot.lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take()
                .ok_or(SyncError::Aborted)
        }
    }

    /// Queue a serializable write. Unlike closure writes, these survive a
    /// process restart: the descriptor is persisted in full and rebuilt via
    /// the handler registry on restore.
    pub fn enqueue_write(
        &self,
        id: &str,
        descriptor: WriteDescriptor,
    ) -> impl Future<Output = Result<Value, SyncError>> + Send + 'static {
        let queued = self.attempt_for(&descriptor).map(|(attempt, slot)| {
            let completed = self.push(WriteQueueItem::new(id, Some(descriptor)), attempt);
            (completed, slot)
        });

        async move {
            let (completed, slot) = queued?;
            completed.await?;
            slot.lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take()
                .ok_or(SyncError::Aborted)
        }
    }

    fn attempt_for(
        &self,
        descriptor: &WriteDescriptor,
    ) -> Result<(AttemptFn, Arc<Mutex<Option<Value>>>), SyncError> {
        let operation = self.handlers.bind(descriptor)?;
        let slot: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let attempt_slot = slot.clone();
        let attempt: AttemptFn = Arc::new(move || {
            let slot = attempt_slot.clone();
            let pending = operation();
            async move {
                let value = pending.await?;
                *slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(value);
                Ok(())
            }
            .boxed()
        });
        Ok((attempt, slot))
    }

    fn push(
        &self,
        meta: WriteQueueItem,
        attempt: AttemptFn,
    ) -> impl Future<Output = Result<(), SyncError>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let completion: CompletionFn = Box::new(move |result| {
            let _ = tx.send(result);
        });

        let id = meta.id.clone();
        let queue_length = {
            let mut state = self.state();
            state.items.push_back(QueuedWrite {
                meta,
                attempt,
                completion: Some(completion),
            });
            state.items.len() + usize::from(state.current.is_some())
        };

        debug!(id = %id, queue_length, "Write queued");
        self.events.emit(SyncEvent::WriteQueued { id, queue_length });
        self.ensure_draining();

        async move { rx.await.unwrap_or(Err(SyncError::Aborted)) }
    }

    /// Start the drainer unless one is already running or there is nothing
    /// to drain.
    pub fn ensure_draining(&self) {
        {
            let mut state = self.state();
            if state.processing || state.items.is_empty() {
                return;
            }
            state.processing = true;
            self.idle.send_replace(false);
        }

        let queue = self.clone();
        tokio::spawn(async move {
            queue.drain().await;
        });
    }

    async fn drain(&self) {
        loop {
            let mut item = {
                let mut state = self.state();
                match state.items.pop_front() {
                    Some(item) => {
                        state.current = Some(item.meta.clone());
                        item
                    }
                    None => {
                        state.processing = false;
                        state.current = None;
                        self.idle.send_replace(true);
                        break;
                    }
                }
            };

            let attempt = item.meta.retry_count + 1;
            debug!(id = %item.meta.id, attempt, "Attempting write");
            let result = with_timeout(self.policy.attempt_timeout, (item.attempt)()).await;

            match result {
                Ok(()) => self.finish(item, Ok(())),
                Err(error)
                    if error.is_retryable() && item.meta.retry_count < self.policy.max_retries =>
                {
                    item.meta.retry_count += 1;
                    let delay = self.policy.delay_for(item.meta.retry_count);
                    warn!(
                        id = %item.meta.id,
                        retry = item.meta.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Write failed, retrying at front of queue"
                    );
                    {
                        let mut state = self.state();
                        state.current = None;
                        state.items.push_front(item);
                    }
                    tokio::time::sleep(delay).await;
                }
                Err(error) => self.finish(item, Err(error)),
            }
        }
    }

    fn finish(&self, item: QueuedWrite, result: Result<(), SyncError>) {
        {
            let mut state = self.state();
            state.current = None;
            if item.meta.is_persisted {
                state.settled.insert(item.meta.id.clone());
            }
        }

        let QueuedWrite {
            meta, completion, ..
        } = item;
        let attempts = meta.retry_count + 1;
        match &result {
            Ok(()) => info!(id = %meta.id, attempts, "Write processed"),
            Err(error) => warn!(id = %meta.id, attempts, error = %error, "Write rejected"),
        }

        self.events.emit(SyncEvent::WriteProcessed {
            id: meta.id,
            success: result.is_ok(),
            attempts,
            error: result.as_ref().err().map(|e| e.to_string()),
        });

        if let Some(completion) = completion {
            completion(result);
        }
    }

    /// Write every unacknowledged item (in-flight first) to `store`.
    pub async fn persist(&self, store: &dyn KeyValueStore) -> Result<usize, SyncError> {
        let items: Vec<WriteQueueItem> = {
            let mut state = self.state();
            state.settled.clear();
            if let Some(current) = state.current.as_mut() {
                current.is_persisted = true;
            }
            for queued in state.items.iter_mut() {
                queued.meta.is_persisted = true;
            }
            state
                .current
                .iter()
                .cloned()
                .chain(state.items.iter().map(|queued| queued.meta.clone()))
                .collect()
        };

        if items.is_empty() {
            store.remove_item(WRITE_QUEUE_KEY).await?;
            return Ok(0);
        }

        let count = items.len();
        let record = PersistedWriteQueue {
            items,
            saved_at: Utc::now(),
        };
        save_json(store, WRITE_QUEUE_KEY, &record).await?;
        info!(count, "Persisted write queue");
        Ok(count)
    }

    /// Reconcile the persisted record with memory, clear it, and resume
    /// draining.
    ///
    /// Items still in memory are left alone. Descriptor items missing from
    /// memory are rebuilt and queued ahead of newer writes, in their
    /// original order. Closure items missing from memory are reported as
    /// unrecoverable.
    pub async fn restore(&self, store: &dyn KeyValueStore) -> Result<RestoreReport, SyncError> {
        let mut report = RestoreReport::default();
        let record: Option<PersistedWriteQueue> = match load_json(store, WRITE_QUEUE_KEY).await {
            Ok(record) => record,
            Err(SyncError::Serialization(message)) => {
                warn!(error = %message, "Discarding unreadable write queue record");
                None
            }
            Err(error) => return Err(error),
        };

        if let Some(record) = record {
            report.persisted = record.items.len();
            let (in_memory, settled): (HashSet<String>, HashSet<String>) = {
                let mut state = self.state();
                let in_memory = state
                    .current
                    .iter()
                    .map(|item| item.id.clone())
                    .chain(state.items.iter().map(|queued| queued.meta.id.clone()))
                    .collect();
                (in_memory, std::mem::take(&mut state.settled))
            };

            let mut replayed = Vec::new();
            for meta in record.items {
                if in_memory.contains(&meta.id) {
                    report.already_queued += 1;
                    continue;
                }
                if settled.contains(&meta.id) {
                    report.already_processed += 1;
                    continue;
                }
                let rebuilt = meta
                    .descriptor
                    .as_ref()
                    .map(|descriptor| self.attempt_for(descriptor));
                match rebuilt {
                    Some(Ok((attempt, _))) => {
                        report.replayed.push(meta.id.clone());
                        replayed.push(QueuedWrite {
                            meta,
                            attempt,
                            completion: None,
                        });
                    }
                    Some(Err(error)) => {
                        warn!(id = %meta.id, error = %error, "Cannot rebuild persisted write");
                        report.unrecoverable.push(meta.id);
                    }
                    None => {
                        warn!(id = %meta.id, "Persisted write has no descriptor, lost with previous process");
                        report.unrecoverable.push(meta.id);
                    }
                }
            }

            {
                let mut state = self.state();
                for queued in replayed.into_iter().rev() {
                    state.items.push_front(queued);
                }
            }

            store.remove_item(WRITE_QUEUE_KEY).await?;
            info!(
                persisted = report.persisted,
                replayed = report.replayed.len(),
                unrecoverable = report.unrecoverable.len(),
                "Restored write queue"
            );
        }

        self.ensure_draining();
        Ok(report)
    }

    pub fn status(&self) -> WriteQueueStatus {
        let state = self.state();
        let items: Vec<WriteQueueItem> = state
            .current
            .iter()
            .cloned()
            .chain(state.items.iter().map(|queued| queued.meta.clone()))
            .collect();
        WriteQueueStatus {
            queue_length: items.len(),
            processing: state.processing,
            items,
        }
    }

    pub fn len(&self) -> usize {
        let state = self.state();
        state.items.len() + usize::from(state.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_processing(&self) -> bool {
        self.state().processing
    }

    /// Resolves once the drainer has stopped with nothing left to process.
    pub async fn wait_until_idle(&self) {
        let mut idle = self.idle.subscribe();
        let _ = idle.wait_for(|idle| *idle).await;
    }
}

impl std::fmt::Debug for WriteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteQueue")
            .field("len", &self.len())
            .field("processing", &self.is_processing())
            .field("policy", &self.policy)
            .finish()
    }
}
