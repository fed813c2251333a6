//! Typed lifecycle events and the bus that dispatches them.
//!
//! Listeners registered with [`EventBus::on`] run synchronously inside
//! [`EventBus::emit`], in registration order. A panicking listener is
//! isolated and logged; the remaining listeners still run. Async consumers
//! can use [`EventBus::subscribe`] instead.

use crate::resync::ResyncMode;
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    ManagerInitialized,
    SessionValidated {
        was_refreshed: bool,
    },
    SessionStale {
        reason: String,
    },
    SessionActive {
        user_id: String,
    },
    SessionResumed {
        duration: Duration,
        resynced: bool,
    },
    WriteQueued {
        id: String,
        queue_length: usize,
    },
    WriteProcessed {
        id: String,
        success: bool,
        attempts: u32,
        error: Option<String>,
    },
    ResyncStart {
        reason: String,
        mode: ResyncMode,
    },
    ResyncPhase {
        phase: u8,
        resources: Vec<String>,
    },
    ResyncComplete {
        success: bool,
        loaded: Vec<String>,
        failed: Vec<String>,
    },
    ResyncDelayed {
        reason: String,
    },
    ResyncFallback {
        reason: String,
    },
    CircuitOpen {
        resource: String,
        retry_in: Duration,
    },
    ResourceFailure {
        resource: String,
        error: String,
        failure_count: u32,
    },
    ResourceLoaded {
        resource: String,
    },
    AppBackground,
}

impl SyncEvent {
    /// Stable wire-style name, e.g. `resync:phase`.
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::ManagerInitialized => "manager:initialized",
            SyncEvent::SessionValidated { .. } => "session:validated",
            SyncEvent::SessionStale { .. } => "session:stale",
            SyncEvent::SessionActive { .. } => "session:active",
            SyncEvent::SessionResumed { .. } => "session:resumed",
            SyncEvent::WriteQueued { .. } => "write:queued",
            SyncEvent::WriteProcessed { .. } => "write:processed",
            SyncEvent::ResyncStart { .. } => "resync:start",
            SyncEvent::ResyncPhase { .. } => "resync:phase",
            SyncEvent::ResyncComplete { .. } => "resync:complete",
            SyncEvent::ResyncDelayed { .. } => "resync:delayed",
            SyncEvent::ResyncFallback { .. } => "resync:fallback",
            SyncEvent::CircuitOpen { .. } => "circuit:open",
            SyncEvent::ResourceFailure { .. } => "resource:failure",
            SyncEvent::ResourceLoaded { .. } => "resource:loaded",
            SyncEvent::AppBackground => "app:background",
        }
    }
}

/// Handle returned by [`EventBus::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type EventListener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

pub struct EventBus {
    listeners: RwLock<Vec<(ListenerId, EventListener)>>,
    next_id: AtomicU64,
    channel: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (channel, _) = broadcast::channel(256);
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            channel,
        }
    }

    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.push((id, Arc::new(listener)));
        id
    }

    /// Returns false if the listener was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.channel.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .map(|listeners| listeners.len())
            .unwrap_or_default()
    }

    pub fn emit(&self, event: SyncEvent) {
        debug!(event = event.name(), "Emitting event");

        // Snapshot so listeners may call on/off without deadlocking.
        let listeners: Vec<(ListenerId, EventListener)> = self
            .listeners
            .read()
            .map(|listeners| listeners.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone());

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                error!(
                    event = event.name(),
                    listener = id.0,
                    "Event listener panicked"
                );
            }
        }

        // No receivers is not an error.
        let _ = self.channel.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_event_names() {
        assert_eq!(SyncEvent::AppBackground.name(), "app:background");
        assert_eq!(
            SyncEvent::ResyncPhase {
                phase: 1,
                resources: vec![]
            }
            .name(),
            "resync:phase"
        );
        assert_eq!(
            SyncEvent::CircuitOpen {
                resource: "profile".to_string(),
                retry_in: Duration::from_secs(1)
            }
            .name(),
            "circuit:open"
        );
    }

    #[test]
    fn test_listeners_run_in_order_and_survive_panics() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        bus.on(move |event| first.lock().unwrap().push(format!("a:{}", event.name())));
        bus.on(|_| panic!("listener failure"));
        let second = seen.clone();
        bus.on(move |event| second.lock().unwrap().push(format!("b:{}", event.name())));

        bus.emit(SyncEvent::ManagerInitialized);

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["a:manager:initialized", "b:manager:initialized"]
        );
    }

    #[test]
    fn test_off_removes_listener() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        let id = bus.on(move |_| *counter.lock().unwrap() += 1);

        bus.emit(SyncEvent::AppBackground);
        assert!(bus.off(id));
        assert!(!bus.off(id));
        bus.emit(SyncEvent::AppBackground);

        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_receives_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(SyncEvent::ResyncDelayed {
            reason: "no_connection".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "resync:delayed");
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(SyncEvent::WriteQueued {
            id: "add_item_1".to_string(),
            queue_length: 2,
        })
        .unwrap();
        assert_eq!(json["event"], "write_queued");
        assert_eq!(json["queue_length"], 2);
    }
}
