//! Process-wide advisory lock held for the duration of a resync.
//!
//! Ordinary refreshes check [`RefreshLock::is_locked`] and skip; only
//! [`RefreshLock::wait_until_released`] blocks. Every acquisition carries a
//! token so the guard drop and the safety watchdog can both release it
//! without one clobbering a later acquisition.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct Holder {
    token: u64,
    reason: String,
    acquired_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockStatus {
    pub locked: bool,
    pub reason: Option<String>,
    pub held_for: Option<Duration>,
}

#[derive(Debug)]
struct LockInner {
    holder: Mutex<Option<Holder>>,
    next_token: AtomicU64,
    locked: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct RefreshLock {
    inner: Arc<LockInner>,
}

impl RefreshLock {
    pub fn new() -> Self {
        let (locked, _) = watch::channel(false);
        Self {
            inner: Arc::new(LockInner {
                holder: Mutex::new(None),
                next_token: AtomicU64::new(1),
                locked,
            }),
        }
    }

    fn holder(&self) -> MutexGuard<'_, Option<Holder>> {
        self.inner
            .holder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Acquire the lock unless it is already held.
    pub fn try_acquire(&self, reason: &str) -> Option<RefreshLockGuard> {
        let mut holder = self.holder();
        if let Some(current) = holder.as_ref() {
            debug!(
                requested = reason,
                held_by = %current.reason,
                "Refresh lock busy"
            );
            return None;
        }

        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        *holder = Some(Holder {
            token,
            reason: reason.to_string(),
            acquired_at: Instant::now(),
        });
        self.inner.locked.send_replace(true);
        info!(reason, token, "Refresh lock acquired");

        Some(RefreshLockGuard {
            lock: self.clone(),
            token,
        })
    }

    fn release(&self, token: u64) -> bool {
        let mut holder = self.holder();
        match holder.as_ref() {
            Some(current) if current.token == token => {
                let held_for = current.acquired_at.elapsed();
                *holder = None;
                self.inner.locked.send_replace(false);
                debug!(token, held_ms = held_for.as_millis() as u64, "Refresh lock released");
                true
            }
            _ => false,
        }
    }

    /// Release the acquisition identified by `token`, if it is still the
    /// current one. Used by the safety watchdog.
    pub fn force_release(&self, token: u64) -> bool {
        let released = self.release(token);
        if released {
            warn!(token, "Refresh lock force-released by safety timeout");
        }
        released
    }

    pub fn is_locked(&self) -> bool {
        self.holder().is_some()
    }

    pub fn status(&self) -> LockStatus {
        match self.holder().as_ref() {
            Some(holder) => LockStatus {
                locked: true,
                reason: Some(holder.reason.clone()),
                held_for: Some(holder.acquired_at.elapsed()),
            },
            None => LockStatus {
                locked: false,
                reason: None,
                held_for: None,
            },
        }
    }

    /// Wait until the lock is free. Returns false if `timeout` elapses first.
    pub async fn wait_until_released(&self, timeout: Duration) -> bool {
        let mut locked = self.inner.locked.subscribe();
        tokio::time::timeout(timeout, locked.wait_for(|locked| !*locked))
            .await
            .is_ok_and(|result| result.is_ok())
    }
}

impl Default for RefreshLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the acquisition on drop.
#[derive(Debug)]
pub struct RefreshLockGuard {
    lock: RefreshLock,
    token: u64,
}

impl RefreshLockGuard {
    pub fn token(&self) -> u64 {
        self.token
    }
}

impl Drop for RefreshLockGuard {
    fn drop(&mut self) {
        self.lock.release(self.token);
    }
}
