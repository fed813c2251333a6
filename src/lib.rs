//! # Session Resync
//!
//! Client-side session resilience and data resynchronization core. Keeps a
//! client's view of a remote backend coherent across app suspend/resume,
//! network loss and token expiry, without freezing the UI or losing writes.
//!
//! ## Architecture Overview
//!
//! - **[`resilience`]**: per-resource circuit breakers, single-flight request
//!   coalescing, retry with backoff and jitter, the error taxonomy
//! - **[`queue`]**: ordered, retrying write queue persisted across suspends
//! - **[`resync`]**: resource loader registry and the phased resync runner
//! - **[`session`]**: refresh lock, connection recovery and the lifecycle
//!   coordinator that drives suspend/resume
//! - **[`events`]**: typed lifecycle events and their dispatch
//! - **[`backend`]**: transport, auth and connectivity collaborator traits,
//!   plus an in-memory simulated backend
//! - **[`storage`]**: key-value persistence (memory and atomic file store)
//!
//! ## Resume flow
//!
//! ```text
//! on_resume ─► debounce ─► refresh lock ─► recover connection ─► check session
//!                                                                    │
//!            write queue restore ◄─ resync phases 1..4 ◄─ wait for connection
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use session_resync::{SessionLifecycleCoordinator, SimulatedBackend, MemoryStore, SyncConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SimulatedBackend::new();
//!     let coordinator = SessionLifecycleCoordinator::new(
//!         SyncConfig::default(),
//!         Arc::new(backend.clone()),
//!         Arc::new(backend.clone()),
//!         Arc::new(MemoryStore::new()),
//!     );
//!
//!     coordinator.register_resource_loader("profile", move || {
//!         let backend = backend.clone();
//!         async move { backend.fetch("profile").await }
//!     });
//!     coordinator.initialize().await?;
//!
//!     coordinator.on_background().await;
//!     let outcome = coordinator.on_resume().await;
//!     println!("resume: {:?}", outcome);
//!     Ok(())
//! }
//! ```

/// Circuit breakers, single-flight, retry and the error taxonomy.
pub mod resilience;

/// Typed lifecycle events and the event bus.
pub mod events;

/// Collaborator traits for transport, auth and connectivity.
pub mod backend;

/// Key-value persistence used for sessions and the write queue.
pub mod storage;

/// Resource loaders and the phased resync runner.
pub mod resync;

/// Persisted, ordered write queue.
pub mod queue;

/// Refresh lock, connection recovery and lifecycle coordination.
pub mod session;

/// Aggregate configuration.
pub mod config;

/// Environment constants and path utilities.
///
/// Centralizes storage keys, resource names and directory names used
/// throughout the crate.
pub mod env;

// CLI module for the resync-sim binary
pub mod cli;

pub use backend::{
    AlwaysOnline, BackendClient, ClientFactory, ConnectivityMonitor, Session, SimulatedBackend,
};
pub use config::SyncConfig;
pub use events::{EventBus, ListenerId, SyncEvent};
pub use queue::{WriteDescriptor, WriteQueue, WriteQueueStatus};
pub use resilience::{
    CircuitBreakerRegistry, CircuitState, RetryExecutor, RetryPolicy, SingleFlight, SyncError,
};
pub use resync::{ResourceLoaderRegistry, ResyncMode, ResyncPlan, ResyncReport};
pub use session::{
    ConnectionRecoveryManager, LifecycleState, RecoveryMethod, RefreshLock, ResumeOutcome,
    SessionLifecycleCoordinator,
};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
