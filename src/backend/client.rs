use crate::backend::types::Session;
use crate::resilience::SyncError;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Transport handle to the remote backend.
///
/// Implementations normalize transport failures into [`SyncError`] (see
/// [`SyncError::from_status`]); nothing above this trait inspects raw
/// status codes.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Stable identifier of this handle, for diagnostics.
    fn client_id(&self) -> Uuid;

    /// Session currently attached to the handle, if any.
    async fn get_session(&self) -> Result<Option<Session>, SyncError>;

    /// Attach a previously issued session to the handle.
    async fn set_session(&self, session: Session) -> Result<Session, SyncError>;

    /// Exchange the refresh token for a new session.
    async fn refresh_session(&self) -> Result<Session, SyncError>;

    /// Minimal read against the backend (one row, limit 1).
    async fn probe(&self) -> Result<(), SyncError>;

    fn has_auth_client(&self) -> bool {
        true
    }

    fn has_realtime_client(&self) -> bool;
}

/// Builds fresh transport handles.
pub trait ClientFactory: Send + Sync {
    fn create_client(&self) -> Arc<dyn BackendClient>;
}

/// Platform connectivity signal.
#[async_trait]
pub trait ConnectivityMonitor: Send + Sync {
    async fn is_connected(&self) -> bool;
}

/// Monitor for platforms without a connectivity signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

#[async_trait]
impl ConnectivityMonitor for AlwaysOnline {
    async fn is_connected(&self) -> bool {
        true
    }
}
