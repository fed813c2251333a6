use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Coarse classification used by retry and breaker logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    ClientError,
    ServerError,
    Network,
    CircuitOpen,
    SessionInvalid,
    Aborted,
    ResyncInProgress,
    ResyncFailure,
    Storage,
    Serialization,
    UnknownWriteKind,
}

/// Every failure the resync core can surface.
///
/// Backend adapters normalize transport failures through
/// [`SyncError::from_status`] so downstream code only ever matches on the
/// tagged variant, never on ad-hoc status fields.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("Client error ({status}): {message}")]
    ClientError { status: u16, message: String },
    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Circuit breaker is open for resource '{resource}'")]
    CircuitOpen {
        resource: String,
        retry_at: DateTime<Utc>,
    },
    #[error("Session invalid: {0}")]
    SessionInvalid(String),
    #[error("Request aborted")]
    Aborted,
    #[error("A resync is already in progress")]
    ResyncInProgress,
    #[error("Resync failed: {0}")]
    ResyncFailure(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("No write handler registered for kind '{0}'")]
    UnknownWriteKind(String),
}

impl SyncError {
    /// Normalize an HTTP-like status into the error taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400..=499 => SyncError::ClientError { status, message },
            500..=599 => SyncError::ServerError { status, message },
            _ => SyncError::Network(format!("unexpected status {}: {}", status, message)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Timeout(_) => ErrorKind::Timeout,
            SyncError::ClientError { .. } => ErrorKind::ClientError,
            SyncError::ServerError { .. } => ErrorKind::ServerError,
            SyncError::Network(_) => ErrorKind::Network,
            SyncError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            SyncError::SessionInvalid(_) => ErrorKind::SessionInvalid,
            SyncError::Aborted => ErrorKind::Aborted,
            SyncError::ResyncInProgress => ErrorKind::ResyncInProgress,
            SyncError::ResyncFailure(_) => ErrorKind::ResyncFailure,
            SyncError::Storage(_) => ErrorKind::Storage,
            SyncError::Serialization(_) => ErrorKind::Serialization,
            SyncError::UnknownWriteKind(_) => ErrorKind::UnknownWriteKind,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            SyncError::ClientError { status, .. } | SyncError::ServerError { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Whether retrying the same operation could plausibly succeed.
    ///
    /// 4xx responses are terminal: the request itself is wrong.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Timeout(_) | SyncError::ServerError { .. } | SyncError::Network(_) => true,
            SyncError::ClientError { .. }
            | SyncError::CircuitOpen { .. }
            | SyncError::SessionInvalid(_)
            | SyncError::Aborted
            | SyncError::ResyncInProgress
            | SyncError::ResyncFailure(_)
            | SyncError::Storage(_)
            | SyncError::Serialization(_)
            | SyncError::UnknownWriteKind(_) => false,
        }
    }

    /// Aborted requests are a no-op for callers: not logged as failures, not retried.
    pub fn is_aborted(&self) -> bool {
        matches!(self, SyncError::Aborted)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        SyncError::Serialization(error.to_string())
    }
}

impl From<futures::future::Aborted> for SyncError {
    fn from(_: futures::future::Aborted) -> Self {
        SyncError::Aborted
    }
}
