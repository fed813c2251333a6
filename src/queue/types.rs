use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Serializable description of a write, rebuilt into an executable
/// operation through the handler registered for `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteDescriptor {
    pub kind: String,
    pub payload: serde_json::Value,
}

impl WriteDescriptor {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Bookkeeping for one queued write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteQueueItem {
    pub id: String,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub is_persisted: bool,
    /// Present for descriptor-based writes; closure writes only carry
    /// bookkeeping and cannot be replayed after a process restart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<WriteDescriptor>,
}

impl WriteQueueItem {
    pub fn new(id: impl Into<String>, descriptor: Option<WriteDescriptor>) -> Self {
        Self {
            id: id.into(),
            retry_count: 0,
            created_at: Utc::now(),
            is_persisted: false,
            descriptor,
        }
    }

    pub fn is_replayable(&self) -> bool {
        self.descriptor.is_some()
    }
}

/// Record stored under the write queue key on background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedWriteQueue {
    pub items: Vec<WriteQueueItem>,
    pub saved_at: DateTime<Utc>,
}

/// Diagnostics view. `queue_length` counts the in-flight item too.
#[derive(Debug, Clone, Serialize)]
pub struct WriteQueueStatus {
    pub queue_length: usize,
    pub processing: bool,
    pub items: Vec<WriteQueueItem>,
}

/// Outcome of restoring a persisted queue record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    /// Items found in the persisted record.
    pub persisted: usize,
    /// Items still present in memory (same-process suspend/resume).
    pub already_queued: usize,
    /// Items that finished after the record was written.
    pub already_processed: usize,
    /// Descriptor items rebuilt and re-queued after a restart.
    pub replayed: Vec<String>,
    /// Items lost with the previous process.
    pub unrecoverable: Vec<String>,
}
