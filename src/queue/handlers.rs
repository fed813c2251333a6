use crate::queue::types::WriteDescriptor;
use crate::resilience::SyncError;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

pub type WriteHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, SyncError>> + Send + Sync>;

/// Maps a write kind to the function that performs it.
#[derive(Default)]
pub struct WriteHandlerRegistry {
    handlers: DashMap<String, WriteHandler>,
}

impl WriteHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&self, kind: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, SyncError>> + Send + 'static,
    {
        let handler: WriteHandler = Arc::new(move |payload| handler(payload).boxed());
        self.handlers.insert(kind.to_string(), handler);
    }

    pub fn get(&self, kind: &str) -> Option<WriteHandler> {
        self.handlers.get(kind).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        kinds.sort();
        kinds
    }

    /// Bind `descriptor` to its handler, producing a repeatable operation.
    pub fn bind(
        &self,
        descriptor: &WriteDescriptor,
    ) -> Result<impl Fn() -> BoxFuture<'static, Result<Value, SyncError>> + Send + Sync + 'static, SyncError>
    {
        let handler = self
            .get(&descriptor.kind)
            .ok_or_else(|| SyncError::UnknownWriteKind(descriptor.kind.clone()))?;
        let payload = descriptor.payload.clone();
        Ok(move || handler(payload.clone()))
    }
}

impl std::fmt::Debug for WriteHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteHandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
