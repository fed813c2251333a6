use crate::resilience::SyncError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Durable string key-value storage.
///
/// Values are opaque strings; the core stores JSON documents under the
/// fixed keys in [`crate::env::keys`].
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, SyncError>;

    async fn set_item(&self, key: &str, value: String) -> Result<(), SyncError>;

    async fn remove_item(&self, key: &str) -> Result<(), SyncError>;
}

/// Process-local store. Survives suspend/resume but not a process kill.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, SyncError> {
        Ok(self.items.get(key).map(|value| value.clone()))
    }

    async fn set_item(&self, key: &str, value: String) -> Result<(), SyncError> {
        self.items.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), SyncError> {
        self.items.remove(key);
        Ok(())
    }
}

/// Serialize `value` as JSON under `key`.
pub async fn save_json<T>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<(), SyncError>
where
    T: Serialize + ?Sized,
{
    let json = serde_json::to_string(value)?;
    store.set_item(key, json).await
}

/// Load and deserialize the JSON document under `key`, if present.
pub async fn load_json<T>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>, SyncError>
where
    T: DeserializeOwned,
{
    match store.get_item(key).await? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}
