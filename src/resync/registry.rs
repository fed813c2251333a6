use crate::resilience::SyncError;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

pub type ResourceLoader =
    Arc<dyn Fn() -> BoxFuture<'static, Result<serde_json::Value, SyncError>> + Send + Sync>;

/// Resource name to loader mapping, populated by the data layer.
///
/// The coordinator only knows phase membership by name; what a resource is
/// and how it is fetched lives entirely in the registered loader.
#[derive(Default)]
pub struct ResourceLoaderRegistry {
    loaders: DashMap<String, ResourceLoader>,
}

impl ResourceLoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `loader` under `name`, replacing any previous loader.
    pub fn register<F, Fut>(&self, name: &str, loader: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, SyncError>> + Send + 'static,
    {
        let loader: ResourceLoader = Arc::new(move || loader().boxed());
        if self.loaders.insert(name.to_string(), loader).is_some() {
            debug!(resource = name, "Replaced resource loader");
        }
    }

    pub fn get(&self, name: &str) -> Option<ResourceLoader> {
        self.loaders.get(name).map(|entry| entry.value().clone())
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.loaders.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.loaders.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loaders.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

impl std::fmt::Debug for ResourceLoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLoaderRegistry")
            .field("names", &self.names())
            .finish()
    }
}
