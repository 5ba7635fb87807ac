//! In-process cache backend.

use async_trait::async_trait;
use dashmap::DashMap;
use indexer_types::CachedAggregateEntry;

use crate::backend::CacheBackend;
use crate::error::CacheError;

#[derive(Default)]
pub struct LocalCache {
    entries: DashMap<String, CachedAggregateEntry>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for LocalCache {
    async fn store(&self, key: &str, entry: &CachedAggregateEntry) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), entry.clone());
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<CachedAggregateEntry>, CacheError> {
        Ok(self.entries.get(key).map(|e| e.clone()))
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
