//! Cache backend in a shared key-value service.
//!
//! Entries are stored as JSON under `{namespace}{key}`, where the namespace is
//! `[{prefix}/]{instance}:agg:`. Undecodable entries read as missing.

use std::sync::Arc;

use async_trait::async_trait;
use indexer_kv::KvClient;
use indexer_types::CachedAggregateEntry;
use tracing::warn;

use crate::backend::CacheBackend;
use crate::error::CacheError;

pub struct DistributedCache {
    kv: Arc<dyn KvClient>,
    namespace: String,
}

impl DistributedCache {
    pub fn new(kv: Arc<dyn KvClient>, namespace: impl Into<String>) -> Self {
        Self {
            kv,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }
}

#[async_trait]
impl CacheBackend for DistributedCache {
    async fn store(&self, key: &str, entry: &CachedAggregateEntry) -> Result<(), CacheError> {
        let payload = serde_json::to_string(entry)?;
        self.kv.set(&self.namespaced(key), payload).await?;
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<CachedAggregateEntry>, CacheError> {
        let Some(payload) = self.kv.get(&self.namespaced(key)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&payload) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.kv.delete(&self.namespaced(key)).await?)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let keys = self.kv.scan_prefix(&self.namespace).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.namespace).map(str::to_string))
            .collect())
    }

    fn name(&self) -> &'static str {
        "distributed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_kv::MemoryKv;
    use indexer_types::{Document, OpType};
    use serde_json::json;

    #[tokio::test]
    async fn test_entries_are_namespaced() {
        let kv = Arc::new(MemoryKv::new());
        let cache = DistributedCache::new(kv.clone(), "shop:agg:");
        let doc = json!({"count": 1}).as_object().cloned().unwrap();
        let entry = CachedAggregateEntry::new("tag", "x", OpType::Update, doc, Document::new());

        cache.store("tag:x", &entry).await.unwrap();
        assert!(kv.get("shop:agg:tag:x").await.unwrap().is_some());
        assert_eq!(cache.keys().await.unwrap(), vec!["tag:x"]);
        assert_eq!(cache.retrieve("tag:x").await.unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn test_invalid_entry_reads_as_missing() {
        let kv = Arc::new(MemoryKv::new());
        kv.set("shop:agg:tag:y", "not json".to_string()).await.unwrap();
        let cache = DistributedCache::new(kv, "shop:agg:");
        assert_eq!(cache.retrieve("tag:y").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_two_instances_share_entries() {
        let kv = Arc::new(MemoryKv::new());
        let writer = DistributedCache::new(kv.clone(), "shop:agg:");
        let reader = DistributedCache::new(kv, "shop:agg:");
        let entry = CachedAggregateEntry::new("tag", "z", OpType::Add, Document::new(), Document::new());

        writer.store("tag:z", &entry).await.unwrap();
        assert_eq!(reader.retrieve("tag:z").await.unwrap(), Some(entry));
        assert!(reader.remove("tag:z").await.unwrap());
        assert!(writer.keys().await.unwrap().is_empty());
    }
}
