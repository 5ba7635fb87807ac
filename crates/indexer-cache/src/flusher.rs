//! The seam through which the cache hands entries back for persistence.

use async_trait::async_trait;

/// Persists one cached aggregate and removes it from the cache.
///
/// Implemented by the indexer. The cache only holds a weak reference, so a
/// dropped indexer simply stops receiving flushes.
#[async_trait]
pub trait AggregateFlusher: Send + Sync {
    async fn flush_aggregate(&self, key: &str) -> anyhow::Result<()>;
}
