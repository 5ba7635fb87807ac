//! Cache backend seam.

use async_trait::async_trait;
use indexer_types::CachedAggregateEntry;

use crate::error::CacheError;

/// Storage for pending aggregate entries, keyed by `{type}:{id}`.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn store(&self, key: &str, entry: &CachedAggregateEntry) -> Result<(), CacheError>;

    /// `None` for missing keys and for entries that cannot be decoded.
    async fn retrieve(&self, key: &str) -> Result<Option<CachedAggregateEntry>, CacheError>;

    /// Returns whether an entry was removed.
    async fn remove(&self, key: &str) -> Result<bool, CacheError>;

    /// All pending keys, sorted.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    fn name(&self) -> &'static str;

    async fn shutdown(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
