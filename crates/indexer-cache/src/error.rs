//! Error types for the aggregator cache.

use indexer_kv::KvError;
use indexer_lock::LockError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend storage failed
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// Entry could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Could not take the flush scheduler lock
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),
}

impl From<KvError> for CacheError {
    fn from(err: KvError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}
