//! # indexer-kv
//!
//! Abstraction over the shared key-value service used when several indexer
//! processes must agree on locks and pending aggregates.
//!
//! [`KvClient`] is the seam. [`MemoryKv`] implements it in process with TTL
//! semantics; sharing one `Arc<MemoryKv>` between several indexers behaves
//! like pointing them at the same remote service.

pub mod error;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

pub use error::KvError;
pub use memory::MemoryKv;

/// Operations the distributed backends need from a key-value service.
#[async_trait]
pub trait KvClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn set(&self, key: &str, value: String) -> Result<(), KvError>;

    /// Set the key only if it is absent. Returns whether the value was written.
    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration)
        -> Result<bool, KvError>;

    /// Returns whether a value was removed.
    async fn delete(&self, key: &str) -> Result<bool, KvError>;

    /// Remove the key only while it still holds `expected`.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, KvError>;

    /// All live keys starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError>;

    /// Release connections. Default is a no-op.
    async fn shutdown(&self) -> Result<(), KvError> {
        Ok(())
    }
}
