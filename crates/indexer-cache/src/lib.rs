//! # indexer-cache
//!
//! Write-behind cache for aggregate documents.
//!
//! Measure and signal updates are merged into a [`CachedAggregateEntry`] per
//! aggregate key instead of being written to the store immediately. A flush,
//! scheduled a fixed delay after the cache becomes dirty, replays every entry
//! through an [`AggregateFlusher`] and removes it.
//!
//! Backends:
//! - [`LocalCache`]: in-process map
//! - [`DistributedCache`]: JSON entries in a shared key-value service
//!
//! [`CachedAggregateEntry`]: indexer_types::CachedAggregateEntry

pub mod backend;
pub mod cache;
pub mod distributed;
pub mod error;
pub mod flusher;
pub mod local;

pub use backend::CacheBackend;
pub use cache::{AggregatorCache, FlushReport, FLUSH_SCHEDULER_KEY};
pub use distributed::DistributedCache;
pub use error::CacheError;
pub use flusher::AggregateFlusher;
pub use local::LocalCache;
