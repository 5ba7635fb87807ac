//! # indexer-lock
//!
//! Keyed mutual exclusion. All writes to one document or aggregate key go
//! through [`LockService::using_lock`], which serializes them and lets nested
//! operations reuse a lock the caller already holds.
//!
//! Two backends are provided:
//! - [`LocalLock`]: per-key async mutexes, one process
//! - [`DistributedLock`]: leases in a shared [`indexer_kv::KvClient`] with
//!   bounded retries

pub mod backend;
pub mod distributed;
pub mod error;
pub mod handle;
pub mod local;
pub mod service;

pub use backend::{HeldLock, LockBackend};
pub use distributed::DistributedLock;
pub use error::LockError;
pub use handle::LockHandle;
pub use local::LocalLock;
pub use service::LockService;
