//! In-process lock backend.
//!
//! One async mutex per key, created on demand and pruned once nobody holds or
//! waits for it. Waiters are served in FIFO order by the tokio mutex.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::backend::{HeldLock, LockBackend};
use crate::error::LockError;

type KeyMutexes = DashMap<String, Arc<Mutex<()>>>;

/// Lock backend for a single process.
#[derive(Default)]
pub struct LocalLock {
    locks: Arc<KeyMutexes>,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn active_keys(&self) -> usize {
        self.locks.len()
    }
}

#[async_trait]
impl LockBackend for LocalLock {
    async fn acquire(&self, key: &str) -> Result<Box<dyn HeldLock>, LockError> {
        let mutex = self.locks.entry(key.to_string()).or_default().clone();
        let guard = mutex.lock_owned().await;
        Ok(Box::new(LocalHeld {
            key: key.to_string(),
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }))
    }

    fn name(&self) -> &'static str {
        "local"
    }

    async fn shutdown(&self) -> Result<(), LockError> {
        let pending = self.locks.len();
        if pending > 0 {
            debug!(pending, "Local lock shut down with keys still held");
        }
        Ok(())
    }
}

struct LocalHeld {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<KeyMutexes>,
}

impl Drop for LocalHeld {
    fn drop(&mut self) {
        if self.guard.take().is_some() {
            // Only the map still references the mutex once nobody waits on it.
            self.locks
                .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}

#[async_trait]
impl HeldLock for LocalHeld {
    async fn release(self: Box<Self>) -> Result<(), LockError> {
        drop(self);
        Ok(())
    }
}
