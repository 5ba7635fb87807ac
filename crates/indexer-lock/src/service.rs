//! Lock service: acquisition, scoped execution and re-entrancy.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexer_kv::KvClient;
use indexer_types::LockSettings;
use tracing::{info, trace, warn};

use crate::backend::LockBackend;
use crate::distributed::DistributedLock;
use crate::error::LockError;
use crate::handle::LockHandle;
use crate::local::LocalLock;

/// Keyed lock service shared by the indexer and the aggregator cache.
#[derive(Clone)]
pub struct LockService {
    backend: Arc<dyn LockBackend>,
}

impl LockService {
    pub fn new(backend: Arc<dyn LockBackend>) -> Self {
        Self { backend }
    }

    /// Service over an in-process [`LocalLock`].
    pub fn local() -> Self {
        Self::new(Arc::new(LocalLock::new()))
    }

    /// Service over a [`DistributedLock`] in the given key-value service.
    pub fn distributed(kv: Arc<dyn KvClient>, settings: &LockSettings) -> Self {
        Self::new(Arc::new(DistributedLock::new(kv, settings)))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Wait for exclusive ownership of `key`.
    pub async fn acquire(&self, key: &str) -> Result<LockHandle, LockError> {
        let started = Instant::now();
        let held = self.backend.acquire(key).await.map_err(|e| {
            warn!(key = %e.key(), error = %e, "Lock acquisition failed");
            e
        })?;
        trace!(key = %key, wait_ms = started.elapsed().as_millis(), "Acquired lock");
        Ok(LockHandle::new(key, held))
    }

    /// Run `operation` while holding `key`.
    ///
    /// With `existing` set the operation runs under the caller's handle and
    /// nothing is acquired or released here.
    pub async fn using_lock<T, E, F, Fut>(
        &self,
        key: &str,
        existing: Option<&LockHandle>,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnOnce(LockHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        self.using_lock_with(key, existing, operation, |_| {}).await
    }

    /// Like [`using_lock`](Self::using_lock), reporting the time from
    /// acquisition to release to `on_complete` after a successful operation.
    pub async fn using_lock_with<T, E, F, Fut, C>(
        &self,
        key: &str,
        existing: Option<&LockHandle>,
        operation: F,
        on_complete: C,
    ) -> Result<T, E>
    where
        F: FnOnce(LockHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
        C: FnOnce(Duration),
    {
        if let Some(handle) = existing {
            return operation(handle.clone()).await;
        }

        let started = Instant::now();
        let handle = self.acquire(key).await?;
        let result = operation(handle.clone()).await;
        handle.release().await;

        let elapsed = started.elapsed();
        trace!(key = %key, elapsed_ms = elapsed.as_millis(), "Released lock");
        if result.is_ok() {
            on_complete(elapsed);
        }
        result
    }

    pub async fn shutdown(&self) -> Result<(), LockError> {
        self.backend.shutdown().await?;
        info!(backend = self.backend.name(), "Lock service shut down");
        Ok(())
    }
}
