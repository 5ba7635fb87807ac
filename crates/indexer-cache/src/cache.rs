//! The aggregator cache and its flush scheduling.
//!
//! ## Scheduling
//!
//! At most one flush is armed at a time. Arming hands a cancellation token to
//! a long-lived worker task which waits `flush_timeout`, then runs
//! [`AggregatorCache::flush`]. A flush re-arms the schedule when it found work,
//! and clears it when the cache was empty; the next `store` arms it again.
//! Arming and disarming happen under the [`FLUSH_SCHEDULER_KEY`] lock.
//!
//! ## Flush barrier
//!
//! [`AggregatorCache::ensure_flush_complete`] resolves once no flush is in
//! progress. Lazy aggregate writes wait on it so they never merge into an
//! entry that is being replayed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use indexer_lock::LockService;
use indexer_types::{CacheSettings, CachedAggregateEntry};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backend::CacheBackend;
use crate::error::CacheError;
use crate::flusher::AggregateFlusher;

/// Lock key guarding flush schedule changes.
pub const FLUSH_SCHEDULER_KEY: &str = "aggregate-flusher";

/// Outcome of one flush cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Keys pending when the flush started
    pub keys: usize,
    /// Keys replayed successfully
    pub flushed: usize,
    /// Keys whose replay failed; they stay cached for the next cycle
    pub failed: usize,
}

struct CacheInner {
    backend: Arc<dyn CacheBackend>,
    lock: LockService,
    flusher: Weak<dyn AggregateFlusher>,
    flush_concurrency: usize,
    /// Token of the armed flush, if any.
    schedule: Mutex<Option<CancellationToken>>,
    arm_tx: mpsc::UnboundedSender<CancellationToken>,
    /// Number of flushes in progress.
    flushing: AtomicUsize,
    flush_done: Notify,
    shutdown: CancellationToken,
}

/// Write-behind cache of aggregate entries. Cheap to clone.
#[derive(Clone)]
pub struct AggregatorCache {
    inner: Arc<CacheInner>,
}

/// Marks a flush as in progress for its lifetime.
struct FlushingGuard<'a> {
    inner: &'a CacheInner,
}

impl<'a> FlushingGuard<'a> {
    fn enter(inner: &'a CacheInner) -> Self {
        inner.flushing.fetch_add(1, Ordering::SeqCst);
        Self { inner }
    }
}

impl Drop for FlushingGuard<'_> {
    fn drop(&mut self) {
        if self.inner.flushing.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.flush_done.notify_waiters();
        }
    }
}

impl AggregatorCache {
    /// Create the cache and start its flush worker.
    ///
    /// Must be called from within a tokio runtime. Nothing is armed until the
    /// first [`store`](Self::store) or [`schedule_flush`](Self::schedule_flush).
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        lock: LockService,
        settings: &CacheSettings,
        flusher: Weak<dyn AggregateFlusher>,
    ) -> Self {
        let (arm_tx, arm_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let inner = Arc::new(CacheInner {
            backend,
            lock,
            flusher,
            flush_concurrency: settings.flush_concurrency.max(1),
            schedule: Mutex::new(None),
            arm_tx,
            flushing: AtomicUsize::new(0),
            flush_done: Notify::new(),
            shutdown: shutdown.clone(),
        });

        tokio::spawn(run_flush_worker(
            Arc::downgrade(&inner),
            arm_rx,
            Duration::from_millis(settings.flush_timeout_ms),
            shutdown,
        ));

        info!(
            backend = inner.backend.name(),
            flush_timeout_ms = settings.flush_timeout_ms,
            "Aggregator cache started"
        );
        Self { inner }
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }

    /// Store an entry and arm a flush if none is armed.
    pub async fn store(&self, key: &str, entry: &CachedAggregateEntry) -> Result<(), CacheError> {
        self.inner.backend.store(key, entry).await?;
        trace!(key = %key, op = %entry.op_type, "Cached aggregate");
        if !self.is_flush_scheduled() {
            self.schedule_flush().await?;
        }
        Ok(())
    }

    pub async fn retrieve(&self, key: &str) -> Result<Option<CachedAggregateEntry>, CacheError> {
        self.inner.backend.retrieve(key).await
    }

    pub async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        self.inner.backend.remove(key).await
    }

    pub async fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.inner.backend.keys().await
    }

    pub fn is_flush_scheduled(&self) -> bool {
        self.schedule_slot().is_some()
    }

    pub fn is_flushing(&self) -> bool {
        self.inner.flushing.load(Ordering::SeqCst) > 0
    }

    /// Arm a flush unless one is already armed.
    pub async fn schedule_flush(&self) -> Result<(), CacheError> {
        self.inner
            .lock
            .using_lock(FLUSH_SCHEDULER_KEY, None, |_| async move {
                self.arm_if_idle();
                Ok::<_, CacheError>(())
            })
            .await
    }

    /// Cancel the armed flush, if any.
    pub async fn remove_flush_schedule(&self) -> Result<(), CacheError> {
        self.inner
            .lock
            .using_lock(FLUSH_SCHEDULER_KEY, None, |_| async move {
                if let Some(token) = self.schedule_slot().take() {
                    token.cancel();
                    debug!("Flush schedule removed");
                }
                Ok::<_, CacheError>(())
            })
            .await
    }

    /// Forget the flush that just fired and arm the next one.
    async fn reschedule(&self) -> Result<(), CacheError> {
        self.inner
            .lock
            .using_lock(FLUSH_SCHEDULER_KEY, None, |_| async move {
                self.schedule_slot().take();
                self.arm_if_idle();
                Ok::<_, CacheError>(())
            })
            .await
    }

    /// Replay every pending entry through the flusher.
    ///
    /// With `no_schedule` the schedule is cleared afterwards instead of
    /// re-armed; used on shutdown.
    pub async fn flush(&self, no_schedule: bool) -> Result<FlushReport, CacheError> {
        let _flushing = FlushingGuard::enter(&self.inner);
        let started = Instant::now();

        let outcome = self.replay_pending().await;
        let found_work = matches!(&outcome, Ok(report) if report.keys > 0);

        if no_schedule {
            self.remove_flush_schedule().await?;
        } else if matches!(&outcome, Ok(report) if report.keys == 0) {
            self.remove_flush_schedule().await?;
            // A store racing the empty scan saw the old schedule and did not arm.
            if !self.inner.backend.keys().await?.is_empty() {
                self.schedule_flush().await?;
            }
        } else {
            self.reschedule().await?;
        }

        let report = outcome?;
        if found_work {
            info!(
                keys = report.keys,
                flushed = report.flushed,
                failed = report.failed,
                elapsed_ms = started.elapsed().as_millis(),
                "Flushed aggregator cache"
            );
        }
        Ok(report)
    }

    async fn replay_pending(&self) -> Result<FlushReport, CacheError> {
        let keys = self.inner.backend.keys().await?;
        if keys.is_empty() {
            return Ok(FlushReport::default());
        }

        let Some(flusher) = self.inner.flusher.upgrade() else {
            warn!(keys = keys.len(), "No flusher attached, entries left in cache");
            return Ok(FlushReport {
                keys: keys.len(),
                flushed: 0,
                failed: keys.len(),
            });
        };

        let total = keys.len();
        let results: Vec<(String, anyhow::Result<()>)> = stream::iter(keys)
            .map(|key| {
                let flusher = Arc::clone(&flusher);
                async move {
                    let result = flusher.flush_aggregate(&key).await;
                    (key, result)
                }
            })
            .buffer_unordered(self.inner.flush_concurrency)
            .collect()
            .await;

        let mut report = FlushReport {
            keys: total,
            ..Default::default()
        };
        for (key, result) in results {
            match result {
                Ok(()) => report.flushed += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(key = %key, error = %e, "Failed to flush aggregate, will retry");
                }
            }
        }
        Ok(report)
    }

    /// Resolve once no flush is in progress.
    pub async fn ensure_flush_complete(&self) {
        loop {
            let notified = self.inner.flush_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_flushing() {
                return;
            }
            notified.await;
        }
    }

    /// Drain the cache: wait for a running flush, disarm, flush once more
    /// without re-arming, stop the worker and shut the backend down.
    pub async fn shutdown(&self) -> Result<FlushReport, CacheError> {
        self.ensure_flush_complete().await;
        self.remove_flush_schedule().await?;
        let report = self.flush(true).await?;
        self.inner.shutdown.cancel();
        self.inner.backend.shutdown().await?;
        info!(flushed = report.flushed, failed = report.failed, "Aggregator cache shut down");
        Ok(report)
    }

    fn schedule_slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.inner
            .schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn arm_if_idle(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let mut slot = self.schedule_slot();
        if slot.is_some() {
            return;
        }
        let token = CancellationToken::new();
        if self.inner.arm_tx.send(token.clone()).is_ok() {
            *slot = Some(token);
            trace!("Flush scheduled");
        }
    }
}

async fn run_flush_worker(
    inner: Weak<CacheInner>,
    mut arm_rx: mpsc::UnboundedReceiver<CancellationToken>,
    flush_timeout: Duration,
    shutdown: CancellationToken,
) {
    loop {
        let token = tokio::select! {
            _ = shutdown.cancelled() => break,
            armed = arm_rx.recv() => match armed {
                Some(token) => token,
                None => break,
            },
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = token.cancelled() => continue,
            _ = tokio::time::sleep(flush_timeout) => {}
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        let cache = AggregatorCache { inner };
        if let Err(e) = cache.flush(false).await {
            warn!(error = %e, "Scheduled flush failed");
        }
    }
    debug!("Flush worker stopped");
}
