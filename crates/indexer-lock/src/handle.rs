//! Handle to a held lock.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::warn;

use crate::backend::HeldLock;

/// Proof of ownership of a key.
///
/// Clones share the same underlying lock so a nested operation can be handed
/// the caller's handle instead of acquiring the key again. Release is
/// idempotent: only the first call reaches the backend.
#[derive(Clone)]
pub struct LockHandle {
    key: Arc<str>,
    held: Arc<Mutex<Option<Box<dyn HeldLock>>>>,
    acquired_at: Instant,
}

impl LockHandle {
    pub(crate) fn new(key: &str, held: Box<dyn HeldLock>) -> Self {
        Self {
            key: Arc::from(key),
            held: Arc::new(Mutex::new(Some(held))),
            acquired_at: Instant::now(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock. Failures are logged, never returned.
    pub async fn release(&self) {
        let held = self.held.lock().await.take();
        if let Some(held) = held {
            if let Err(e) = held.release().await {
                warn!(key = %self.key, error = %e, "Failed to release lock");
            }
        }
    }

    pub async fn is_released(&self) -> bool {
        self.held.lock().await.is_none()
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.key)
            .field("held_for_ms", &self.acquired_at.elapsed().as_millis())
            .finish()
    }
}
