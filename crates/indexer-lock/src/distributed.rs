//! Distributed lock backend.
//!
//! A lock is a lease stored under `lock:{key}` in the shared key-value
//! service, valued with a random owner token. Acquisition retries a bounded
//! number of times with a constant delay, and release only deletes the lease
//! while it still carries the owner's token.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use indexer_kv::KvClient;
use indexer_types::LockSettings;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::backend::{HeldLock, LockBackend};
use crate::error::LockError;

/// Lock backend shared across processes.
pub struct DistributedLock {
    kv: Arc<dyn KvClient>,
    lease: Duration,
    retries: u32,
    delay: Duration,
}

impl DistributedLock {
    pub fn new(kv: Arc<dyn KvClient>, settings: &LockSettings) -> Self {
        Self {
            kv,
            lease: Duration::from_millis(settings.timeout_ms),
            retries: settings.retries,
            delay: Duration::from_millis(settings.delay_ms),
        }
    }

    fn retry_policy(&self) -> ExponentialBackoff {
        let mut policy = ExponentialBackoff {
            current_interval: self.delay,
            initial_interval: self.delay,
            max_interval: self.delay,
            multiplier: 1.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        policy.reset();
        policy
    }
}

fn lease_key(key: &str) -> String {
    format!("lock:{key}")
}

#[async_trait]
impl LockBackend for DistributedLock {
    async fn acquire(&self, key: &str) -> Result<Box<dyn HeldLock>, LockError> {
        let token = Uuid::new_v4().to_string();
        let lease = lease_key(key);
        let mut policy = self.retry_policy();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let acquired = self
                .kv
                .set_if_absent(&lease, token.clone(), self.lease)
                .await
                .map_err(|e| LockError::Backend {
                    key: key.to_string(),
                    message: e.to_string(),
                })?;

            if acquired {
                trace!(key = %key, attempts, "Acquired distributed lock");
                return Ok(Box::new(DistributedHeld {
                    kv: Arc::clone(&self.kv),
                    key: key.to_string(),
                    token,
                    released: false,
                }));
            }

            if attempts > self.retries {
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    attempts,
                });
            }

            let wait = policy.next_backoff().unwrap_or(self.delay);
            debug!(key = %key, attempt = attempts, wait_ms = wait.as_millis(), "Lock busy, retrying");
            tokio::time::sleep(wait).await;
        }
    }

    fn name(&self) -> &'static str {
        "distributed"
    }
}

struct DistributedHeld {
    kv: Arc<dyn KvClient>,
    key: String,
    token: String,
    released: bool,
}

impl Drop for DistributedHeld {
    fn drop(&mut self) {
        if !self.released {
            debug!(key = %self.key, "Distributed lock dropped without release; lease will expire");
        }
    }
}

#[async_trait]
impl HeldLock for DistributedHeld {
    async fn release(mut self: Box<Self>) -> Result<(), LockError> {
        self.released = true;
        let removed = self
            .kv
            .delete_if_equals(&lease_key(&self.key), &self.token)
            .await
            .map_err(|e| LockError::Backend {
                key: self.key.clone(),
                message: e.to_string(),
            })?;
        if !removed {
            warn!(key = %self.key, "Lease expired before release");
        }
        Ok(())
    }
}
