//! In-process key-value service.
//!
//! Values are strings with an optional expiry. Expired values are treated as
//! absent and evicted lazily on access.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::{KvClient, KvError};

struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Thread-safe in-memory [`KvClient`].
#[derive(Default)]
pub struct MemoryKv {
    slots: DashMap<String, Slot>,
    closed: AtomicBool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.iter().filter(|s| s.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_open(&self) -> Result<(), KvError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(KvError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvClient for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.ensure_open()?;
        let now = Instant::now();
        let value = self
            .slots
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value.clone());
        if value.is_none() {
            self.slots.remove_if(key, |_, slot| !slot.is_live(now));
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), KvError> {
        self.ensure_open()?;
        self.slots.insert(
            key.to_string(),
            Slot {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<bool, KvError> {
        self.ensure_open()?;
        let now = Instant::now();
        let slot = Slot {
            value,
            expires_at: Some(now + ttl),
        };
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    Ok(false)
                } else {
                    debug!(key = %key, "Replacing expired value");
                    occupied.insert(slot);
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        self.ensure_open()?;
        let now = Instant::now();
        Ok(self
            .slots
            .remove(key)
            .is_some_and(|(_, slot)| slot.is_live(now)))
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        self.ensure_open()?;
        let now = Instant::now();
        Ok(self
            .slots
            .remove_if(key, |_, slot| slot.value == expected && slot.is_live(now))
            .is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .slots
            .iter()
            .filter(|slot| slot.key().starts_with(prefix) && slot.is_live(now))
            .map(|slot| slot.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn shutdown(&self) -> Result<(), KvError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
