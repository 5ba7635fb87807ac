//! Lock backend seam.

use async_trait::async_trait;

use crate::error::LockError;

/// A lock that is currently held. Releasing consumes it.
#[async_trait]
pub trait HeldLock: Send + Sync {
    async fn release(self: Box<Self>) -> Result<(), LockError>;
}

/// Something that can hand out exclusive ownership of a key.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Wait for exclusive ownership of `key`.
    async fn acquire(&self, key: &str) -> Result<Box<dyn HeldLock>, LockError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    async fn shutdown(&self) -> Result<(), LockError> {
        Ok(())
    }
}
