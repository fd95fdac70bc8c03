//! Provider-keyed mutual exclusion with non-blocking try-acquire.
//!
//! "Report busy" is required behavior: callers must learn immediately
//! that a sync is already running, so a blocking lock is not a valid
//! implementation of this trait.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreResult;

/// Non-blocking, provider-keyed exclusive lock.
#[async_trait]
pub trait SyncLock: Send + Sync {
    /// Try to acquire the lock for a provider.  Returns `false`
    /// immediately when another holder has it; never blocks.
    async fn try_acquire(&self, provider_id: Uuid) -> StoreResult<bool>;

    /// Release a previously acquired lock.
    async fn release(&self, provider_id: Uuid) -> StoreResult<()>;

    /// Whether the lock is currently held by anyone.
    async fn is_held(&self, provider_id: Uuid) -> StoreResult<bool>;
}

/// In-process lock over a mutex-guarded set of provider ids.
#[derive(Debug, Default)]
pub struct MemorySyncLock {
    held: Mutex<HashSet<Uuid>>,
}

impl MemorySyncLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncLock for MemorySyncLock {
    async fn try_acquire(&self, provider_id: Uuid) -> StoreResult<bool> {
        let mut held = self.held.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(held.insert(provider_id))
    }

    async fn release(&self, provider_id: Uuid) -> StoreResult<()> {
        let mut held = self.held.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        held.remove(&provider_id);
        Ok(())
    }

    async fn is_held(&self, provider_id: Uuid) -> StoreResult<bool> {
        let held = self.held.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(held.contains(&provider_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_at_most_one_holder() {
        let lock = MemorySyncLock::new();
        let provider = Uuid::new_v4();

        assert!(lock.try_acquire(provider).await.unwrap());
        assert!(!lock.try_acquire(provider).await.unwrap());
        assert!(lock.is_held(provider).await.unwrap());

        lock.release(provider).await.unwrap();
        assert!(!lock.is_held(provider).await.unwrap());
        assert!(lock.try_acquire(provider).await.unwrap());
    }

    #[tokio::test]
    async fn test_locks_are_per_provider() {
        let lock = MemorySyncLock::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(lock.try_acquire(a).await.unwrap());
        assert!(lock.try_acquire(b).await.unwrap());
    }
}
