//! Keyed async mutexes.
//!
//! One `tokio::sync::Mutex` per key, created on first use. Guards are owned so
//! they can be held across `.await` points and moved into tasks.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A registry of per-key mutexes.
pub struct KeyedLocks<K> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    fn handle(&self, key: &K) -> Arc<Mutex<()>> {
        // The map shard lock is released before the caller awaits.
        self.locks.entry(key.clone()).or_default().value().clone()
    }

    /// Wait for the lock on `key`.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        self.handle(key).lock_owned().await
    }

    /// Wait at most `timeout` for the lock on `key`.
    ///
    /// Returns `None` when the lock was not acquired in time.
    pub async fn lock_timeout(&self, key: &K, timeout: Duration) -> Option<OwnedMutexGuard<()>> {
        tokio::time::timeout(timeout, self.handle(key).lock_owned())
            .await
            .ok()
    }

    /// Drop mutexes nobody holds or waits on.
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of keys with a live mutex.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no key has a live mutex.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K> fmt::Debug for KeyedLocks<K>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLocks")
            .field("keys", &self.locks.len())
            .finish()
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = KeyedLocks::new();
        let guard = locks.lock(&"wallet-a").await;

        let second = locks
            .lock_timeout(&"wallet-a", Duration::from_millis(20))
            .await;
        assert!(second.is_none());

        drop(guard);
        let third = locks
            .lock_timeout(&"wallet-a", Duration::from_millis(20))
            .await;
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock(&1u32).await;
        let b = locks.lock_timeout(&2u32, Duration::from_millis(20)).await;
        assert!(b.is_some());
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let locks = KeyedLocks::new();
        let held = locks.lock(&"held").await;
        drop(locks.lock(&"idle").await);
        assert_eq!(locks.len(), 2);

        locks.prune();
        assert_eq!(locks.len(), 1);

        drop(held);
        locks.prune();
        assert!(locks.is_empty());
    }
}
