//! Keyed async locks
//!
//! One mutex per (destination, filename) target. Entries are held weakly and
//! pruned when no guard or waiter references them anymore.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Key = (PathBuf, String);

/// Per-target mutual exclusion for finalize, cancel and the sweeper
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<Key, Weak<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, destination: &Path, filename: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        locks.retain(|_, weak| weak.strong_count() > 0);

        let key = (destination.to_path_buf(), filename.to_string());
        if let Some(existing) = locks.get(&key).and_then(Weak::upgrade) {
            return existing;
        }

        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(key, Arc::downgrade(&lock));
        lock
    }

    /// Wait for the lock of a target; released when the guard drops
    pub async fn lock(&self, destination: &Path, filename: &str) -> OwnedMutexGuard<()> {
        self.entry(destination, filename).lock_owned().await
    }

    /// Take the lock only if nobody holds it
    pub fn try_lock(&self, destination: &Path, filename: &str) -> Option<OwnedMutexGuard<()>> {
        self.entry(destination, filename).try_lock_owned().ok()
    }

    /// Number of targets currently locked or awaited
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = KeyedLocks::new();
        let dest = Path::new("/data/p1");

        let guard = locks.lock(dest, "a.txt").await;
        assert!(locks.try_lock(dest, "a.txt").is_none());
        assert!(locks.try_lock(dest, "b.txt").is_some());
        assert!(locks.try_lock(Path::new("/data/p2"), "a.txt").is_some());

        drop(guard);
        assert!(locks.try_lock(dest, "a.txt").is_some());
    }

    #[tokio::test]
    async fn test_waiter_proceeds_after_release() {
        let locks = Arc::new(KeyedLocks::new());
        let dest = PathBuf::from("/data/p1");

        let guard = locks.lock(&dest, "a.txt").await;

        let waiter = {
            let locks = locks.clone();
            let dest = dest.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&dest, "a.txt").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_entries_are_pruned() {
        let locks = KeyedLocks::new();
        let dest = Path::new("/data/p1");

        {
            let _a = locks.lock(dest, "a.txt").await;
            let _b = locks.lock(dest, "b.txt").await;
            assert_eq!(locks.len(), 2);
        }

        assert!(locks.is_empty());
    }
}
