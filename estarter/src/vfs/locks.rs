//! Lazy per-physical-path mutex table.
//!
//! Mutexes are created on first access and handed out as `Arc`s, so a
//! pruned table entry never invalidates a mutex somebody still holds.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

/// Prune the table once it grows past this many entries.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Default)]
pub struct PathLockMap {
    locks: parking_lot::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutex guarding one physical path, created on first access.
    pub fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();

        if locks.len() >= PRUNE_THRESHOLD {
            // Entries with no outside holder are safe to drop; an Arc still
            // held elsewhere keeps its mutex alive regardless.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }

        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_path_same_mutex() {
        let map = PathLockMap::new();
        let a = map.lock_for(Path::new("/vfs/appdata/a/x"));
        let b = map.lock_for(Path::new("/vfs/appdata/a/x"));
        assert!(Arc::ptr_eq(&a, &b));

        let c = map.lock_for(Path::new("/vfs/appdata/a/y"));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_lock_serializes_access() {
        let map = Arc::new(PathLockMap::new());
        let lock = map.lock_for(Path::new("/vfs/x"));

        let guard = lock.lock().await;
        let second = map.lock_for(Path::new("/vfs/x"));
        assert!(second.try_lock().is_err());
        drop(guard);
        assert!(second.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks_valid() {
        let map = PathLockMap::new();
        let held = map.lock_for(Path::new("/held"));
        let guard = held.lock().await;

        // Flood the table past the prune threshold with idle entries.
        for i in 0..(PRUNE_THRESHOLD + 10) {
            let _ = map.lock_for(Path::new(&format!("/idle/{}", i)));
        }

        // Idle entries were pruned, the held one survived.
        assert!(map.len() < PRUNE_THRESHOLD + 11);
        let again = map.lock_for(Path::new("/held"));
        assert!(Arc::ptr_eq(&held, &again));
        drop(guard);
    }
}
