// MIT License - Copyright (c) 2026 rnet contributors

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::path::RnetPath;

/// A cached data value and when it was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue {
    pub data: Vec<u8>,
    pub stored_at: Instant,
}

/// Path-addressed data cache of one device.
#[derive(Debug, Default)]
pub struct DataStore {
    entries: Mutex<HashMap<RnetPath, CachedValue>>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &RnetPath) -> Option<CachedValue> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    /// The cached data, unless it is older than `lifetime`.
    pub fn get_fresh(&self, path: &RnetPath, lifetime: Duration) -> Option<Vec<u8>> {
        self.get(path)
            .filter(|v| v.stored_at.elapsed() <= lifetime)
            .map(|v| v.data)
    }

    /// Replace the cached value. Returns whether the data differs from what
    /// was cached before.
    pub fn store(&self, path: RnetPath, data: Vec<u8>) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let changed = entries.get(&path).is_none_or(|old| old.data != data);
        entries.insert(
            path,
            CachedValue {
                data,
                stored_at: Instant::now(),
            },
        );
        changed
    }

    pub fn invalidate(&self, path: &RnetPath) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }

    /// Cached paths, sorted.
    pub fn paths(&self) -> Vec<RnetPath> {
        let mut paths: Vec<RnetPath> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        paths.sort();
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(segments: &[u8]) -> RnetPath {
        RnetPath::new(segments).unwrap()
    }

    #[test]
    fn test_store_reports_changes() {
        let store = DataStore::new();
        assert!(store.store(path(&[1]), vec![1, 2]));
        assert!(!store.store(path(&[1]), vec![1, 2]));
        assert!(store.store(path(&[1]), vec![3]));
        assert_eq!(store.get(&path(&[1])).unwrap().data, vec![3]);
    }

    #[test]
    fn test_invalidate() {
        let store = DataStore::new();
        store.store(path(&[2, 1]), vec![9]);
        store.invalidate(&path(&[2, 1]));
        assert!(store.get(&path(&[2, 1])).is_none());
        // A value stored again after invalidation counts as a change
        assert!(store.store(path(&[2, 1]), vec![9]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let store = DataStore::new();
        store.store(path(&[3]), vec![0x41]);
        let lifetime = Duration::from_secs(30);
        assert_eq!(store.get_fresh(&path(&[3]), lifetime), Some(vec![0x41]));
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(store.get_fresh(&path(&[3]), lifetime), None);
        assert!(store.get(&path(&[3])).is_some());
    }

    #[test]
    fn test_paths_sorted() {
        let store = DataStore::new();
        store.store(path(&[2]), vec![]);
        store.store(path(&[1, 5]), vec![]);
        store.store(path(&[1]), vec![]);
        assert_eq!(store.paths(), vec![path(&[1]), path(&[1, 5]), path(&[2])]);
    }
}
