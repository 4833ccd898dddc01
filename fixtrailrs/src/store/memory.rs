//! In-process store for tests and offline use.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::watch;

use super::{RemoteStore, WatchRegistry, insert_at, normalize_path, segments, value_at};
use crate::error::SyncResult;

/// JSON tree held in memory.
///
/// Lock order is tree, then watchers.
#[derive(Default)]
pub struct MemoryStore {
    root: Mutex<Value>,
    watchers: Mutex<WatchRegistry>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `root`.
    pub fn with_root(root: Value) -> Self {
        let store = Self::default();
        *store.root.lock().unwrap_or_else(PoisonError::into_inner) = root;
        store
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Synchronous read that does not count towards `read_count`.
    pub fn peek(&self, path: &str) -> Option<Value> {
        let root = self.root.lock().unwrap_or_else(PoisonError::into_inner);
        value_at(&root, &segments(path)).cloned()
    }

    fn write(&self, path: &str, value: Value) {
        let path = normalize_path(path);
        let mut root = self.root.lock().unwrap_or_else(PoisonError::into_inner);
        insert_at(&mut root, &segments(&path), value);

        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        watchers.notify(&path, |watched| value_at(&root, &segments(watched)).cloned());
    }
}

impl RemoteStore for MemoryStore {
    async fn set(&self, path: &str, value: Value) -> SyncResult<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.write(path, value);
        Ok(())
    }

    async fn get(&self, path: &str) -> SyncResult<Option<Value>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.peek(path))
    }

    fn watch(&self, path: &str) -> SyncResult<watch::Receiver<Option<Value>>> {
        let root = self.root.lock().unwrap_or_else(PoisonError::into_inner);
        let current = value_at(&root, &segments(path)).cloned();
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(watchers.register(path, current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_counts() {
        let store = MemoryStore::new();
        store.set("realtime/a", json!([1, 2])).await.unwrap();

        assert_eq!(store.get("realtime/a").await.unwrap(), Some(json!([1, 2])));
        assert_eq!(store.get("realtime").await.unwrap(), Some(json!({"a": [1, 2]})));
        assert_eq!(store.get("realtime/b").await.unwrap(), None);
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.read_count(), 3);
    }

    #[tokio::test]
    async fn test_null_deletes() {
        let store = MemoryStore::new();
        store.set("realtime/a", json!(1)).await.unwrap();
        store.set("realtime/a", Value::Null).await.unwrap();
        assert_eq!(store.peek("realtime"), None);
    }

    #[tokio::test]
    async fn test_watch_sees_current_and_later_values() {
        let store = MemoryStore::with_root(json!({"realtime": {"a": [0]}}));
        let mut rx = store.watch("realtime/a").unwrap();
        assert_eq!(*rx.borrow_and_update(), Some(json!([0])));

        store.set("realtime/a", json!([0, 1])).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Some(json!([0, 1])));

        // Writes to an ancestor also reach the watcher
        store.set("realtime", json!({"a": [9]})).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Some(json!([9])));

        // Unrelated writes do not
        store.set("realtime/b", json!([5])).await.unwrap();
        assert!(!rx.has_changed().unwrap());
    }
}
