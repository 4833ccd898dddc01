//! Remote key-path store abstraction.
//!
//! The store is a JSON tree addressed by `/`-separated paths. Writing
//! `null` (or an empty object) deletes a subtree and prunes parents left
//! empty. Watchers receive the latest value at their path whenever a write
//! touches that path, one of its ancestors, or one of its descendants.

use std::future::Future;

use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::error::SyncResult;

pub mod http;
pub mod memory;
pub mod sqlite;

pub use http::FirebaseStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Root for live mirrored sessions.
pub const REALTIME_ROOT: &str = "realtime";
/// Root for date-bucketed archives.
pub const HISTORY_ROOT: &str = "history";

/// Push/read/watch contract of a realtime key-path store.
pub trait RemoteStore: Send + Sync + 'static {
    /// Replace the subtree at `path`.
    fn set(&self, path: &str, value: Value) -> impl Future<Output = SyncResult<()>> + Send;

    /// Read the subtree at `path`, `None` when nothing is stored there.
    fn get(&self, path: &str) -> impl Future<Output = SyncResult<Option<Value>>> + Send;

    /// Latest-value channel for `path`, seeded with the current value where
    /// the backend can read it synchronously.
    fn watch(&self, path: &str) -> SyncResult<watch::Receiver<Option<Value>>>;
}

pub fn realtime_path(session_id: &str) -> String {
    format!("{}/{}", REALTIME_ROOT, session_id)
}

pub fn history_path(date_key: &str) -> String {
    format!("{}/{}", HISTORY_ROOT, date_key)
}

pub fn session_archive_path(date_key: &str, session_id: &str) -> String {
    format!("{}/{}/{}", HISTORY_ROOT, date_key, session_id)
}

// ============================================================================
// Path and tree helpers
// ============================================================================

pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Canonical form: no leading, trailing or doubled slashes.
pub fn normalize_path(path: &str) -> String {
    segments(path).join("/")
}

/// True when one path is the other or an ancestor of it.
pub fn paths_overlap(a: &str, b: &str) -> bool {
    let a = segments(a);
    let b = segments(b);
    let n = a.len().min(b.len());
    a[..n] == b[..n]
}

/// Null, `{}` and `[]` all mean "nothing stored".
pub(crate) fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

pub(crate) fn value_at<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut node = root;
    for segment in path {
        node = match node {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    if is_empty_value(node) { None } else { Some(node) }
}

/// Write `value` at `path` below `root`, deleting on empty values and
/// pruning parents that become empty.
pub(crate) fn insert_at(root: &mut Value, path: &[&str], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        *root = if is_empty_value(&value) {
            Value::Null
        } else {
            value
        };
        return;
    };

    if is_empty_value(&value) {
        // Deleting below a missing or scalar node is a no-op
        let Value::Object(map) = root else { return };
        if rest.is_empty() {
            map.remove(*first);
        } else if let Some(child) = map.get_mut(*first) {
            insert_at(child, rest, value);
            if child.is_null() {
                map.remove(*first);
            }
        }
        if map.is_empty() {
            *root = Value::Null;
        }
        return;
    }

    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
    if let Value::Object(map) = root {
        let child = map.entry(first.to_string()).or_insert(Value::Null);
        insert_at(child, rest, value);
    }
}

// ============================================================================
// Watchers
// ============================================================================

/// Path-keyed set of latest-value senders shared by local backends.
#[derive(Default)]
pub(crate) struct WatchRegistry {
    watchers: Vec<(String, watch::Sender<Option<Value>>)>,
}

impl WatchRegistry {
    pub fn register(&mut self, path: &str, current: Option<Value>) -> watch::Receiver<Option<Value>> {
        let (tx, rx) = watch::channel(current);
        self.watchers.push((normalize_path(path), tx));
        rx
    }

    /// Refresh every watcher whose path overlaps `changed`.
    ///
    /// `read` returns the current value for a watched path. Receivers only
    /// wake when their value actually differs.
    pub fn notify<F>(&mut self, changed: &str, mut read: F)
    where
        F: FnMut(&str) -> Option<Value>,
    {
        self.watchers.retain(|(_, tx)| !tx.is_closed());

        for (path, tx) in &self.watchers {
            if !paths_overlap(path, changed) {
                continue;
            }
            let latest = read(path);
            tx.send_if_modified(|current| {
                if *current != latest {
                    *current = latest;
                    true
                } else {
                    false
                }
            });
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.watchers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_helpers() {
        assert_eq!(realtime_path("abc"), "realtime/abc");
        assert_eq!(history_path("2025-01-01"), "history/2025-01-01");
        assert_eq!(
            session_archive_path("2025-01-01", "s1"),
            "history/2025-01-01/s1"
        );
        assert_eq!(normalize_path("/history//2025-01-01/"), "history/2025-01-01");
    }

    #[test]
    fn test_paths_overlap() {
        assert!(paths_overlap("history", "history/2025-01-01"));
        assert!(paths_overlap("history/2025-01-01/s1", "history"));
        assert!(paths_overlap("a/b", "/a/b/"));
        assert!(paths_overlap("", "anything"));
        assert!(!paths_overlap("history/2025-01-01", "history/2025-01-02"));
        assert!(!paths_overlap("realtime/ab", "realtime/abc"));
    }

    #[test]
    fn test_insert_and_read() {
        let mut root = Value::Null;
        insert_at(&mut root, &["history", "2025-01-01", "s1"], json!([1, 2]));
        insert_at(&mut root, &["history", "2025-01-01", "s2"], json!([3]));

        assert_eq!(
            value_at(&root, &["history", "2025-01-01", "s1"]),
            Some(&json!([1, 2]))
        );
        assert_eq!(value_at(&root, &["history", "2025-01-01", "s1", "1"]), Some(&json!(2)));
        assert_eq!(
            value_at(&root, &["history", "2025-01-01"]),
            Some(&json!({"s1": [1, 2], "s2": [3]}))
        );
        assert_eq!(value_at(&root, &["history", "2025-01-02"]), None);
    }

    #[test]
    fn test_insert_overwrites_subtree() {
        let mut root = json!({"a": {"b": 1, "c": 2}});
        insert_at(&mut root, &["a"], json!({"d": 3}));
        assert_eq!(root, json!({"a": {"d": 3}}));

        // Writing below a scalar replaces it with an object
        insert_at(&mut root, &["a", "d", "e"], json!(4));
        assert_eq!(root, json!({"a": {"d": {"e": 4}}}));
    }

    #[test]
    fn test_delete_prunes_empty_parents() {
        let mut root = json!({"history": {"2025-01-01": {"s1": [1]}}, "realtime": {"x": 1}});
        insert_at(&mut root, &["history", "2025-01-01", "s1"], Value::Null);
        assert_eq!(root, json!({"realtime": {"x": 1}}));

        insert_at(&mut root, &["realtime", "x"], json!({}));
        assert_eq!(root, Value::Null);

        // Deleting something absent changes nothing
        let mut root = json!({"a": 1});
        insert_at(&mut root, &["b", "c"], Value::Null);
        assert_eq!(root, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_registry_notifies_overlapping_paths_only() {
        let mut registry = WatchRegistry::default();
        let mut day = registry.register("history/2025-01-01", None);
        let mut other = registry.register("history/2025-01-02", None);

        registry.notify("history/2025-01-01/s1", |path| {
            (path == "history/2025-01-01").then(|| json!({"s1": []}))
        });

        assert!(day.has_changed().unwrap());
        assert_eq!(*day.borrow_and_update(), Some(json!({"s1": []})));
        assert!(!other.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_registry_prunes_dropped_receivers() {
        let mut registry = WatchRegistry::default();
        let rx = registry.register("realtime/a", None);
        let _kept = registry.register("realtime/b", None);
        drop(rx);

        registry.notify("realtime", |_| None);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_registry_skips_unchanged_values() {
        let mut registry = WatchRegistry::default();
        let mut rx = registry.register("realtime/a", Some(json!(1)));
        registry.notify("realtime/a", |_| Some(json!(1)));
        assert!(!rx.has_changed().unwrap());
        registry.notify("realtime/a", |_| Some(json!(2)));
        assert!(rx.has_changed().unwrap());
    }
}
