//! SQLite-backed store used as a durable local mirror.
//!
//! Each row owns a disjoint subtree: no stored path is an ancestor of
//! another. A write below an existing row rewrites that row; a write above
//! existing rows replaces them.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use log::info;
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};
use serde_json::Value;
use tokio::sync::watch;

use super::{RemoteStore, WatchRegistry, insert_at, is_empty_value, normalize_path, segments, value_at};
use crate::error::{SyncError, SyncResult};

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "CREATE TABLE nodes (
                path TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        ),
        M::up("CREATE INDEX idx_nodes_updated_at ON nodes(updated_at);"),
    ])
}

fn db_error(e: rusqlite::Error) -> SyncError {
    SyncError::Unavailable(format!("sqlite: {}", e))
}

fn malformed(path: &str, e: serde_json::Error) -> SyncError {
    SyncError::Malformed {
        path: path.to_string(),
        message: e.to_string(),
    }
}

/// Store persisted in a single SQLite table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    watchers: Mutex<WatchRegistry>,
}

impl SqliteStore {
    /// Open (or create) a store at `db_path`, applying pending migrations.
    pub fn open(db_path: impl AsRef<Path>) -> SyncResult<Self> {
        let conn = Connection::open(db_path.as_ref()).map_err(db_error)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> SyncResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> SyncResult<Self> {
        migrations()
            .to_latest(&mut conn)
            .map_err(|e| SyncError::Unavailable(format!("migration failed: {}", e)))?;
        info!("[SqliteStore] Schema ready");

        Ok(Self {
            conn: Mutex::new(conn),
            watchers: Mutex::new(WatchRegistry::default()),
        })
    }

    /// Number of stored rows.
    pub fn row_count(&self) -> SyncResult<usize> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))
            .map_err(db_error)?;
        Ok(count as usize)
    }

    fn write(&self, path: &str, value: Value) -> SyncResult<()> {
        let path = normalize_path(path);
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        write_node(&mut conn, &path, value)?;

        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        watchers.notify(&path, |watched| read_node(&conn, watched).ok().flatten());
        Ok(())
    }

    fn read(&self, path: &str) -> SyncResult<Option<Value>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        read_node(&conn, &normalize_path(path))
    }
}

/// Stored row that is `path` or one of its ancestors.
fn covering_row(conn: &Connection, path: &str) -> SyncResult<Option<(String, Value)>> {
    let parts = segments(path);
    let mut stmt = conn
        .prepare_cached("SELECT value FROM nodes WHERE path = ?1")
        .map_err(db_error)?;

    for depth in 0..=parts.len() {
        let candidate = parts[..depth].join("/");
        let raw: Option<String> = stmt
            .query_row(params![candidate], |row| row.get(0))
            .optional()
            .map_err(db_error)?;
        if let Some(raw) = raw {
            let value = serde_json::from_str(&raw).map_err(|e| malformed(&candidate, e))?;
            return Ok(Some((candidate, value)));
        }
    }
    Ok(None)
}

fn relative<'a>(path: &'a str, ancestor: &str) -> Vec<&'a str> {
    let skip = segments(ancestor).len();
    segments(path).into_iter().skip(skip).collect()
}

fn put_row(conn: &Connection, path: &str, value: &Value) -> SyncResult<()> {
    if is_empty_value(value) {
        conn.execute("DELETE FROM nodes WHERE path = ?1", params![path])
            .map_err(db_error)?;
    } else {
        conn.execute(
            "INSERT OR REPLACE INTO nodes (path, value, updated_at) VALUES (?1, ?2, ?3)",
            params![path, value.to_string(), Utc::now().timestamp_millis()],
        )
        .map_err(db_error)?;
    }
    Ok(())
}

fn delete_subtree(conn: &Connection, path: &str) -> SyncResult<()> {
    if path.is_empty() {
        conn.execute("DELETE FROM nodes", []).map_err(db_error)?;
    } else {
        conn.execute(
            "DELETE FROM nodes WHERE path = ?1 OR substr(path, 1, length(?1) + 1) = ?1 || '/'",
            params![path],
        )
        .map_err(db_error)?;
    }
    Ok(())
}

fn write_node(conn: &mut Connection, path: &str, value: Value) -> SyncResult<()> {
    let tx = conn.transaction().map_err(db_error)?;

    match covering_row(&tx, path)? {
        Some((ancestor, mut stored)) => {
            insert_at(&mut stored, &relative(path, &ancestor), value);
            put_row(&tx, &ancestor, &stored)?;
        }
        None => {
            delete_subtree(&tx, path)?;
            put_row(&tx, path, &value)?;
        }
    }

    tx.commit().map_err(db_error)
}

fn read_node(conn: &Connection, path: &str) -> SyncResult<Option<Value>> {
    if let Some((ancestor, stored)) = covering_row(conn, path)? {
        return Ok(value_at(&stored, &relative(path, &ancestor)).cloned());
    }

    // Assemble the subtree from descendant rows
    let mut stmt = conn
        .prepare_cached(
            "SELECT path, value FROM nodes
             WHERE ?1 = '' OR substr(path, 1, length(?1) + 1) = ?1 || '/'",
        )
        .map_err(db_error)?;
    let rows = stmt
        .query_map(params![path], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(db_error)?;

    let mut tree = Value::Null;
    for row in rows {
        let (row_path, raw) = row.map_err(db_error)?;
        let value: Value = serde_json::from_str(&raw).map_err(|e| malformed(&row_path, e))?;
        insert_at(&mut tree, &relative(&row_path, path), value);
    }

    Ok(if is_empty_value(&tree) { None } else { Some(tree) })
}

impl RemoteStore for SqliteStore {
    async fn set(&self, path: &str, value: Value) -> SyncResult<()> {
        self.write(path, value)
    }

    async fn get(&self, path: &str) -> SyncResult<Option<Value>> {
        self.read(path)
    }

    fn watch(&self, path: &str) -> SyncResult<watch::Receiver<Option<Value>>> {
        let current = self.read(path)?;
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(watchers.register(path, current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_migrations_valid() {
        assert!(migrations().validate().is_ok());
    }

    #[tokio::test]
    async fn test_write_below_existing_row() {
        let store = SqliteStore::in_memory().unwrap();
        store.set("history/2025-01-01", json!({"s1": [1]})).await.unwrap();
        store.set("history/2025-01-01/s2", json!([2])).await.unwrap();

        assert_eq!(store.row_count().unwrap(), 1);
        assert_eq!(
            store.get("history/2025-01-01").await.unwrap(),
            Some(json!({"s1": [1], "s2": [2]}))
        );
        assert_eq!(store.get("history/2025-01-01/s2").await.unwrap(), Some(json!([2])));
    }

    #[tokio::test]
    async fn test_write_above_existing_rows() {
        let store = SqliteStore::in_memory().unwrap();
        store.set("history/2025-01-01/s1", json!([1])).await.unwrap();
        store.set("history/2025-01-01/s2", json!([2])).await.unwrap();
        store.set("history/2025-01-02/s3", json!([3])).await.unwrap();
        assert_eq!(store.row_count().unwrap(), 3);

        assert_eq!(
            store.get("history").await.unwrap(),
            Some(json!({
                "2025-01-01": {"s1": [1], "s2": [2]},
                "2025-01-02": {"s3": [3]}
            }))
        );

        store.set("history/2025-01-01", json!([9])).await.unwrap();
        assert_eq!(store.row_count().unwrap(), 2);
        assert_eq!(store.get("history/2025-01-01").await.unwrap(), Some(json!([9])));
        assert_eq!(store.get("history/2025-01-01/s1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_via_null() {
        let store = SqliteStore::in_memory().unwrap();
        store.set("realtime/a", json!({"x": 1})).await.unwrap();
        store.set("realtime/a/x", Value::Null).await.unwrap();
        assert_eq!(store.row_count().unwrap(), 0);
        assert_eq!(store.get("realtime/a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_prefix_does_not_match_sibling() {
        let store = SqliteStore::in_memory().unwrap();
        store.set("realtime/ab", json!(1)).await.unwrap();
        store.set("realtime/a", Value::Null).await.unwrap();
        assert_eq!(store.get("realtime/ab").await.unwrap(), Some(json!(1)));
        assert_eq!(store.get("realtime/a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_watch() {
        let store = SqliteStore::in_memory().unwrap();
        let mut rx = store.watch("history/2025-01-01").unwrap();
        assert_eq!(*rx.borrow_and_update(), None);

        store.set("history/2025-01-01/s1", json!([1])).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Some(json!({"s1": [1]})));
    }
}
