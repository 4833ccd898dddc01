//! Push/subscribe/read client over a [`RemoteStore`].
//!
//! Every store call is bounded by [`SyncConfig::timeout`]; an elapsed call
//! resolves as [`SyncError::Unavailable`]. Subscriptions are explicit
//! latest-value channels: consumers pull values and treat each one as a
//! full replacement, never a delta.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use fixtrail::Fix;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bucket::{DateKey, HistoryBucket, is_session_map};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::store::{RemoteStore, history_path, normalize_path, realtime_path, session_archive_path};

/// Session entry holding points found in an array or legacy bucket when a
/// session is first archived into it.
pub const IMPORTED_SESSION_ID: &str = "imported";

/// How far local fixes at a path have been mirrored remotely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Highest sequence confirmed written, `None` before the first ack
    pub last_acked_sequence: Option<u64>,
    /// Fixes written locally but not yet acknowledged
    pub pending_count: usize,
}

/// Client for the remote store shared by tracking and history.
pub struct SyncClient<S: RemoteStore> {
    store: Arc<S>,
    config: SyncConfig,
    states: Mutex<HashMap<String, SyncState>>,
}

impl<S: RemoteStore> SyncClient<S> {
    pub fn new(store: Arc<S>, config: SyncConfig) -> Self {
        Self {
            store,
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    async fn bounded<T>(
        &self,
        path: &str,
        call: impl Future<Output = SyncResult<T>>,
    ) -> SyncResult<T> {
        match tokio::time::timeout(self.config.timeout(), call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "[SyncClient] {} timed out after {} ms",
                    path, self.config.timeout_ms
                );
                Err(SyncError::Unavailable(format!(
                    "timed out after {} ms",
                    self.config.timeout_ms
                )))
            }
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Overwrite the value at `path`.
    pub async fn push(&self, path: &str, value: Value) -> SyncResult<()> {
        self.bounded(path, self.store.set(path, value)).await
    }

    /// Mirror a full fix sequence to `path`, tracking its [`SyncState`].
    pub async fn push_fixes(&self, path: &str, fixes: &[Fix]) -> SyncResult<()> {
        let key = normalize_path(path);
        let last_sequence = fixes.last().map(|f| f.sequence);

        self.update_state(&key, |state| {
            state.pending_count = match state.last_acked_sequence {
                Some(acked) => fixes.iter().filter(|f| f.sequence > acked).count(),
                None => fixes.len(),
            };
        });

        let value = serde_json::to_value(fixes).map_err(|e| SyncError::Malformed {
            path: key.clone(),
            message: e.to_string(),
        })?;
        self.push(&key, value).await?;

        self.update_state(&key, |state| {
            if last_sequence > state.last_acked_sequence {
                state.last_acked_sequence = last_sequence;
            }
            state.pending_count = 0;
        });
        debug!(
            "[SyncClient] Mirrored {} fixes to {} (last seq {:?})",
            fixes.len(),
            key,
            last_sequence
        );
        Ok(())
    }

    fn update_state(&self, path: &str, f: impl FnOnce(&mut SyncState)) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        f(states.entry(path.to_string()).or_default());
    }

    pub fn sync_state(&self, path: &str) -> SyncState {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.get(&normalize_path(path)).copied().unwrap_or_default()
    }

    /// Write a finished session to `history/<dateKey>/<sessionId>` once.
    ///
    /// An identical existing value counts as success so retries after a
    /// lost acknowledgement are harmless; different content is `Rejected`.
    /// A bucket still in array or legacy shape is rewritten as a session
    /// map first, its points kept under [`IMPORTED_SESSION_ID`].
    pub async fn archive_session(
        &self,
        date_key: &DateKey,
        session_id: &str,
        fixes: &[Fix],
    ) -> SyncResult<()> {
        let bucket_path = history_path(&date_key.to_string());
        let path = session_archive_path(&date_key.to_string(), session_id);
        let value = serde_json::to_value(fixes).map_err(|e| SyncError::Malformed {
            path: path.clone(),
            message: e.to_string(),
        })?;

        match self.read(&bucket_path).await? {
            None => {}
            Some(Value::Object(sessions)) if is_session_map(&sessions) => {
                if let Some(existing) = sessions.get(session_id) {
                    if *existing == value {
                        debug!("[SyncClient] {} already archived", path);
                        return Ok(());
                    }
                    return Err(SyncError::Rejected(format!(
                        "{} already holds a different session",
                        path
                    )));
                }
            }
            Some(existing) => {
                if session_id == IMPORTED_SESSION_ID {
                    return Err(SyncError::Rejected(format!(
                        "{} is reserved for imported points",
                        path
                    )));
                }
                let prior = HistoryBucket::from_value(*date_key, &existing)?;
                let mut sessions = Map::new();
                sessions.insert(IMPORTED_SESSION_ID.to_string(), prior.to_value());
                sessions.insert(session_id.to_string(), value);

                self.push(&bucket_path, Value::Object(sessions)).await?;
                info!(
                    "[SyncClient] Archived {} fixes to {}, keeping {} earlier points",
                    fixes.len(),
                    path,
                    prior.points.len()
                );
                return Ok(());
            }
        }

        self.push(&path, value).await?;
        info!("[SyncClient] Archived {} fixes to {}", fixes.len(), path);
        Ok(())
    }

    /// Explicitly overwrite a whole date bucket.
    pub async fn resync_bucket(&self, bucket: &HistoryBucket) -> SyncResult<()> {
        let path = history_path(&bucket.date_key.to_string());
        info!(
            "[SyncClient] Re-syncing {} with {} points",
            path,
            bucket.points.len()
        );
        self.push(&path, bucket.to_value()).await
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn read(&self, path: &str) -> SyncResult<Option<Value>> {
        self.bounded(path, self.store.get(path)).await
    }

    /// One-shot read of a date bucket. Missing data is `NotFound`.
    pub async fn read_bucket(&self, date_key: &DateKey) -> SyncResult<HistoryBucket> {
        let path = history_path(&date_key.to_string());
        match self.read(&path).await? {
            Some(value) => HistoryBucket::from_value(*date_key, &value),
            None => Err(SyncError::NotFound(path)),
        }
    }

    /// Current live mirror of a session.
    pub async fn read_live(&self, session_id: &str) -> SyncResult<Vec<Fix>> {
        let path = realtime_path(session_id);
        match self.read(&path).await? {
            Some(value) => decode_fixes(&path, value),
            None => Err(SyncError::NotFound(path)),
        }
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    pub fn subscribe(&self, path: &str) -> SyncResult<Subscription> {
        let rx = self.store.watch(path)?;
        debug!("[SyncClient] Subscribed to {}", path);
        Ok(Subscription {
            path: normalize_path(path),
            rx,
            primed: false,
        })
    }

    /// Invoke `callback` with each delivered value on a single task, so
    /// invocations never overlap.
    pub fn subscribe_with<F>(&self, path: &str, mut callback: F) -> SyncResult<SubscriptionHandle>
    where
        F: FnMut(Option<Value>) + Send + 'static,
    {
        let mut subscription = self.subscribe(path)?;
        let task = tokio::spawn(async move {
            while let Some(value) = subscription.next().await {
                callback(value);
            }
        });
        Ok(SubscriptionHandle { task })
    }
}

/// Decode a stored fix array.
pub fn decode_fixes(path: &str, value: Value) -> SyncResult<Vec<Fix>> {
    serde_json::from_value(value).map_err(|e| SyncError::Malformed {
        path: path.to_string(),
        message: e.to_string(),
    })
}

/// Pull-based view of a store path.
pub struct Subscription {
    path: String,
    rx: watch::Receiver<Option<Value>>,
    primed: bool,
}

impl Subscription {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The first call yields the current value; later calls wait for a
    /// change and yield the latest value. `None` once the store side closes.
    ///
    /// Cancel safe.
    pub async fn next(&mut self) -> Option<Option<Value>> {
        if !self.primed {
            self.primed = true;
            return Some(self.rx.borrow_and_update().clone());
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Latest value without waiting.
    pub fn latest(&self) -> Option<Value> {
        self.rx.borrow().clone()
    }
}

/// Cancels a callback subscription when dropped.
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
