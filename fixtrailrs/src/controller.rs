//! Tracking session lifecycle.
//!
//! ```text
//! Idle ──start──▶ Tracking ──stop──▶ Flushed ──archived──▶ Idle
//!                    │                  └──retries exhausted──▶ Error
//!                    └──permission denied──▶ Error ──reset──▶ Idle
//! ```
//!
//! All session state lives in one [`SessionCore`] behind a single mutex.
//! Only the cadence task mutates it while tracking; it handles both provider
//! ticks and realtime echoes, so the two never interleave. Remote writes run
//! on separate tasks and never hold the lock across an await.
//!
//! A new session may start while the previous archive is still retrying.
//! Its outcome still reaches [`SessionStatus::warning`], and `reset` cancels
//! every archive still in flight.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fixtrail::{Fix, FilterStats, FixFilter, SessionBuffer};
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};

use crate::bucket::DateKey;
use crate::config::TrackingConfig;
use crate::error::{ProviderError, SyncError, TrackingError, TrackingWarning};
use crate::provider::LocationProvider;
use crate::retry::{RetryPolicy, retry_transient};
use crate::store::{RemoteStore, realtime_path};
use crate::sync::{Subscription, SyncClient, SyncState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    Idle,
    Tracking,
    /// Stopped; the session archive is in flight
    Flushed,
    Error,
}

/// Provider failures that did not end the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderStats {
    pub timeouts: u64,
    pub unavailable: u64,
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub state: TrackingState,
    pub session_id: Option<String>,
    pub fix_count: usize,
    pub filter_stats: FilterStats,
    pub provider_stats: ProviderStats,
    /// Mirror progress for `realtime/<sessionId>`
    pub mirror: SyncState,
    /// Fixes seen in the latest realtime echo
    pub remote_fix_count: Option<usize>,
    pub fault: Option<ProviderError>,
    pub warning: Option<TrackingWarning>,
}

/// Result of archiving a stopped session.
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveOutcome {
    /// Nothing was captured, so nothing was written
    Empty,
    Archived {
        date_key: DateKey,
        fix_count: usize,
        attempts: u32,
    },
    Incomplete(TrackingWarning),
    /// Aborted by `reset`
    Cancelled,
}

/// Completion of the archive started by `stop`.
pub struct ArchiveHandle {
    inner: ArchiveInner,
}

enum ArchiveInner {
    Ready(ArchiveOutcome),
    Pending(JoinHandle<ArchiveOutcome>),
}

impl ArchiveHandle {
    fn ready(outcome: ArchiveOutcome) -> Self {
        Self {
            inner: ArchiveInner::Ready(outcome),
        }
    }

    pub async fn wait(self) -> ArchiveOutcome {
        match self.inner {
            ArchiveInner::Ready(outcome) => outcome,
            ArchiveInner::Pending(task) => task.await.unwrap_or(ArchiveOutcome::Cancelled),
        }
    }
}

struct SessionCore {
    state: TrackingState,
    /// Bumped on every start and reset; stale tasks compare against it
    generation: u64,
    /// Bumped on reset only; archives from before a reset stay silent
    resets: u64,
    session_id: Option<String>,
    buffer: SessionBuffer,
    filter_stats: FilterStats,
    provider_stats: ProviderStats,
    remote_fix_count: Option<usize>,
    fault: Option<ProviderError>,
    warning: Option<TrackingWarning>,
}

impl SessionCore {
    fn new() -> Self {
        Self {
            state: TrackingState::Idle,
            generation: 0,
            resets: 0,
            session_id: None,
            buffer: SessionBuffer::new(),
            filter_stats: FilterStats::default(),
            provider_stats: ProviderStats::default(),
            remote_fix_count: None,
            fault: None,
            warning: None,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.state == TrackingState::Tracking
    }
}

struct ActiveSession {
    shutdown: watch::Sender<bool>,
    cadence: JoinHandle<()>,
    mirror: JoinHandle<()>,
}

impl ActiveSession {
    fn abort(self) {
        let _ = self.shutdown.send(true);
        self.cadence.abort();
        self.mirror.abort();
    }
}

fn lock_core(core: &Mutex<SessionCore>) -> MutexGuard<'_, SessionCore> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives provider → filter → buffer → remote mirror on a fixed cadence.
pub struct TrackingController<S: RemoteStore, P: LocationProvider> {
    sync: Arc<SyncClient<S>>,
    provider: Arc<P>,
    config: TrackingConfig,
    core: Arc<Mutex<SessionCore>>,
    /// Serializes start, stop and reset
    active: tokio::sync::Mutex<Option<ActiveSession>>,
    /// Archives started by `stop` that may still be retrying
    archives: Mutex<Vec<AbortHandle>>,
}

impl<S: RemoteStore, P: LocationProvider> TrackingController<S, P> {
    pub fn new(
        sync: Arc<SyncClient<S>>,
        provider: Arc<P>,
        config: TrackingConfig,
    ) -> Result<Self, TrackingError> {
        config.validate()?;
        Ok(Self {
            sync,
            provider,
            config,
            core: Arc::new(Mutex::new(SessionCore::new())),
            active: tokio::sync::Mutex::new(None),
            archives: Mutex::new(Vec::new()),
        })
    }

    pub fn state(&self) -> TrackingState {
        lock_core(&self.core).state
    }

    /// Copy of the fixes captured so far in the current session.
    pub fn snapshot(&self) -> Vec<Fix> {
        lock_core(&self.core).buffer.snapshot()
    }

    pub fn status(&self) -> SessionStatus {
        let core = lock_core(&self.core);
        let mirror = core
            .session_id
            .as_deref()
            .map(|id| self.sync.sync_state(&realtime_path(id)))
            .unwrap_or_default();

        SessionStatus {
            state: core.state,
            session_id: core.session_id.clone(),
            fix_count: core.buffer.len(),
            filter_stats: core.filter_stats,
            provider_stats: core.provider_stats,
            mirror,
            remote_fix_count: core.remote_fix_count,
            fault: core.fault.clone(),
            warning: core.warning.clone(),
        }
    }

    /// Begin a new session and return its id.
    pub async fn start(&self) -> Result<String, TrackingError> {
        let mut active = self.active.lock().await;

        {
            let core = lock_core(&self.core);
            match core.state {
                TrackingState::Tracking => return Err(TrackingError::AlreadyTracking),
                TrackingState::Error if core.fault.is_some() => {
                    return Err(TrackingError::ResetRequired);
                }
                _ => {}
            }
        }

        // Tasks left behind by a permission fault that was since reset
        if let Some(stale) = active.take() {
            stale.abort();
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let path = realtime_path(&session_id);
        let echo = self.sync.subscribe(&path)?;

        let generation = {
            let mut core = lock_core(&self.core);
            core.generation += 1;
            core.state = TrackingState::Tracking;
            core.session_id = Some(session_id.clone());
            core.buffer = SessionBuffer::new();
            core.filter_stats = FilterStats::default();
            core.provider_stats = ProviderStats::default();
            core.remote_fix_count = None;
            core.fault = None;
            core.warning = None;
            core.generation
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (mirror_tx, mirror_rx) = watch::channel(Vec::new());

        let mirror = tokio::spawn(run_mirror(
            Arc::clone(&self.sync),
            path,
            mirror_rx,
            self.config.retry,
        ));

        let cadence = tokio::spawn(
            Cadence {
                core: Arc::clone(&self.core),
                provider: Arc::clone(&self.provider),
                filter: FixFilter::new(self.config.filter),
                config: self.config,
                generation,
                mirror_tx,
            }
            .run(shutdown_rx, echo),
        );

        *active = Some(ActiveSession {
            shutdown: shutdown_tx,
            cadence,
            mirror,
        });

        info!(
            "[TrackingController] Session {} started (cadence {} ms)",
            session_id, self.config.cadence_ms
        );
        Ok(session_id)
    }

    /// Stop the current session, flush its fixes and archive them in the
    /// background.
    pub async fn stop(&self) -> Result<ArchiveHandle, TrackingError> {
        let mut active = self.active.lock().await;

        if self.state() != TrackingState::Tracking {
            return Err(TrackingError::NotTracking);
        }
        let Some(session) = active.take() else {
            return Err(TrackingError::NotTracking);
        };

        // Let the cadence finish its current tick, then silence the mirror
        let _ = session.shutdown.send(true);
        if let Err(e) = session.cadence.await {
            warn!("[TrackingController] Cadence task ended abnormally: {}", e);
        }
        session.mirror.abort();

        let (fixes, session_id, generation, resets) = {
            let mut core = lock_core(&self.core);
            if core.state != TrackingState::Tracking {
                // Faulted while shutting down; reset decides what happens to the data
                return Err(TrackingError::NotTracking);
            }
            core.state = TrackingState::Flushed;
            let fixes = core.buffer.flush_and_clear();
            (
                fixes,
                core.session_id.clone().unwrap_or_default(),
                core.generation,
                core.resets,
            )
        };

        let Some(first) = fixes.first() else {
            lock_core(&self.core).state = TrackingState::Idle;
            info!("[TrackingController] Session {} stopped with no fixes", session_id);
            return Ok(ArchiveHandle::ready(ArchiveOutcome::Empty));
        };

        let date_key = DateKey::of_timestamp(&first.timestamp);
        info!(
            "[TrackingController] Session {} stopped with {} fixes, archiving to {}",
            session_id,
            fixes.len(),
            date_key
        );

        let task = tokio::spawn(archive_session(
            Arc::clone(&self.sync),
            Arc::clone(&self.core),
            self.config.retry,
            ArchiveJob {
                date_key,
                session_id,
                generation,
                resets,
                fixes,
            },
        ));

        let mut archives = self.archives.lock().unwrap_or_else(PoisonError::into_inner);
        archives.retain(|handle| !handle.is_finished());
        archives.push(task.abort_handle());
        if archives.len() > 1 {
            debug!(
                "[TrackingController] {} archives in flight",
                archives.len()
            );
        }

        Ok(ArchiveHandle {
            inner: ArchiveInner::Pending(task),
        })
    }

    /// Return to `Idle` from any state but `Tracking`, cancelling in-flight
    /// archives and discarding buffered fixes.
    pub async fn reset(&self) -> Result<(), TrackingError> {
        let mut active = self.active.lock().await;

        if self.state() == TrackingState::Tracking {
            return Err(TrackingError::AlreadyTracking);
        }

        if let Some(session) = active.take() {
            session.abort();
        }
        let cancelled: Vec<AbortHandle> = self
            .archives
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in cancelled {
            handle.abort();
        }

        let mut core = lock_core(&self.core);
        let discarded = core.buffer.flush_and_clear();
        if !discarded.is_empty() {
            warn!(
                "[TrackingController] Reset discarded {} unarchived fixes",
                discarded.len()
            );
        }
        core.generation += 1;
        core.resets += 1;
        core.state = TrackingState::Idle;
        core.session_id = None;
        core.fault = None;
        core.warning = None;
        core.remote_fix_count = None;
        info!("[TrackingController] Reset to Idle");
        Ok(())
    }
}

// ============================================================================
// Cadence
// ============================================================================

struct Cadence<P: LocationProvider> {
    core: Arc<Mutex<SessionCore>>,
    provider: Arc<P>,
    filter: FixFilter,
    config: TrackingConfig,
    generation: u64,
    mirror_tx: watch::Sender<Vec<Fix>>,
}

impl<P: LocationProvider> Cadence<P> {
    async fn run(self, mut shutdown: watch::Receiver<bool>, mut echo: Subscription) {
        let period = self.config.cadence();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut echo_open = true;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let position = tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        result = tokio::time::timeout(
                            self.config.provider_timeout(),
                            self.provider.current_position(),
                        ) => result.unwrap_or(Err(ProviderError::Timeout)),
                    };
                    if !self.handle_position(position) {
                        break;
                    }
                }
                value = echo.next(), if echo_open => match value {
                    Some(value) => self.handle_echo(value),
                    None => echo_open = false,
                },
            }
        }
        debug!("[TrackingController] Cadence stopped");
    }

    /// Returns false when the session can no longer continue.
    fn handle_position(&self, position: Result<fixtrail::RawFix, ProviderError>) -> bool {
        let mut core = lock_core(&self.core);
        if !core.is_current(self.generation) {
            return false;
        }

        match position {
            Ok(raw) => match self.filter.accept(&raw, core.buffer.last()) {
                Ok(fix) => match core.buffer.append(fix) {
                    Ok(()) => {
                        core.filter_stats.record_accepted();
                        self.mirror_tx.send_replace(core.buffer.snapshot());
                    }
                    Err(e) => warn!("[TrackingController] {}", e),
                },
                Err(rejection) => {
                    debug!("[TrackingController] Rejected fix: {}", rejection);
                    core.filter_stats.record_rejection(&rejection);
                }
            },
            Err(ProviderError::PermissionDenied) => {
                error!("[TrackingController] Location permission denied, session halted");
                core.state = TrackingState::Error;
                core.fault = Some(ProviderError::PermissionDenied);
                return false;
            }
            Err(ProviderError::Timeout) => {
                debug!("[TrackingController] Provider timed out");
                core.provider_stats.timeouts += 1;
            }
            Err(ProviderError::PositionUnavailable(reason)) => {
                debug!("[TrackingController] Position unavailable: {}", reason);
                core.provider_stats.unavailable += 1;
            }
        }
        true
    }

    fn handle_echo(&self, value: Option<Value>) {
        let mut core = lock_core(&self.core);
        if !core.is_current(self.generation) {
            return;
        }
        let remote = value
            .as_ref()
            .and_then(Value::as_array)
            .map_or(0, |items| items.len());
        core.remote_fix_count = Some(remote);
    }
}

// ============================================================================
// Remote writes
// ============================================================================

/// Push each new session snapshot to the live path. Only the latest
/// snapshot is kept, so a slow store skips intermediate ones.
async fn run_mirror<S: RemoteStore>(
    sync: Arc<SyncClient<S>>,
    path: String,
    mut snapshots: watch::Receiver<Vec<Fix>>,
    retry: RetryPolicy,
) {
    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();
        let client = &*sync;
        let path = path.as_str();
        let fixes = snapshot.as_slice();

        let outcome =
            retry_transient(&retry, "mirror", move || client.push_fixes(path, fixes)).await;
        if let Err(e) = outcome.result {
            warn!(
                "[TrackingController] Live mirror of {} fixes failed: {}",
                fixes.len(),
                e
            );
        }
    }
}

struct ArchiveJob {
    date_key: DateKey,
    session_id: String,
    generation: u64,
    resets: u64,
    fixes: Vec<Fix>,
}

async fn archive_session<S: RemoteStore>(
    sync: Arc<SyncClient<S>>,
    core: Arc<Mutex<SessionCore>>,
    retry: RetryPolicy,
    job: ArchiveJob,
) -> ArchiveOutcome {
    let outcome = {
        let client = &*sync;
        let job = &job;
        retry_transient(&retry, "archive", move || {
            client.archive_session(&job.date_key, &job.session_id, &job.fixes)
        })
        .await
    };

    if outcome.result.is_ok() {
        // The archive is now the durable copy
        let live = realtime_path(&job.session_id);
        if let Err(e) = sync.push(&live, Value::Null).await {
            warn!("[TrackingController] Failed to clear {}: {}", live, e);
        }
    }

    let mut core = lock_core(&core);
    if core.resets != job.resets {
        return ArchiveOutcome::Cancelled;
    }
    let owns_state = core.generation == job.generation && core.state == TrackingState::Flushed;

    match outcome.result {
        Ok(()) => {
            info!(
                "[TrackingController] Session {} archived ({} attempts)",
                job.session_id, outcome.attempts
            );
            if owns_state {
                core.state = TrackingState::Idle;
            }
            ArchiveOutcome::Archived {
                date_key: job.date_key,
                fix_count: job.fixes.len(),
                attempts: outcome.attempts,
            }
        }
        Err(last_error) => {
            let warning = incomplete(&job, outcome.attempts, last_error);
            error!("[TrackingController] {}", warning);
            if owns_state {
                core.state = TrackingState::Error;
            }
            core.warning = Some(warning.clone());
            ArchiveOutcome::Incomplete(warning)
        }
    }
}

fn incomplete(job: &ArchiveJob, attempts: u32, last_error: SyncError) -> TrackingWarning {
    TrackingWarning::SyncIncomplete {
        session_id: job.session_id.clone(),
        fix_count: job.fixes.len(),
        attempts,
        last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::provider::ReplayProvider;
    use crate::store::{MemoryStore, session_archive_path};
    use chrono::{Duration, TimeZone, Utc};
    use fixtrail::RawFix;
    use std::time::Duration as StdDuration;

    fn walk(count: usize) -> Vec<RawFix> {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                RawFix::new(
                    12.97 + i as f64 * 0.0001,
                    77.59,
                    t0 + Duration::seconds(5 * i as i64),
                )
            })
            .collect()
    }

    fn controller(
        provider: ReplayProvider,
    ) -> (
        Arc<MemoryStore>,
        TrackingController<MemoryStore, ReplayProvider>,
    ) {
        let store = Arc::new(MemoryStore::new());
        let sync = Arc::new(SyncClient::new(Arc::clone(&store), SyncConfig::default()));
        let controller =
            TrackingController::new(sync, Arc::new(provider), TrackingConfig::default()).unwrap();
        (store, controller)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_archives_session() {
        let (store, controller) = controller(ReplayProvider::from_fixes(walk(3)));
        let session_id = controller.start().await.unwrap();
        assert_eq!(controller.state(), TrackingState::Tracking);

        tokio::time::sleep(StdDuration::from_secs(16)).await;
        assert_eq!(controller.snapshot().len(), 3);

        let outcome = controller.stop().await.unwrap().wait().await;
        assert_eq!(
            outcome,
            ArchiveOutcome::Archived {
                date_key: DateKey::from_ymd(2025, 1, 1).unwrap(),
                fix_count: 3,
                attempts: 1,
            }
        );
        assert_eq!(controller.state(), TrackingState::Idle);
        assert!(controller.snapshot().is_empty());

        let archived = store
            .peek(&session_archive_path("2025-01-01", &session_id))
            .unwrap();
        assert_eq!(archived.as_array().unwrap().len(), 3);
        assert!(store.peek(&realtime_path(&session_id)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_without_fixes_is_empty() {
        let (store, controller) = controller(ReplayProvider::default());
        controller.start().await.unwrap();
        tokio::time::sleep(StdDuration::from_secs(11)).await;

        let status = controller.status();
        assert_eq!(status.fix_count, 0);
        assert_eq!(status.provider_stats.unavailable, 2);

        let outcome = controller.stop().await.unwrap().wait().await;
        assert_eq!(outcome, ArchiveOutcome::Empty);
        assert_eq!(controller.state(), TrackingState::Idle);
        assert!(store.peek("history").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_fixes_are_counted() {
        let mut fixes = walk(2);
        // Same timestamp as the previous fix
        fixes.push(RawFix::new(12.98, 77.59, fixes[1].timestamp));
        fixes.push(RawFix::new(95.0, 77.59, fixes[1].timestamp + Duration::seconds(10)));
        let (_store, controller) = controller(ReplayProvider::from_fixes(fixes));

        controller.start().await.unwrap();
        tokio::time::sleep(StdDuration::from_secs(21)).await;

        let status = controller.status();
        assert_eq!(status.fix_count, 2);
        assert_eq!(status.filter_stats.accepted, 2);
        assert_eq!(status.filter_stats.non_monotonic_time, 1);
        assert_eq!(status.filter_stats.out_of_range, 1);
    }

    #[tokio::test]
    async fn test_stop_when_idle() {
        let (_store, controller) = controller(ReplayProvider::default());
        assert_eq!(controller.stop().await.err(), Some(TrackingError::NotTracking));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_rejected_while_tracking() {
        let (_store, controller) = controller(ReplayProvider::default());
        controller.start().await.unwrap();
        assert_eq!(controller.reset().await, Err(TrackingError::AlreadyTracking));
        controller.stop().await.unwrap();
        assert_eq!(controller.reset().await, Ok(()));
    }
}
