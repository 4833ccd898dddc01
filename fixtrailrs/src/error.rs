//! Error types for sync, history, providers and tracking.

use thiserror::Error;

/// Failure talking to the remote store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Transient network or store failure, including timeouts
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Permanent refusal (permission, quota, write-once conflict)
    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("No data at {0}")]
    NotFound(String),

    /// Stored value does not have the expected shape
    #[error("Malformed value at {path}: {message}")]
    Malformed { path: String, message: String },
}

impl SyncError {
    /// Whether the failure is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Unavailable(_))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Failure reported by a location provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location request timed out")]
    Timeout,

    #[error("Position unavailable: {0}")]
    PositionUnavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid date key '{input}': expected YYYY-MM-DD, DD-MM-YYYY or DD/MM/YYYY")]
pub struct DateKeyError {
    pub input: String,
}

/// Failure reconstructing history.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconstructError {
    #[error("Date {date_key} is in the future")]
    FutureDate { date_key: String },

    #[error("No history for {date_key}")]
    NoDataForDate { date_key: String },

    #[error(transparent)]
    InvalidDateKey(#[from] DateKeyError),

    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl ReconstructError {
    /// Whether the caller should offer a retry rather than a "no data" message.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReconstructError::Sync(e) if e.is_transient())
    }
}

/// Failure from the external directions service.
#[derive(Error, Debug)]
pub enum DirectionsError {
    #[error("Directions request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Directions service returned {status}: {message}")]
    Service { status: String, message: String },

    #[error("Directions response had no routes")]
    NoRoute,

    #[error("Directions polyline invalid: {0}")]
    Decode(#[from] fixtrail::DecodeError),
}

/// Failure driving the tracking lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackingError {
    #[error("Tracking already in progress")]
    AlreadyTracking,

    #[error("Tracking not in progress")]
    NotTracking,

    /// Controller is in `Error` after a permission failure
    #[error("Controller must be reset before tracking again")]
    ResetRequired,

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Non-fatal condition surfaced through controller status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingWarning {
    /// A finished session could not be archived within the retry budget
    SyncIncomplete {
        session_id: String,
        fix_count: usize,
        attempts: u32,
        last_error: SyncError,
    },
}

impl std::fmt::Display for TrackingWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackingWarning::SyncIncomplete {
                session_id,
                fix_count,
                attempts,
                last_error,
            } => write!(
                f,
                "Session {} ({} fixes) not archived after {} attempts: {}",
                session_id, fix_count, attempts, last_error
            ),
        }
    }
}
