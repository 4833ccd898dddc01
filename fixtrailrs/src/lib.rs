//! Fixtrailrs - live location tracking and history reconstruction
//!
//! This crate provides:
//! - Remote store backends (in-memory, SQLite, Firebase-style REST)
//! - Sync client with bounded timeouts, live mirroring and date-bucketed archives
//! - Tracking controller driving provider → filter → buffer → remote
//! - History reconstruction for single days, day ranges and routed tracks
//! - UniFFI bindings for iOS/Android (`ffi` feature)

// Re-export all public types from fixtrail
pub use fixtrail::*;

pub mod error;
pub use error::{
    DateKeyError, DirectionsError, ProviderError, ReconstructError, SyncError, SyncResult,
    TrackingError, TrackingWarning,
};

pub mod config;
pub use config::{SyncConfig, TrackingConfig};

pub mod retry;
pub use retry::{RetryOutcome, RetryPolicy, retry_transient};

// Remote key-value tree backends
pub mod store;
pub use store::{FirebaseStore, MemoryStore, RemoteStore, SqliteStore};

// Date-keyed history buckets
pub mod bucket;
pub use bucket::{DateKey, HistoryBucket};

pub mod sync;
pub use sync::{IMPORTED_SESSION_ID, Subscription, SubscriptionHandle, SyncClient, SyncState};

// Directions service used to snap history onto roads
pub mod directions;
pub use directions::{DirectionsRequest, DirectionsRoute, DirectionsService, GoogleDirections};

pub mod history;
pub use history::{HistoryReconstructor, HistoryTrack, PolylineStatus, RangeHistory};

pub mod provider;
pub use provider::{LocationProvider, ReplayProvider};
#[cfg(feature = "synthetic")]
pub use provider::SimulatedProvider;

pub mod controller;
pub use controller::{
    ArchiveHandle, ArchiveOutcome, SessionStatus, TrackingController, TrackingState,
};

// FFI bindings for mobile platforms
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android
#[cfg(target_os = "android")]
pub fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("fixtrailrs"),
    );
}

#[cfg(not(target_os = "android"))]
pub fn init_logging() {
    // No-op on non-Android platforms
}
