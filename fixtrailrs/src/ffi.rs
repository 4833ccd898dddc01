//! FFI bindings for mobile platforms (iOS/Android).
//!
//! Coordinates cross the boundary as flat arrays `[lat1, lng1, lat2, lng2, ...]`.
//! All FFI functions are prefixed with `ffi_` to avoid naming conflicts with
//! the internal API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::Utc;
use log::{info, warn};
use once_cell::sync::Lazy;

use crate::{
    DateKey, GpsPoint, HistoryReconstructor, PolylineStatus, ReconstructError, RouteGeometry,
    SqliteStore, SyncClient, SyncConfig, SyncError, bearing_degrees, decode_polyline,
    encode_polyline, haversine_distance, init_logging,
};

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Open stores keyed by database path, kept for the process lifetime.
static STORES: Lazy<Mutex<HashMap<String, Arc<SqliteStore>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn open_store(db_path: &str) -> Result<Arc<SqliteStore>, SyncError> {
    let mut stores = STORES.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(store) = stores.get(db_path) {
        return Ok(Arc::clone(store));
    }
    let store = Arc::new(SqliteStore::open(db_path)?);
    stores.insert(db_path.to_string(), Arc::clone(&store));
    Ok(store)
}

fn to_points(latlngs: &[f64]) -> Vec<GpsPoint> {
    latlngs
        .chunks_exact(2)
        .map(|pair| GpsPoint::new(pair[0], pair[1]))
        .collect()
}

fn flatten(points: &[GpsPoint]) -> Vec<f64> {
    points
        .iter()
        .flat_map(|p| [p.latitude, p.longitude])
        .collect()
}

// ============================================================================
// Geometry
// ============================================================================

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRouteGeometry {
    /// Path as flat [lat, lng, ...]
    pub latlngs: Vec<f64>,
    /// Heading of each segment, degrees clockwise from north
    pub bearings: Vec<f64>,
    pub length_meters: f64,
    /// [min_lat, max_lat, min_lng, max_lng] or empty
    pub bounds: Vec<f64>,
}

impl From<&RouteGeometry> for FfiRouteGeometry {
    fn from(geometry: &RouteGeometry) -> Self {
        Self {
            latlngs: flatten(&geometry.path),
            bearings: geometry.bearings.clone(),
            length_meters: geometry.length_meters(),
            bounds: geometry
                .bounds()
                .map_or(vec![], |b| vec![b.min_lat, b.max_lat, b.min_lng, b.max_lng]),
        }
    }
}

#[uniffi::export]
pub fn ffi_distance_meters(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    haversine_distance(&GpsPoint::new(lat1, lng1), &GpsPoint::new(lat2, lng2))
}

#[uniffi::export]
pub fn ffi_bearing_degrees(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    bearing_degrees(&GpsPoint::new(lat1, lng1), &GpsPoint::new(lat2, lng2))
}

/// Decode an encoded polyline. Returns an empty array if it is malformed.
#[uniffi::export]
pub fn ffi_decode_polyline(encoded: String) -> Vec<f64> {
    init_logging();
    match decode_polyline(&encoded) {
        Ok(points) => flatten(&points),
        Err(e) => {
            warn!("[RUST: decode_polyline] {}", e);
            vec![]
        }
    }
}

#[uniffi::export]
pub fn ffi_encode_polyline(latlngs: Vec<f64>) -> Option<String> {
    encode_polyline(&to_points(&latlngs))
}

#[uniffi::export]
pub fn ffi_route_geometry(latlngs: Vec<f64>) -> FfiRouteGeometry {
    FfiRouteGeometry::from(&RouteGeometry::from_points(to_points(&latlngs)))
}

/// Normalize a date key to YYYY-MM-DD, or `None` if unrecognized.
#[uniffi::export]
pub fn ffi_normalize_date_key(input: String) -> Option<String> {
    input.parse::<DateKey>().ok().map(|key| key.to_string())
}

// ============================================================================
// History
// ============================================================================

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiHistoryResult {
    pub date_key: String,
    /// Stored fixes as flat [lat, lng, ...] in sequence order
    pub markers: Vec<f64>,
    pub geometry: Option<FfiRouteGeometry>,
    pub used_polyline: bool,
    pub success: bool,
    /// Worth retrying (store unreachable) rather than showing "no data"
    pub transient: bool,
    pub error: Option<String>,
}

impl FfiHistoryResult {
    fn failed(date_key: String, error: &ReconstructError) -> Self {
        Self {
            date_key,
            markers: vec![],
            geometry: None,
            used_polyline: false,
            success: false,
            transient: error.is_transient(),
            error: Some(error.to_string()),
        }
    }
}

/// Reconstruct one day of history from the local SQLite mirror.
#[uniffi::export]
pub fn ffi_reconstruct_history(
    db_path: String,
    date_key: String,
    polyline: Option<String>,
) -> FfiHistoryResult {
    init_logging();
    let ffi_start = Instant::now();
    info!(
        "[RUST: reconstruct_history] FFI called for {} (polyline: {})",
        date_key,
        polyline.is_some()
    );

    let key = match date_key.parse::<DateKey>() {
        Ok(key) => key,
        Err(e) => return FfiHistoryResult::failed(date_key, &e.into()),
    };

    let store = match open_store(&db_path) {
        Ok(store) => store,
        Err(e) => return FfiHistoryResult::failed(date_key, &e.into()),
    };

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            warn!("[RUST: reconstruct_history] Failed to create runtime: {}", e);
            let error = SyncError::Unavailable(format!("runtime: {}", e));
            return FfiHistoryResult::failed(date_key, &error.into());
        }
    };

    let sync = Arc::new(SyncClient::new(store, SyncConfig::default()));
    let reconstructor = HistoryReconstructor::new(sync);
    let result =
        rt.block_on(reconstructor.reconstruct_track(&key, polyline.as_deref(), Utc::now()));

    match result {
        Ok(track) => {
            info!(
                "[RUST: reconstruct_history] {} markers, {} path points ({} ms)",
                track.markers.len(),
                track.geometry.path.len(),
                elapsed_ms(ffi_start)
            );
            let markers: Vec<GpsPoint> = track.markers.iter().map(|f| f.point()).collect();
            FfiHistoryResult {
                date_key: key.to_string(),
                markers: flatten(&markers),
                geometry: Some(FfiRouteGeometry::from(&track.geometry)),
                used_polyline: matches!(track.polyline_status, PolylineStatus::Applied { .. }),
                success: true,
                transient: false,
                error: None,
            }
        }
        Err(e) => {
            info!(
                "[RUST: reconstruct_history] {} ({} ms)",
                e,
                elapsed_ms(ffi_start)
            );
            FfiHistoryResult::failed(key.to_string(), &e)
        }
    }
}
