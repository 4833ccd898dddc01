//! # Fixtrail
//!
//! Location fix filtering, session buffering and route geometry for live
//! tracking and history views.
//!
//! This library provides:
//! - Great-circle distance and initial bearing between coordinates
//! - Decoding of the encoded polyline format used by directions services
//! - Plausibility filtering of raw position fixes
//! - An ordered, append-only buffer for the active tracking session
//! - Route geometry (path + per-segment bearings) and waypoint leg planning
//!
//! ## Features
//!
//! - **`synthetic`** - Enable synthetic fix generation (simulators, backfill)
//!
//! ## Quick Start
//!
//! ```rust
//! use fixtrail::{GpsPoint, RouteGeometry};
//!
//! let path = vec![
//!     GpsPoint::new(37.78825, -122.4324),
//!     GpsPoint::new(37.78925, -122.4334),
//! ];
//!
//! let geometry = RouteGeometry::from_points(path);
//! assert_eq!(geometry.bearings.len(), 1);
//! println!("Heading: {:.0}°", geometry.bearings[0]);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Error types for decoding, filtering and buffering
pub mod error;
pub use error::{BufferError, DecodeError, Rejection};

// Geographic utilities (distance, bearing, path length)
pub mod geo_utils;
pub use geo_utils::{bearing_degrees, haversine_distance, polyline_length};

// Encoded polyline codec (directions service format)
pub mod codec;
pub use codec::{decode_polyline, encode_polyline, POLYLINE_PRECISION};

// Raw fix validation
pub mod filter;
pub use filter::{FilterConfig, FilterStats, FixFilter};

// Ordered per-session fix storage
pub mod buffer;
pub use buffer::SessionBuffer;

// Derived path geometry and waypoint segmentation
pub mod geometry;
pub use geometry::{plan_waypoint_legs, RouteGeometry, WaypointLeg, DEFAULT_MAX_WAYPOINTS};

// Synthetic fix generation
#[cfg(feature = "synthetic")]
pub mod synthetic;
#[cfg(feature = "synthetic")]
pub use synthetic::ScatterGenerator;

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use fixtrail::GpsPoint;
/// let point = GpsPoint::new(37.78825, -122.4324); // San Francisco
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// A position sample as delivered by a location provider, before filtering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl RawFix {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
        }
    }

    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// An accepted position fix.
///
/// Fixes are only created by [`FixFilter::accept`], which guarantees valid
/// coordinates and assigns `sequence` (0 for the first fix of a session,
/// previous + 1 afterwards). They are immutable once accepted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
}

impl Fix {
    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// Bounding box for a path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
