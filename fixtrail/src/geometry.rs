//! Route geometry derived from an ordered coordinate sequence.
//!
//! Geometry is a pure view: it is recomputed from fixes or from a decoded
//! polyline whenever it is needed and never stored.

use geo::{algorithm::simplify::Simplify, Coord, LineString};
use serde::{Deserialize, Serialize};

use crate::geo_utils::{bearing_degrees, polyline_length};
use crate::{Bounds, Fix, GpsPoint};

/// Maximum intermediate waypoints most directions services accept per request.
pub const DEFAULT_MAX_WAYPOINTS: usize = 25;

/// An ordered path and the initial bearing of each segment.
///
/// `bearings.len() == path.len() - 1` for non-empty paths; paths with fewer
/// than two points have no bearings. Zero-length segments keep bearing 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteGeometry {
    pub path: Vec<GpsPoint>,
    pub bearings: Vec<f64>,
}

impl RouteGeometry {
    pub fn from_points(path: Vec<GpsPoint>) -> Self {
        let bearings = path
            .windows(2)
            .map(|w| bearing_degrees(&w[0], &w[1]))
            .collect();
        Self { path, bearings }
    }

    /// Geometry over fixes, in the order given.
    pub fn from_fixes(fixes: &[Fix]) -> Self {
        Self::from_points(fixes.iter().map(Fix::point).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_points(&self.path)
    }

    pub fn length_meters(&self) -> f64 {
        polyline_length(&self.path)
    }

    /// Douglas-Peucker simplification, tolerance in degrees.
    ///
    /// Endpoints are always kept; bearings are recomputed for the new path.
    pub fn simplified(&self, tolerance: f64) -> Self {
        if self.path.len() < 3 {
            return self.clone();
        }

        let line: LineString<f64> = self
            .path
            .iter()
            .map(|p| Coord {
                x: p.longitude,
                y: p.latitude,
            })
            .collect();

        let simplified = line.simplify(&tolerance);
        Self::from_points(
            simplified
                .coords()
                .map(|c| GpsPoint::new(c.y, c.x))
                .collect(),
        )
    }
}

/// One directions request worth of path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaypointLeg {
    pub origin: GpsPoint,
    pub destination: GpsPoint,
    pub waypoints: Vec<GpsPoint>,
}

/// Split a path into consecutive legs of at most `max_waypoints`
/// intermediate points each.
///
/// Each leg's destination is the next leg's origin, so the joined legs
/// cover the whole path. Paths with fewer than two points produce no legs.
///
/// # Example
/// ```
/// use fixtrail::{plan_waypoint_legs, GpsPoint};
///
/// let path: Vec<GpsPoint> = (0..10).map(|i| GpsPoint::new(i as f64 * 0.01, 0.0)).collect();
/// let legs = plan_waypoint_legs(&path, 3);
/// assert_eq!(legs.len(), 3);
/// assert_eq!(legs[0].waypoints.len(), 3);
/// assert_eq!(legs[0].destination, legs[1].origin);
/// ```
pub fn plan_waypoint_legs(path: &[GpsPoint], max_waypoints: usize) -> Vec<WaypointLeg> {
    if path.len() < 2 {
        return Vec::new();
    }

    let last = path.len() - 1;
    let mut legs = Vec::new();
    let mut start = 0;

    while start < last {
        let end = (start + max_waypoints + 1).min(last);
        legs.push(WaypointLeg {
            origin: path[start],
            destination: path[end],
            waypoints: path[start + 1..end].to_vec(),
        });
        start = end;
    }

    legs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn line(n: usize) -> Vec<GpsPoint> {
        (0..n)
            .map(|i| GpsPoint::new(12.9 + i as f64 * 0.001, 77.5))
            .collect()
    }

    #[test]
    fn test_two_point_northwest_bearing() {
        let geometry = RouteGeometry::from_points(vec![
            GpsPoint::new(37.78825, -122.4324),
            GpsPoint::new(37.78925, -122.4334),
        ]);
        assert_eq!(geometry.path.len(), 2);
        assert_eq!(geometry.bearings.len(), 1);
        assert!(
            (geometry.bearings[0] - 315.0).abs() < 10.0,
            "got {}",
            geometry.bearings[0]
        );
    }

    #[test]
    fn test_short_paths_have_no_bearings() {
        assert!(RouteGeometry::from_points(vec![]).bearings.is_empty());
        let single = RouteGeometry::from_points(vec![GpsPoint::new(1.0, 2.0)]);
        assert_eq!(single.path.len(), 1);
        assert!(single.bearings.is_empty());
    }

    #[test]
    fn test_duplicate_points_keep_zero_bearing() {
        let p = GpsPoint::new(12.97, 77.59);
        let geometry = RouteGeometry::from_points(vec![p, p, GpsPoint::new(12.98, 77.59)]);
        assert_eq!(geometry.path.len(), 3);
        assert_eq!(geometry.bearings[0], 0.0);
        assert!(geometry.bearings[1].abs() < 1e-9);
    }

    #[test]
    fn test_from_fixes_preserves_order() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let fixes: Vec<Fix> = (0..4)
            .map(|i| Fix {
                latitude: 10.0 + i as f64 * 0.001,
                longitude: 20.0,
                timestamp: t0 + Duration::seconds(i),
                sequence: i as u64,
            })
            .collect();
        let geometry = RouteGeometry::from_fixes(&fixes);
        assert_eq!(geometry.path.len(), 4);
        assert_eq!(geometry.bearings.len(), 3);
        assert_eq!(geometry.path[3].latitude, 10.003);
    }

    #[test]
    fn test_bounds_and_length() {
        let geometry = RouteGeometry::from_points(line(3));
        let bounds = geometry.bounds().unwrap();
        assert!((bounds.min_lat - 12.9).abs() < 1e-9);
        assert!((bounds.max_lat - 12.902).abs() < 1e-9);
        assert!((geometry.length_meters() - 222.4).abs() < 1.0);
        assert!(RouteGeometry::default().bounds().is_none());
    }

    #[test]
    fn test_simplified_drops_collinear_points() {
        let geometry = RouteGeometry::from_points(line(20));
        let simplified = geometry.simplified(1e-6);
        assert_eq!(simplified.path.len(), 2);
        assert_eq!(simplified.bearings.len(), 1);
        assert_eq!(simplified.path[0], geometry.path[0]);
        assert_eq!(simplified.path[1], geometry.path[19]);
    }

    #[test]
    fn test_plan_legs_cover_path() {
        let path = line(10);
        let legs = plan_waypoint_legs(&path, 3);

        assert_eq!(legs.len(), 3);
        assert_eq!(legs[0].origin, path[0]);
        assert_eq!(legs[0].destination, path[4]);
        assert_eq!(legs[1].origin, path[4]);
        assert_eq!(legs[1].destination, path[8]);
        assert_eq!(legs[2].origin, path[8]);
        assert_eq!(legs[2].destination, path[9]);
        assert!(legs[2].waypoints.is_empty());

        // Rebuilding the path from legs gives the input sequence
        let mut rebuilt = vec![legs[0].origin];
        for leg in &legs {
            rebuilt.extend(leg.waypoints.iter().copied());
            rebuilt.push(leg.destination);
        }
        assert_eq!(rebuilt, path);
    }

    #[test]
    fn test_plan_legs_small_inputs() {
        assert!(plan_waypoint_legs(&[], 25).is_empty());
        assert!(plan_waypoint_legs(&line(1), 25).is_empty());

        let legs = plan_waypoint_legs(&line(2), 25);
        assert_eq!(legs.len(), 1);
        assert!(legs[0].waypoints.is_empty());

        let legs = plan_waypoint_legs(&line(27), DEFAULT_MAX_WAYPOINTS);
        assert_eq!(legs.len(), 1);
        assert_eq!(legs[0].waypoints.len(), 25);
    }

    #[test]
    fn test_plan_legs_zero_waypoints() {
        let legs = plan_waypoint_legs(&line(4), 0);
        assert_eq!(legs.len(), 3);
        assert!(legs.iter().all(|l| l.waypoints.is_empty()));
    }
}
