//! Geographic utilities: great-circle distance, initial bearing, path length.

use crate::GpsPoint;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two points in meters.
///
/// Returns 0 when both points are equal.
///
/// # Example
/// ```
/// use fixtrail::{haversine_distance, GpsPoint};
///
/// let london = GpsPoint::new(51.5074, -0.1278);
/// let paris = GpsPoint::new(48.8566, 2.3522);
/// let km = haversine_distance(&london, &paris) / 1000.0;
/// assert!(km > 340.0 && km < 346.0);
/// ```
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let d_lat = (p2.latitude - p1.latitude).to_radians();
    let d_lon = (p2.longitude - p1.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push `a` marginally above 1 for antipodal points
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

/// Initial bearing from `from` to `to`, in degrees within `[0, 360)`.
///
/// 0 is north, 90 east. Equal points have no defined heading and return 0.
pub fn bearing_degrees(from: &GpsPoint, to: &GpsPoint) -> f64 {
    if from == to {
        return 0.0;
    }

    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let d_lon = (to.longitude - from.longitude).to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();

    let bearing = y.atan2(x).to_degrees().rem_euclid(360.0);
    if bearing.is_finite() && bearing < 360.0 {
        bearing
    } else {
        0.0
    }
}

/// Total length of a path in meters.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_same_point() {
        let p = GpsPoint::new(12.9716, 77.5946);
        assert_eq!(haversine_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude is ~111.2 km
        let a = GpsPoint::new(0.0, 0.0);
        let b = GpsPoint::new(1.0, 0.0);
        let d = haversine_distance(&a, &b);
        assert!((d - 111_195.0).abs() < 50.0, "got {}", d);
    }

    #[test]
    fn test_haversine_symmetric() {
        let a = GpsPoint::new(37.78825, -122.4324);
        let b = GpsPoint::new(37.79025, -122.4344);
        assert!((haversine_distance(&a, &b) - haversine_distance(&b, &a)).abs() < 1e-9);
    }

    #[test]
    fn test_haversine_antipodal() {
        let a = GpsPoint::new(0.0, 0.0);
        let b = GpsPoint::new(0.0, 180.0);
        let d = haversine_distance(&a, &b);
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_M).abs() < 1.0);
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = GpsPoint::new(0.0, 0.0);
        assert!((bearing_degrees(&origin, &GpsPoint::new(1.0, 0.0)) - 0.0).abs() < 1e-9);
        assert!((bearing_degrees(&origin, &GpsPoint::new(0.0, 1.0)) - 90.0).abs() < 1e-9);
        assert!((bearing_degrees(&origin, &GpsPoint::new(-1.0, 0.0)) - 180.0).abs() < 1e-9);
        assert!((bearing_degrees(&origin, &GpsPoint::new(0.0, -1.0)) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_bearing_same_point_is_zero() {
        for &(lat, lng) in &[(0.0, 0.0), (37.78825, -122.4324), (-89.9, 179.9), (90.0, 0.0)] {
            let p = GpsPoint::new(lat, lng);
            assert_eq!(bearing_degrees(&p, &p), 0.0);
        }
    }

    #[test]
    fn test_bearing_always_in_range() {
        let coords = [-89.5, -45.0, -1.0, -1e-9, 0.0, 1e-9, 1.0, 45.0, 89.5];
        for &lat1 in &coords {
            for &lat2 in &coords {
                for &dlng in &[-179.0, -90.0, -1e-7, 0.0, 1e-7, 90.0, 179.0] {
                    let a = GpsPoint::new(lat1, 10.0);
                    let b = GpsPoint::new(lat2, 10.0 + dlng);
                    let bearing = bearing_degrees(&a, &b);
                    assert!(
                        (0.0..360.0).contains(&bearing),
                        "bearing {} out of range for {:?} -> {:?}",
                        bearing,
                        a,
                        b
                    );
                }
            }
        }
    }

    #[test]
    fn test_polyline_length() {
        let path = vec![
            GpsPoint::new(0.0, 0.0),
            GpsPoint::new(1.0, 0.0),
            GpsPoint::new(2.0, 0.0),
        ];
        let total = polyline_length(&path);
        let direct = haversine_distance(&path[0], &path[2]);
        assert!((total - direct).abs() < 1.0);
        assert_eq!(polyline_length(&path[..1]), 0.0);
        assert_eq!(polyline_length(&[]), 0.0);
    }
}
