//! Encoded polyline codec.
//!
//! Directions services return route geometry as an encoded polyline: each
//! coordinate delta is a zig-zag signed integer at 5-decimal precision,
//! split into 5-bit chunks offset by 63, with bit `0x20` marking that more
//! chunks follow. Values alternate latitude, longitude.
//!
//! Decoding is delegated to the `polyline` crate after a structural scan
//! that rejects truncated input and dangling latitudes explicitly.

use geo::{Coord, LineString};

use crate::error::DecodeError;
use crate::GpsPoint;

/// Decimal precision used by directions services.
pub const POLYLINE_PRECISION: u32 = 5;

const CHUNK_OFFSET: u8 = 63;
const CONTINUATION_BIT: u8 = 0x20;
const MAX_CHUNK_BYTE: u8 = CHUNK_OFFSET + 63;

/// Decode an encoded polyline into coordinates.
///
/// An empty string decodes to an empty path.
///
/// # Example
/// ```
/// use fixtrail::decode_polyline;
///
/// let path = decode_polyline("_p~iF~ps|U_ulLnnqC_mqNvxq`@").unwrap();
/// assert_eq!(path.len(), 3);
/// assert!((path[0].latitude - 38.5).abs() < 1e-5);
/// assert!((path[0].longitude + 120.2).abs() < 1e-5);
/// ```
pub fn decode_polyline(encoded: &str) -> Result<Vec<GpsPoint>, DecodeError> {
    let pairs = scan_structure(encoded.as_bytes())?;
    if pairs == 0 {
        return Ok(Vec::new());
    }

    let line = ::polyline::decode_polyline(encoded, POLYLINE_PRECISION).map_err(|e| {
        DecodeError::Malformed {
            message: format!("{:?}", e),
        }
    })?;

    let points: Vec<GpsPoint> = line.coords().map(|c| GpsPoint::new(c.y, c.x)).collect();

    if let Some((index, p)) = points.iter().enumerate().find(|(_, p)| !p.is_valid()) {
        return Err(DecodeError::OutOfRange {
            index,
            latitude: p.latitude,
            longitude: p.longitude,
        });
    }

    Ok(points)
}

/// Encode coordinates as a polyline string.
///
/// Returns `None` if any point is outside valid bounds.
pub fn encode_polyline(points: &[GpsPoint]) -> Option<String> {
    if points.iter().any(|p| !p.is_valid()) {
        return None;
    }

    // geo coordinates are (x, y) = (lng, lat)
    let line: LineString<f64> = points
        .iter()
        .map(|p| Coord {
            x: p.longitude,
            y: p.latitude,
        })
        .collect();

    ::polyline::encode_coordinates(line, POLYLINE_PRECISION).ok()
}

/// Walk the chunk stream and count complete coordinate pairs.
fn scan_structure(bytes: &[u8]) -> Result<usize, DecodeError> {
    let mut values = 0usize;
    let mut value_start = 0usize;
    let mut in_value = false;

    for (index, &byte) in bytes.iter().enumerate() {
        if !(CHUNK_OFFSET..=MAX_CHUNK_BYTE).contains(&byte) {
            return Err(DecodeError::InvalidCharacter { index, byte });
        }
        if !in_value {
            value_start = index;
            in_value = true;
        }
        if (byte - CHUNK_OFFSET) & CONTINUATION_BIT == 0 {
            values += 1;
            in_value = false;
        }
    }

    if in_value {
        return Err(DecodeError::Truncated { index: value_start });
    }
    if values % 2 != 0 {
        return Err(DecodeError::DanglingLatitude { values });
    }

    Ok(values / 2)
}
