//! Error types for the fixtrail library.
//!
//! Validation outcomes (`Rejection`, `BufferError`) are always recoverable
//! locally: a rejected fix is dropped and counted, never fatal to a session.
//! `DecodeError` is returned when an encoded polyline is malformed.

use std::fmt;

use chrono::{DateTime, Utc};

/// Why a raw fix was not accepted into a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// Latitude or longitude outside valid bounds (or not finite)
    OutOfRange { latitude: f64, longitude: f64 },
    /// Candidate timestamp is not after the previous accepted fix
    NonMonotonicTime {
        previous: DateTime<Utc>,
        candidate: DateTime<Utc>,
    },
    /// Implied speed from the previous fix exceeds the configured maximum
    ImplausibleJump { speed_mps: f64, max_speed_mps: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::OutOfRange {
                latitude,
                longitude,
            } => {
                write!(
                    f,
                    "Coordinate ({}, {}) is outside valid bounds",
                    latitude, longitude
                )
            }
            Rejection::NonMonotonicTime {
                previous,
                candidate,
            } => {
                write!(
                    f,
                    "Timestamp {} is not after previous fix at {}",
                    candidate.to_rfc3339(),
                    previous.to_rfc3339()
                )
            }
            Rejection::ImplausibleJump {
                speed_mps,
                max_speed_mps,
            } => {
                write!(
                    f,
                    "Implied speed {:.1} m/s exceeds maximum {:.1} m/s",
                    speed_mps, max_speed_mps
                )
            }
        }
    }
}

impl std::error::Error for Rejection {}

/// Session buffer misuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Appended fix does not carry the next sequence number
    OutOfOrder { expected: u64, got: u64 },
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::OutOfOrder { expected, got } => {
                write!(
                    f,
                    "Fix sequence {} is out of order, expected {}",
                    got, expected
                )
            }
        }
    }
}

impl std::error::Error for BufferError {}

/// Encoded polyline could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Byte outside the printable range used by the encoding
    InvalidCharacter { index: usize, byte: u8 },
    /// Input ends in the middle of a value (continuation bit still set)
    Truncated { index: usize },
    /// Input holds a latitude without its longitude
    DanglingLatitude { values: usize },
    /// Decoded coordinate is outside valid bounds
    OutOfRange {
        index: usize,
        latitude: f64,
        longitude: f64,
    },
    /// Rejected by the underlying decoder
    Malformed { message: String },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidCharacter { index, byte } => {
                write!(f, "Invalid polyline byte 0x{:02x} at {}", byte, index)
            }
            DecodeError::Truncated { index } => {
                write!(f, "Polyline truncated inside value starting at {}", index)
            }
            DecodeError::DanglingLatitude { values } => {
                write!(
                    f,
                    "Polyline holds {} values, latitude without longitude",
                    values
                )
            }
            DecodeError::OutOfRange {
                index,
                latitude,
                longitude,
            } => {
                write!(
                    f,
                    "Decoded point {} ({}, {}) is outside valid bounds",
                    index, latitude, longitude
                )
            }
            DecodeError::Malformed { message } => {
                write!(f, "Malformed polyline: {}", message)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_display() {
        let err = Rejection::ImplausibleJump {
            speed_mps: 1234.5,
            max_speed_mps: 300.0,
        };
        assert!(err.to_string().contains("1234.5"));
        assert!(err.to_string().contains("300.0"));
    }

    #[test]
    fn test_buffer_error_display() {
        let err = BufferError::OutOfOrder {
            expected: 1,
            got: 2,
        };
        assert_eq!(err.to_string(), "Fix sequence 2 is out of order, expected 1");
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::InvalidCharacter {
            index: 3,
            byte: b'!',
        };
        assert!(err.to_string().contains("0x21"));
    }
}
