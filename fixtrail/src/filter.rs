//! Raw fix validation.
//!
//! [`FixFilter::accept`] is a pure function of the candidate and the
//! previously accepted fix. Checks run in order: coordinate range,
//! monotonic time, implied speed.

use serde::{Deserialize, Serialize};

use crate::error::Rejection;
use crate::geo_utils::haversine_distance;
use crate::{Fix, RawFix};

/// Configuration for fix validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterConfig {
    /// Maximum plausible speed between consecutive fixes.
    /// Default: 300.0 m/s
    pub max_speed_mps: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_speed_mps: 300.0,
        }
    }
}

/// Validates raw fixes and assigns session sequence numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixFilter {
    config: FilterConfig,
}

impl FixFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Validate `candidate` against the previously accepted fix.
    ///
    /// On acceptance the fix gets `previous.sequence + 1`, or 0 when it is the
    /// first fix of the session.
    ///
    /// # Example
    /// ```
    /// use chrono::{TimeZone, Utc};
    /// use fixtrail::{FixFilter, RawFix};
    ///
    /// let filter = FixFilter::default();
    /// let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
    /// let first = filter.accept(&RawFix::new(12.97, 77.59, t0), None).unwrap();
    /// assert_eq!(first.sequence, 0);
    /// ```
    pub fn accept(&self, candidate: &RawFix, previous: Option<&Fix>) -> Result<Fix, Rejection> {
        if !candidate.point().is_valid() {
            return Err(Rejection::OutOfRange {
                latitude: candidate.latitude,
                longitude: candidate.longitude,
            });
        }

        let sequence = match previous {
            None => 0,
            Some(prev) => {
                if candidate.timestamp <= prev.timestamp {
                    return Err(Rejection::NonMonotonicTime {
                        previous: prev.timestamp,
                        candidate: candidate.timestamp,
                    });
                }

                let elapsed = (candidate.timestamp - prev.timestamp)
                    .to_std()
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
                let distance = haversine_distance(&prev.point(), &candidate.point());
                // Sub-nanosecond gaps are treated as instantaneous moves
                let speed = if elapsed > 0.0 {
                    distance / elapsed
                } else if distance > 0.0 {
                    f64::INFINITY
                } else {
                    0.0
                };

                if speed > self.config.max_speed_mps {
                    return Err(Rejection::ImplausibleJump {
                        speed_mps: speed,
                        max_speed_mps: self.config.max_speed_mps,
                    });
                }

                prev.sequence + 1
            }
        };

        Ok(Fix {
            latitude: candidate.latitude,
            longitude: candidate.longitude,
            timestamp: candidate.timestamp,
            sequence,
        })
    }
}

/// Per-reason rejection counters for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterStats {
    pub accepted: u64,
    pub out_of_range: u64,
    pub non_monotonic_time: u64,
    pub implausible_jump: u64,
}

impl FilterStats {
    pub fn record_accepted(&mut self) {
        self.accepted += 1;
    }

    pub fn record_rejection(&mut self, rejection: &Rejection) {
        match rejection {
            Rejection::OutOfRange { .. } => self.out_of_range += 1,
            Rejection::NonMonotonicTime { .. } => self.non_monotonic_time += 1,
            Rejection::ImplausibleJump { .. } => self.implausible_jump += 1,
        }
    }

    pub fn rejected(&self) -> u64 {
        self.out_of_range + self.non_monotonic_time + self.implausible_jump
    }
}
