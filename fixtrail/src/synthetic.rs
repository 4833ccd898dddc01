//! Synthetic fix generation for simulators and history backfill.
//!
//! Fixes are scattered uniformly within ±[`SCATTER_DEGREES`] of a centre.
//! Generators are seeded so simulated sessions are reproducible.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{Fix, GpsPoint, RawFix};

/// Half-width of the scatter square around the centre, in degrees.
pub const SCATTER_DEGREES: f64 = 0.005;

/// Produces raw fixes around a fixed centre on a virtual clock.
#[derive(Debug, Clone)]
pub struct ScatterGenerator {
    center: GpsPoint,
    clock: DateTime<Utc>,
    step: Duration,
    rng: StdRng,
}

impl ScatterGenerator {
    pub fn new(center: GpsPoint, start: DateTime<Utc>, step: Duration, seed: u64) -> Self {
        Self {
            center,
            clock: start,
            step,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn center(&self) -> GpsPoint {
        self.center
    }

    fn scatter(&mut self) -> GpsPoint {
        let lat = self.center.latitude + self.rng.random_range(-SCATTER_DEGREES..=SCATTER_DEGREES);
        let lng =
            self.center.longitude + self.rng.random_range(-SCATTER_DEGREES..=SCATTER_DEGREES);
        GpsPoint::new(lat.clamp(-90.0, 90.0), lng.clamp(-180.0, 180.0))
    }

    /// Next fix; the clock advances by one step per call.
    pub fn next_raw(&mut self) -> RawFix {
        let point = self.scatter();
        let fix = RawFix::new(point.latitude, point.longitude, self.clock);
        self.clock += self.step;
        fix
    }

    /// `count` accepted-form fixes spread evenly over the UTC day `date`.
    ///
    /// Sequences run `0..count`; timestamps are strictly increasing.
    pub fn day(&mut self, date: NaiveDate, count: usize) -> Vec<Fix> {
        let midnight = date.and_time(chrono::NaiveTime::MIN).and_utc();
        let spacing_ms = if count == 0 {
            0
        } else {
            // Stays inside the day even for very large counts
            (Duration::days(1).num_milliseconds() / count as i64).max(1)
        };

        (0..count)
            .map(|i| {
                let point = self.scatter();
                Fix {
                    latitude: point.latitude,
                    longitude: point.longitude,
                    timestamp: midnight + Duration::milliseconds(spacing_ms * i as i64),
                    sequence: i as u64,
                }
            })
            .collect()
    }
}
