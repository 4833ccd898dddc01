//! Historical path reconstruction from date buckets.
//!
//! Stored points are always ordered by their `sequence`, never by the order
//! the store returns them. An external polyline, when supplied, replaces
//! the connecting geometry while the stored points stay the markers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fixtrail::{DEFAULT_MAX_WAYPOINTS, Fix, GpsPoint, RouteGeometry, decode_polyline, plan_waypoint_legs};
use log::{debug, info, warn};

use crate::bucket::{DateKey, HistoryBucket};
use crate::directions::{DirectionsRequest, DirectionsService};
use crate::error::{ReconstructError, SyncError};
use crate::store::RemoteStore;
use crate::sync::SyncClient;

/// Longest span `reconstruct_range` will read.
pub const MAX_RANGE_DAYS: i64 = 31;

/// Where the connecting geometry came from.
#[derive(Debug, Clone, PartialEq)]
pub enum PolylineStatus {
    /// Raw points only
    NotRequested,
    /// External geometry used
    Applied { points: usize },
    /// External geometry unusable; raw points used instead
    Fallback { reason: String },
}

/// One day of history ready for display.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryTrack {
    pub date_key: DateKey,
    /// Stored fixes in sequence order
    pub markers: Vec<Fix>,
    pub geometry: RouteGeometry,
    pub polyline_status: PolylineStatus,
}

/// Several consecutive days joined into one path.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeHistory {
    pub from: DateKey,
    pub to: DateKey,
    /// Days that had data, in order
    pub days: Vec<DateKey>,
    /// Fixes across all days, renumbered from 0
    pub markers: Vec<Fix>,
    pub geometry: RouteGeometry,
}

pub struct HistoryReconstructor<S: RemoteStore> {
    sync: Arc<SyncClient<S>>,
}

impl<S: RemoteStore> HistoryReconstructor<S> {
    pub fn new(sync: Arc<SyncClient<S>>) -> Self {
        Self { sync }
    }

    /// Geometry for `date_key` (any supported date format).
    ///
    /// Fails with `FutureDate` before touching the store when the date is
    /// after `now`, and with `NoDataForDate` when nothing is stored.
    pub async fn reconstruct(
        &self,
        date_key: &str,
        external_polyline: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RouteGeometry, ReconstructError> {
        let key: DateKey = date_key.parse()?;
        Ok(self
            .reconstruct_track(&key, external_polyline, now)
            .await?
            .geometry)
    }

    pub async fn reconstruct_track(
        &self,
        date_key: &DateKey,
        external_polyline: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<HistoryTrack, ReconstructError> {
        if date_key.is_after(&now) {
            return Err(ReconstructError::FutureDate {
                date_key: date_key.to_string(),
            });
        }

        let bucket = self.read_day(date_key).await?.ok_or_else(|| {
            ReconstructError::NoDataForDate {
                date_key: date_key.to_string(),
            }
        })?;

        let markers = ordered(bucket);
        let raw_path: Vec<GpsPoint> = markers.iter().map(Fix::point).collect();

        let (geometry, polyline_status) = match external_polyline {
            None => (RouteGeometry::from_points(raw_path), PolylineStatus::NotRequested),
            Some(encoded) => match decode_polyline(encoded) {
                Ok(path) if !path.is_empty() => {
                    let points = path.len();
                    (
                        RouteGeometry::from_points(path),
                        PolylineStatus::Applied { points },
                    )
                }
                Ok(_) => (
                    RouteGeometry::from_points(raw_path),
                    PolylineStatus::Fallback {
                        reason: "empty polyline".to_string(),
                    },
                ),
                Err(e) => {
                    warn!(
                        "[HistoryReconstructor] Polyline for {} unusable, using raw points: {}",
                        date_key, e
                    );
                    (
                        RouteGeometry::from_points(raw_path),
                        PolylineStatus::Fallback {
                            reason: e.to_string(),
                        },
                    )
                }
            },
        };

        debug!(
            "[HistoryReconstructor] {}: {} markers, {} path points",
            date_key,
            markers.len(),
            geometry.path.len()
        );

        Ok(HistoryTrack {
            date_key: *date_key,
            markers,
            geometry,
            polyline_status,
        })
    }

    /// Join every stored day in `[from, to]`, skipping days without data.
    pub async fn reconstruct_range(
        &self,
        from: &DateKey,
        to: &DateKey,
        now: DateTime<Utc>,
    ) -> Result<RangeHistory, ReconstructError> {
        if from > to {
            return Err(ReconstructError::InvalidRange(format!(
                "{} is after {}",
                from, to
            )));
        }
        let span = (to.date() - from.date()).num_days() + 1;
        if span > MAX_RANGE_DAYS {
            return Err(ReconstructError::InvalidRange(format!(
                "{} days requested, at most {} allowed",
                span, MAX_RANGE_DAYS
            )));
        }
        if to.is_after(&now) {
            return Err(ReconstructError::FutureDate {
                date_key: to.to_string(),
            });
        }

        let mut days = Vec::new();
        let mut markers = Vec::new();
        let mut day = Some(*from);
        while let Some(current) = day.filter(|d| d <= to) {
            if let Some(bucket) = self.read_day(&current).await? {
                if !bucket.is_empty() {
                    days.push(current);
                    markers.extend(ordered(bucket));
                }
            }
            day = current.succ();
        }

        if markers.is_empty() {
            return Err(ReconstructError::NoDataForDate {
                date_key: format!("{}..{}", from, to),
            });
        }

        for (i, fix) in markers.iter_mut().enumerate() {
            fix.sequence = i as u64;
        }
        let geometry = RouteGeometry::from_fixes(&markers);
        info!(
            "[HistoryReconstructor] Range {}..{}: {} days, {} points",
            from,
            to,
            days.len(),
            markers.len()
        );

        Ok(RangeHistory {
            from: *from,
            to: *to,
            days,
            markers,
            geometry,
        })
    }

    /// Reconstruct a day and route it through a directions service.
    ///
    /// Markers are split into legs of at most 25 waypoints. Any service or
    /// decode failure falls back to the raw path.
    pub async fn reconstruct_with_directions<D: DirectionsService>(
        &self,
        date_key: &DateKey,
        service: &D,
        now: DateTime<Utc>,
    ) -> Result<HistoryTrack, ReconstructError> {
        let mut track = self.reconstruct_track(date_key, None, now).await?;
        if track.markers.len() < 2 {
            return Ok(track);
        }

        match self.route_through(&track.geometry.path, service).await {
            Ok(path) => {
                track.polyline_status = PolylineStatus::Applied { points: path.len() };
                track.geometry = RouteGeometry::from_points(path);
            }
            Err(reason) => {
                warn!(
                    "[HistoryReconstructor] Directions for {} failed, using raw points: {}",
                    date_key, reason
                );
                track.polyline_status = PolylineStatus::Fallback { reason };
            }
        }
        Ok(track)
    }

    async fn route_through<D: DirectionsService>(
        &self,
        path: &[GpsPoint],
        service: &D,
    ) -> Result<Vec<GpsPoint>, String> {
        let mut joined: Vec<GpsPoint> = Vec::new();

        for leg in plan_waypoint_legs(path, DEFAULT_MAX_WAYPOINTS) {
            let route = service
                .route(&DirectionsRequest::from(&leg))
                .await
                .map_err(|e| e.to_string())?;
            for route_leg in route.legs {
                let points = decode_polyline(&route_leg.polyline).map_err(|e| e.to_string())?;
                let skip = usize::from(joined.last().is_some() && joined.last() == points.first());
                joined.extend(points.into_iter().skip(skip));
            }
        }

        if joined.is_empty() {
            return Err("directions returned no geometry".to_string());
        }
        Ok(joined)
    }

    /// Write a generated bucket for a date that has no data.
    ///
    /// An existing bucket is returned untouched.
    #[cfg(feature = "synthetic")]
    pub async fn backfill_synthetic(
        &self,
        date_key: &DateKey,
        center: GpsPoint,
        count: usize,
        seed: u64,
        now: DateTime<Utc>,
    ) -> Result<HistoryBucket, ReconstructError> {
        use fixtrail::ScatterGenerator;

        if date_key.is_after(&now) {
            return Err(ReconstructError::FutureDate {
                date_key: date_key.to_string(),
            });
        }
        if let Some(existing) = self.read_day(date_key).await? {
            debug!("[HistoryReconstructor] {} already has data, not backfilling", date_key);
            return Ok(existing);
        }

        let mut generator = ScatterGenerator::new(
            center,
            date_key.midnight_utc(),
            chrono::Duration::seconds(5),
            seed,
        );
        let bucket = HistoryBucket::new(*date_key, generator.day(date_key.date(), count));
        self.sync.resync_bucket(&bucket).await?;
        info!(
            "[HistoryReconstructor] Backfilled {} with {} synthetic points",
            date_key, count
        );
        Ok(bucket)
    }

    /// `None` when the store has nothing for the date.
    async fn read_day(&self, date_key: &DateKey) -> Result<Option<HistoryBucket>, ReconstructError> {
        match self.sync.read_bucket(date_key).await {
            Ok(bucket) => Ok(Some(bucket)),
            Err(SyncError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn ordered(bucket: HistoryBucket) -> Vec<Fix> {
    let mut markers = bucket.points;
    markers.sort_by_key(|f| f.sequence);
    markers
}
