//! Date keys and per-date history buckets.
//!
//! A bucket at `history/<dateKey>` is stored in one of three shapes:
//!
//! - an array of fixes (written by an explicit re-sync),
//! - an object of session id to fix array (one entry per archived session),
//! - a legacy object keyed by `HH:MM:SS` holding `{latitude, longitude}`.
//!
//! All three decode into a single [`HistoryBucket`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use fixtrail::{Fix, GpsPoint};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DateKeyError, SyncError};

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y"];

/// Calendar date identifying a history bucket. Displays as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DateKey(NaiveDate);

impl DateKey {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    /// UTC calendar date of `timestamp`.
    pub fn of_timestamp(timestamp: &DateTime<Utc>) -> Self {
        Self(timestamp.date_naive())
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    pub fn succ(&self) -> Option<Self> {
        self.0.succ_opt().map(Self)
    }

    pub fn midnight_utc(&self) -> DateTime<Utc> {
        self.0.and_time(NaiveTime::MIN).and_utc()
    }

    /// True when the date is strictly after the UTC date of `now`.
    pub fn is_after(&self, now: &DateTime<Utc>) -> bool {
        self.0 > now.date_naive()
    }
}

impl FromStr for DateKey {
    type Err = DateKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        DATE_FORMATS
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
            .map(Self)
            .ok_or_else(|| DateKeyError {
                input: s.to_string(),
            })
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// All fixes stored for one calendar date.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBucket {
    pub date_key: DateKey,
    pub points: Vec<Fix>,
}

/// Stored fix record; only coordinates are mandatory.
#[derive(Debug, Deserialize)]
struct StoredFix {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    sequence: Option<u64>,
}

impl HistoryBucket {
    pub fn new(date_key: DateKey, points: Vec<Fix>) -> Self {
        Self { date_key, points }
    }

    /// Decode any of the supported stored shapes.
    pub fn from_value(date_key: DateKey, value: &Value) -> Result<Self, SyncError> {
        let path = crate::store::history_path(&date_key.to_string());
        let malformed = |message: String| SyncError::Malformed {
            path: path.clone(),
            message,
        };

        let points = match value {
            Value::Array(items) => decode_array(&date_key, items).map_err(malformed)?,
            Value::Object(map) if is_session_map(map) => {
                let mut sessions = Vec::with_capacity(map.len());
                for (session_id, items) in map {
                    let items = items.as_array().map(Vec::as_slice).unwrap_or_default();
                    let mut fixes = decode_array(&date_key, items).map_err(&malformed)?;
                    fixes.sort_by_key(|f| f.sequence);
                    sessions.push((session_id.as_str(), fixes));
                }
                merge_sessions(sessions)
            }
            Value::Object(map) => decode_legacy(&date_key, map).map_err(malformed)?,
            other => {
                return Err(malformed(format!(
                    "expected array or object, found {}",
                    type_name(other)
                )));
            }
        };

        Ok(Self { date_key, points })
    }

    /// Array form written by a re-sync.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(&self.points).unwrap_or(Value::Null)
    }

    pub fn path(&self) -> Vec<GpsPoint> {
        self.points.iter().map(Fix::point).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// True for the per-session object shape, the only one sessions can be
/// archived into without rewriting the bucket.
pub fn is_session_map(map: &serde_json::Map<String, Value>) -> bool {
    map.values().all(Value::is_array)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn to_fix(record: StoredFix, default_time: DateTime<Utc>, position: u64) -> Option<Fix> {
    let fix = Fix {
        latitude: record.latitude,
        longitude: record.longitude,
        timestamp: record.timestamp.unwrap_or(default_time),
        sequence: record.sequence.unwrap_or(position),
    };
    if fix.point().is_valid() {
        Some(fix)
    } else {
        warn!(
            "[HistoryBucket] Dropping stored point ({}, {}) outside valid bounds",
            fix.latitude, fix.longitude
        );
        None
    }
}

fn decode_array(date_key: &DateKey, items: &[Value]) -> Result<Vec<Fix>, String> {
    let midnight = date_key.midnight_utc();
    let mut fixes = Vec::with_capacity(items.len());

    // Sparse arrays come back with null holes
    for (position, item) in items.iter().enumerate().filter(|(_, v)| !v.is_null()) {
        let record: StoredFix = serde_json::from_value(item.clone())
            .map_err(|e| format!("entry {}: {}", position, e))?;
        fixes.extend(to_fix(record, midnight, position as u64));
    }
    Ok(fixes)
}

/// Concatenate sessions ordered by first timestamp, then id, renumbering
/// sequences across the whole bucket.
fn merge_sessions(mut sessions: Vec<(&str, Vec<Fix>)>) -> Vec<Fix> {
    sessions.retain(|(_, fixes)| !fixes.is_empty());
    sessions.sort_by(|(a_id, a), (b_id, b)| {
        let a_start = a.first().map(|f| f.timestamp);
        let b_start = b.first().map(|f| f.timestamp);
        a_start.cmp(&b_start).then_with(|| a_id.cmp(b_id))
    });

    sessions
        .into_iter()
        .flat_map(|(_, fixes)| fixes)
        .enumerate()
        .map(|(i, fix)| Fix {
            sequence: i as u64,
            ..fix
        })
        .collect()
}

fn decode_legacy(
    date_key: &DateKey,
    map: &serde_json::Map<String, Value>,
) -> Result<Vec<Fix>, String> {
    let midnight = date_key.midnight_utc();
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut fixes = Vec::with_capacity(entries.len());
    for (key, item) in entries {
        let mut record: StoredFix = serde_json::from_value(item.clone())
            .map_err(|e| format!("entry {}: {}", key, e))?;
        if record.timestamp.is_none() {
            record.timestamp = NaiveTime::parse_from_str(key, "%H:%M:%S")
                .ok()
                .map(|time| date_key.date().and_time(time).and_utc());
        }
        let position = fixes.len() as u64;
        record.sequence = Some(position);
        fixes.extend(to_fix(record, midnight, position));
    }
    Ok(fixes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn key() -> DateKey {
        DateKey::from_ymd(2025, 1, 1).unwrap()
    }

    #[test]
    fn test_date_key_formats() {
        for input in ["2025-01-01", "01-01-2025", "01/01/2025", " 2025-01-01 "] {
            let parsed: DateKey = input.parse().unwrap();
            assert_eq!(parsed, key(), "{}", input);
            assert_eq!(parsed.to_string(), "2025-01-01");
        }

        let parsed: DateKey = "02-01-2025".parse().unwrap();
        assert_eq!(parsed.to_string(), "2025-01-02");
    }

    #[test]
    fn test_date_key_rejects_garbage() {
        for input in ["", "2025-13-01", "31/02/2025", "yesterday", "2025/01/01"] {
            assert!(input.parse::<DateKey>().is_err(), "{}", input);
        }
    }

    #[test]
    fn test_date_key_future_check() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 23, 59, 59).unwrap();
        assert!(!key().is_after(&now));
        assert!(key().succ().unwrap().is_after(&now));
    }

    #[test]
    fn test_date_key_serde() {
        assert_eq!(serde_json::to_value(key()).unwrap(), json!("2025-01-01"));
    }

    #[test]
    fn test_decode_array_shape() {
        let value = json!([
            {"latitude": 37.78925, "longitude": -122.4334, "sequence": 1,
             "timestamp": "2025-01-01T10:05:00Z"},
            {"latitude": 37.78825, "longitude": -122.4324, "sequence": 0,
             "timestamp": "2025-01-01T10:00:00Z"}
        ]);
        let bucket = HistoryBucket::from_value(key(), &value).unwrap();
        assert_eq!(bucket.points.len(), 2);
        // Stored order is preserved; ordering by sequence is the reader's job
        assert_eq!(bucket.points[0].sequence, 1);
    }

    #[test]
    fn test_decode_array_defaults() {
        let value = json!([null, {"latitude": 1.0, "longitude": 2.0}]);
        let bucket = HistoryBucket::from_value(key(), &value).unwrap();
        assert_eq!(bucket.points.len(), 1);
        assert_eq!(bucket.points[0].sequence, 1);
        assert_eq!(bucket.points[0].timestamp, key().midnight_utc());
    }

    #[test]
    fn test_decode_session_shape() {
        let value = json!({
            "later": [
                {"latitude": 2.0, "longitude": 2.0, "sequence": 0, "timestamp": "2025-01-01T12:00:00Z"}
            ],
            "earlier": [
                {"latitude": 1.1, "longitude": 1.0, "sequence": 1, "timestamp": "2025-01-01T08:00:05Z"},
                {"latitude": 1.0, "longitude": 1.0, "sequence": 0, "timestamp": "2025-01-01T08:00:00Z"}
            ]
        });
        let bucket = HistoryBucket::from_value(key(), &value).unwrap();
        let summary: Vec<(f64, u64)> = bucket
            .points
            .iter()
            .map(|f| (f.latitude, f.sequence))
            .collect();
        assert_eq!(summary, vec![(1.0, 0), (1.1, 1), (2.0, 2)]);
    }

    #[test]
    fn test_decode_legacy_shape() {
        let value = json!({
            "10:05:00": {"latitude": 37.78925, "longitude": -122.4334},
            "10:00:00": {"latitude": 37.78825, "longitude": -122.4324}
        });
        let bucket = HistoryBucket::from_value(key(), &value).unwrap();
        assert_eq!(bucket.points.len(), 2);
        assert_eq!(bucket.points[0].latitude, 37.78825);
        assert_eq!(bucket.points[0].sequence, 0);
        assert_eq!(
            bucket.points[1].timestamp,
            Utc.with_ymd_and_hms(2025, 1, 1, 10, 5, 0).unwrap()
        );
    }

    #[test]
    fn test_invalid_points_dropped() {
        let value = json!([
            {"latitude": 95.0, "longitude": 0.0},
            {"latitude": 1.0, "longitude": 1.0}
        ]);
        let bucket = HistoryBucket::from_value(key(), &value).unwrap();
        assert_eq!(bucket.points.len(), 1);
    }

    #[test]
    fn test_malformed_values() {
        assert!(matches!(
            HistoryBucket::from_value(key(), &json!(42)),
            Err(SyncError::Malformed { .. })
        ));
        assert!(matches!(
            HistoryBucket::from_value(key(), &json!([{"lat": 1.0}])),
            Err(SyncError::Malformed { .. })
        ));
    }

    #[test]
    fn test_to_value_round_trips() {
        let bucket = HistoryBucket::from_value(
            key(),
            &json!([{"latitude": 1.0, "longitude": 2.0, "sequence": 0,
                     "timestamp": "2025-01-01T00:00:01Z"}]),
        )
        .unwrap();
        let again = HistoryBucket::from_value(key(), &bucket.to_value()).unwrap();
        assert_eq!(again, bucket);
    }
}
