//! Synthetic history backfill tests.
//!
//! Run with: `cargo test --test synthetic_backfill --features synthetic`

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use fixtrailrs::{
    DateKey, GpsPoint, HistoryReconstructor, MemoryStore, ReconstructError, SyncClient,
    SyncConfig, haversine_distance,
};
use serde_json::json;

fn reconstructor(store: Arc<MemoryStore>) -> HistoryReconstructor<MemoryStore> {
    HistoryReconstructor::new(Arc::new(SyncClient::new(store, SyncConfig::default())))
}

#[tokio::test]
async fn test_backfill_empty_day() {
    let store = Arc::new(MemoryStore::new());
    let history = reconstructor(Arc::clone(&store));
    let day = DateKey::from_ymd(2025, 1, 1).unwrap();
    let center = GpsPoint::new(12.9716, 77.5946);
    let now = Utc.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap();

    let bucket = history
        .backfill_synthetic(&day, center, 24, 42, now)
        .await
        .unwrap();
    assert_eq!(bucket.points.len(), 24);
    assert!(store.peek("history/2025-01-01").is_some());

    let track = history.reconstruct_track(&day, None, now).await.unwrap();
    assert_eq!(track.markers.len(), 24);
    for fix in &track.markers {
        assert_eq!(DateKey::of_timestamp(&fix.timestamp), day);
        // Scatter stays within about a kilometre of the centre
        assert!(haversine_distance(&center, &fix.point()) < 1_000.0);
    }
}

#[tokio::test]
async fn test_backfill_keeps_existing_data() {
    let store = Arc::new(MemoryStore::with_root(json!({"history": {"2025-01-01": [
        {"latitude": 1.0, "longitude": 2.0, "sequence": 0}
    ]}})));
    let history = reconstructor(Arc::clone(&store));
    let day = DateKey::from_ymd(2025, 1, 1).unwrap();
    let now = Utc.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap();

    let bucket = history
        .backfill_synthetic(&day, GpsPoint::new(12.97, 77.59), 24, 7, now)
        .await
        .unwrap();
    assert_eq!(bucket.points.len(), 1);
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_backfill_future_day_rejected() {
    let store = Arc::new(MemoryStore::new());
    let history = reconstructor(Arc::clone(&store));
    let day = DateKey::from_ymd(2025, 2, 1).unwrap();
    let now = Utc.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap();

    let err = history
        .backfill_synthetic(&day, GpsPoint::new(12.97, 77.59), 24, 7, now)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconstructError::FutureDate { .. }));
    assert_eq!(store.read_count(), 0);
}
