//! Runtime configuration.
//!
//! All structs deserialize from camelCase JSON with every field optional.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TrackingError;
use crate::retry::RetryPolicy;
use fixtrail::FilterConfig;

/// Remote store call settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Bound on every store call; elapsed calls resolve as `Unavailable`
    pub timeout_ms: u64,
    /// Poll interval for stores without push notifications
    pub poll_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            poll_interval_ms: 2_000,
        }
    }
}

impl SyncConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Tracking controller settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackingConfig {
    /// Period between fix requests
    pub cadence_ms: u64,
    /// Bound on a single location provider call
    pub provider_timeout_ms: u64,
    pub filter: FilterConfig,
    /// Backoff for live mirroring and session archiving
    pub retry: RetryPolicy,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            cadence_ms: 5_000,
            provider_timeout_ms: 15_000,
            filter: FilterConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl TrackingConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, TrackingError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| TrackingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TrackingError> {
        if self.cadence_ms == 0 {
            return Err(TrackingError::Config("cadenceMs must be positive".into()));
        }
        if self.provider_timeout_ms == 0 {
            return Err(TrackingError::Config(
                "providerTimeoutMs must be positive".into(),
            ));
        }
        if self.filter.max_speed_mps.is_nan() || self.filter.max_speed_mps <= 0.0 {
            return Err(TrackingError::Config(
                "filter.maxSpeedMps must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let sync = SyncConfig::default();
        assert_eq!(sync.timeout(), Duration::from_secs(15));

        let tracking = TrackingConfig::default();
        assert_eq!(tracking.cadence(), Duration::from_secs(5));
        assert_eq!(tracking.filter.max_speed_mps, 300.0);
        assert_eq!(tracking.retry.max_attempts, 5);
    }

    #[test]
    fn test_from_json_partial() {
        let config = TrackingConfig::from_json(
            r#"{"cadenceMs": 1000, "filter": {"maxSpeedMps": 40.0}, "retry": {"maxAttempts": 3}}"#,
        )
        .unwrap();
        assert_eq!(config.cadence(), Duration::from_secs(1));
        assert_eq!(config.filter.max_speed_mps, 40.0);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay_ms, 1_000);
        assert_eq!(config.provider_timeout_ms, 15_000);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(matches!(
            TrackingConfig::from_json(r#"{"cadenceMs": 0}"#),
            Err(TrackingError::Config(_))
        ));
        assert!(matches!(
            TrackingConfig::from_json("not json"),
            Err(TrackingError::Config(_))
        ));
    }
}
