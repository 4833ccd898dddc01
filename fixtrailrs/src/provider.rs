//! Location providers feeding the tracking cadence.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use fixtrail::RawFix;

use crate::error::ProviderError;

/// Source of raw position fixes.
pub trait LocationProvider: Send + Sync + 'static {
    /// One-shot request for the current position.
    fn current_position(&self) -> impl Future<Output = Result<RawFix, ProviderError>> + Send;
}

/// Replays a fixed script of results, then reports the position as
/// unavailable.
#[derive(Default)]
pub struct ReplayProvider {
    script: Mutex<VecDeque<Result<RawFix, ProviderError>>>,
}

impl ReplayProvider {
    pub fn new(script: impl IntoIterator<Item = Result<RawFix, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
        }
    }

    pub fn from_fixes(fixes: impl IntoIterator<Item = RawFix>) -> Self {
        Self::new(fixes.into_iter().map(Ok))
    }

    /// Queue another result after the current script.
    pub fn push(&self, result: Result<RawFix, ProviderError>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(result);
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl LocationProvider for ReplayProvider {
    async fn current_position(&self) -> Result<RawFix, ProviderError> {
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        next.unwrap_or_else(|| Err(ProviderError::PositionUnavailable("replay exhausted".into())))
    }
}

/// Scatters fixes around a centre on a virtual clock that advances by one
/// cadence per request.
#[cfg(feature = "synthetic")]
pub struct SimulatedProvider {
    generator: Mutex<fixtrail::ScatterGenerator>,
}

#[cfg(feature = "synthetic")]
impl SimulatedProvider {
    pub fn new(
        center: fixtrail::GpsPoint,
        start: chrono::DateTime<chrono::Utc>,
        cadence: std::time::Duration,
        seed: u64,
    ) -> Self {
        let step = chrono::Duration::from_std(cadence).unwrap_or(chrono::Duration::seconds(5));
        Self {
            generator: Mutex::new(fixtrail::ScatterGenerator::new(center, start, step, seed)),
        }
    }

    /// Randomly seeded simulator starting now.
    pub fn around(center: fixtrail::GpsPoint, cadence: std::time::Duration) -> Self {
        Self::new(center, chrono::Utc::now(), cadence, rand::random())
    }
}

#[cfg(feature = "synthetic")]
impl LocationProvider for SimulatedProvider {
    async fn current_position(&self) -> Result<RawFix, ProviderError> {
        Ok(self
            .generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_raw())
    }
}
