//! Engine configuration options.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::points::PointsParams;
use crate::types::Price;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of events retained by the default journal.
    pub max_events: usize,
    /// How long to wait for a market lock before reporting a conflict.
    pub lock_timeout_ms: u64,
    /// Automatic retries on concurrency conflicts.
    pub max_retries: u32,
    /// Lowest price a perpetual market trades or reports at.
    pub price_floor: Decimal,
    /// Points conversion parameters.
    pub points: PointsParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_events: 100_000,
            lock_timeout_ms: 250,
            max_retries: 3,
            price_floor: dec!(0.01),
            points: PointsParams::default(),
        }
    }
}

impl EngineConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    // validated by AppConfig; fall back to the default floor if someone skipped that
    pub fn floor_price(&self) -> Price {
        Price::new(self.price_floor).unwrap_or(Price::new_unchecked(dec!(0.01)))
    }
}
