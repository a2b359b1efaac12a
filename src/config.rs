// 12.0 config.rs: all settings in one place. engine limits, market defaults, starting capital,
// points params, logging. loadable from TOML, every section optional.
// 12.1 presets: sandbox for local play, competition for a scored season.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::account::FixedAllocation;
use crate::engine::EngineConfig;
use crate::points::PointsParams;
use crate::telemetry::LoggingConfig;
use crate::types::Quote;

// Defaults applied when a market is created without explicit parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketDefaults {
    // Shares seeded on each side of a new binary pool
    pub binary_seed_liquidity: Decimal,
    // Denominator of the holdings curve for new perpetual markets
    pub synthetic_supply: Decimal,
}

impl Default for MarketDefaults {
    fn default() -> Self {
        Self {
            binary_seed_liquidity: dec!(1000),
            synthetic_supply: dec!(10000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapitalConfig {
    // Balance every newly registered participant starts with
    pub starting_balance: Decimal,
}

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            starting_balance: dec!(10000),
        }
    }
}

impl CapitalConfig {
    pub fn allocator(&self) -> FixedAllocation {
        FixedAllocation(Quote::new(self.starting_balance))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub markets: MarketDefaults,
    pub capital: CapitalConfig,
    pub points: PointsParams,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    // Small pools and a short lock wait. prices move fast, good for demos
    pub fn sandbox() -> Self {
        let mut config = Self::default();
        config.markets.binary_seed_liquidity = dec!(100);
        config.markets.synthetic_supply = dec!(1000);
        config.capital.starting_balance = dec!(1000);
        config.engine.lock_timeout_ms = 50;
        config.logging.level = "debug".into();
        config
    }

    // Deep pools, more retries, JSON logs for ingestion
    pub fn competition() -> Self {
        let mut config = Self::default();
        config.markets.binary_seed_liquidity = dec!(10000);
        config.markets.synthetic_supply = dec!(100000);
        config.capital.starting_balance = dec!(10000);
        config.engine.max_retries = 5;
        config.engine.max_events = 1_000_000;
        config.logging.format = "json".into();
        config
    }

    /// Engine settings with the top-level points section applied.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            points: self.points.clone(),
            ..self.engine.clone()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.price_floor <= Decimal::ZERO {
            return Err(ConfigError::InvalidEngine {
                reason: "Price floor must be positive".to_string(),
            });
        }
        if self.engine.lock_timeout_ms == 0 {
            return Err(ConfigError::InvalidEngine {
                reason: "Lock timeout must be at least 1ms".to_string(),
            });
        }
        if self.engine.max_events == 0 {
            return Err(ConfigError::InvalidEngine {
                reason: "Event journal needs room for at least one event".to_string(),
            });
        }

        if self.markets.binary_seed_liquidity <= Decimal::ZERO {
            return Err(ConfigError::InvalidMarkets {
                reason: "Binary seed liquidity must be positive".to_string(),
            });
        }
        if self.markets.synthetic_supply <= Decimal::ZERO {
            return Err(ConfigError::InvalidMarkets {
                reason: "Synthetic supply must be positive".to_string(),
            });
        }

        if self.capital.starting_balance < Decimal::ZERO {
            return Err(ConfigError::InvalidCapital {
                reason: "Starting balance cannot be negative".to_string(),
            });
        }

        if self.points.divisor <= Decimal::ZERO {
            return Err(ConfigError::InvalidPoints {
                reason: "Points divisor must be positive".to_string(),
            });
        }
        if self.points.loss_floor > 0 {
            return Err(ConfigError::InvalidPoints {
                reason: "Loss floor cannot be positive".to_string(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid engine config: {reason}")]
    InvalidEngine { reason: String },

    #[error("Invalid market defaults: {reason}")]
    InvalidMarkets { reason: String },

    #[error("Invalid capital config: {reason}")]
    InvalidCapital { reason: String },

    #[error("Invalid points config: {reason}")]
    InvalidPoints { reason: String },
}
