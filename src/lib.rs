// markets-core: pricing and settlement engine for a simulated market game.
// binary YES/NO pools priced by an AMM, perpetual markets priced by net holdings.
// all money math is checked decimal; overflow is an error, never a panic.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: MarketId, UserId, Side, Price, Quote, checked math
//   2.x  pricing.rs: binary AMM pool, linear holdings curve
//   3.x  market.rs: market kinds, status, resolution, runtime state
//   4.x  position.rs: position ledger, VWAP entry, realized pnl, claims
//   5.x  account.rs: balances, starting capital allocation
//   6.x  points.rs: pnl to points, reputation
//   7.x  events.rs: audit events and the bounded journal
//   8.x  engine/: core engine, locking, retries, ids
//   9.x  engine/trading.rs: buy, sell, quote, close
//   10.x engine/settlement.rs: resolve, claim
//   11.x engine/portfolio.rs: prices, positions, balances, listings
//   12.x config.rs: app config, presets, TOML loading
//   13.x telemetry.rs: tracing subscriber setup

// core modules
pub mod account;
pub mod engine;
pub mod events;
pub mod market;
pub mod points;
pub mod position;
pub mod pricing;
pub mod types;

// integration modules
pub mod config;
pub mod telemetry;

// re exports for convenience
pub use account::*;
pub use config::{AppConfig, CapitalConfig, ConfigError, MarketDefaults};
pub use engine::*;
pub use events::*;
pub use market::*;
pub use points::*;
pub use position::*;
pub use pricing::*;
pub use telemetry::LoggingConfig;
pub use types::*;
