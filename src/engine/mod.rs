// 8.0: trading engine. coordinates trade execution, settlement, points and portfolio reads.
// markets are locked one at a time; accounts only under a market lock.
// no I/O beyond the audit sink.

mod config;
mod core;
mod portfolio;
mod results;
mod settlement;
mod trading;

pub use config::EngineConfig;
pub use core::Engine;
pub use results::{
    BalanceView, ClaimResult, ConflictReason, EngineError, MarketSummary, Portfolio, PositionView,
    ResolutionSummary, TradeQuote, TradeRequest, TradeResult,
};
