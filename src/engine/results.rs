// 8.0.2: result types and errors for engine operations.

use crate::account::{Account, AccountError};
use crate::market::{MarketError, MarketPrice, Resolution};
use crate::points::PointsAccount;
use crate::position::{LedgerError, Position};
use crate::pricing::PricingError;
use crate::types::{
    MarketId, MarketKind, Overflow, PositionId, Price, Quote, Side, TradeAction, TradeId, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A trade intent. `amount` is capital for buys and shares for sells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeRequest {
    pub user_id: UserId,
    pub market_id: MarketId,
    pub side: Side,
    pub action: TradeAction,
    pub amount: Decimal,
    /// Reject with a conflict if the market moved since this version was read.
    pub expected_version: Option<u64>,
}

impl TradeRequest {
    pub fn buy(user_id: UserId, market_id: MarketId, side: Side, amount: Decimal) -> Self {
        Self {
            user_id,
            market_id,
            side,
            action: TradeAction::Buy,
            amount,
            expected_version: None,
        }
    }

    pub fn sell(user_id: UserId, market_id: MarketId, side: Side, shares: Decimal) -> Self {
        Self {
            user_id,
            market_id,
            side,
            action: TradeAction::Sell,
            amount: shares,
            expected_version: None,
        }
    }

    pub fn at_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeResult {
    pub trade_id: TradeId,
    pub position_id: PositionId,
    pub market_id: MarketId,
    pub side: Side,
    pub action: TradeAction,
    pub shares: Decimal,
    // capital spent on a buy, proceeds of a sell
    pub amount: Quote,
    pub executed_price: Price,
    pub realized_pnl: Option<Quote>,
    pub points_delta: i64,
    pub new_balance: Quote,
    pub market_version: u64,
}

/// Read-only preview of a trade at the current market version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeQuote {
    pub market_id: MarketId,
    pub side: Side,
    pub action: TradeAction,
    pub shares: Decimal,
    pub amount: Quote,
    pub price: Price,
    pub realized_pnl: Option<Quote>,
    pub market_version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionSummary {
    pub market_id: MarketId,
    pub resolution: Resolution,
    pub settlement_price: Option<Price>,
    pub open_positions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimResult {
    pub position_id: PositionId,
    pub market_id: MarketId,
    pub user_id: UserId,
    pub payout: Quote,
    pub realized_pnl: Quote,
    pub points_delta: i64,
    pub new_balance: Quote,
}

/// One position valued at the current price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionView {
    pub position: Position,
    pub mark_price: Decimal,
    pub market_value: Quote,
    pub unrealized_pnl: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portfolio {
    pub user_id: UserId,
    pub balance: Quote,
    pub positions: Vec<PositionView>,
    pub total_market_value: Quote,
    pub total_unrealized_pnl: Quote,
    pub lifetime_pnl: Quote,
    pub reputation_points: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceView {
    pub user_id: UserId,
    pub balance: Quote,
    pub total_deposited: Quote,
    pub total_withdrawn: Quote,
    pub lifetime_pnl: Quote,
    pub points: PointsAccount,
}

impl From<&Account> for BalanceView {
    fn from(account: &Account) -> Self {
        Self {
            user_id: account.id,
            balance: account.balance,
            total_deposited: account.total_deposited,
            total_withdrawn: account.total_withdrawn,
            lifetime_pnl: account.realized_pnl,
            points: account.points.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSummary {
    pub market_id: MarketId,
    pub kind: MarketKind,
    pub title: String,
    pub resolved: bool,
    pub price: MarketPrice,
    pub traded_notional: Decimal,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    LockTimeout,
    StaleVersion { expected: u64, actual: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Quote, available: Quote },

    #[error("Insufficient shares: requested {requested}, held {held}")]
    InsufficientShares { requested: Decimal, held: Decimal },

    #[error("Market {0} is resolved")]
    MarketResolved(MarketId),

    #[error("Market {0} is already resolved")]
    AlreadyResolved(MarketId),

    #[error("Position {0} already claimed")]
    AlreadyClaimed(PositionId),

    #[error("Concurrency conflict on market {market_id}: {reason:?}")]
    ConcurrencyConflict {
        market_id: MarketId,
        reason: ConflictReason,
    },

    #[error("Arithmetic error: {0}")]
    Arithmetic(String),

    #[error("Market {0} not found")]
    MarketNotFound(MarketId),

    #[error("Position {0} not found")]
    PositionNotFound(PositionId),

    #[error("User {0} not found")]
    UserNotFound(UserId),
}

impl EngineError {
    /// Only lock conflicts are worth retrying; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrencyConflict { .. })
    }
}

impl From<Overflow> for EngineError {
    fn from(err: Overflow) -> Self {
        EngineError::Arithmetic(err.to_string())
    }
}

impl From<PricingError> for EngineError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::Overflow(overflow) => overflow.into(),
            other => EngineError::Validation(other.to_string()),
        }
    }
}

impl From<MarketError> for EngineError {
    fn from(err: MarketError) -> Self {
        match err {
            MarketError::Pricing(pricing) => pricing.into(),
            other => EngineError::Validation(other.to_string()),
        }
    }
}

impl From<LedgerError> for EngineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidShares(shares) => {
                EngineError::InvalidAmount(format!("share amount must be positive: {shares}"))
            }
            LedgerError::InsufficientShares { requested, held } => {
                EngineError::InsufficientShares { requested, held }
            }
            LedgerError::AlreadyClaimed(id) => EngineError::AlreadyClaimed(id),
            LedgerError::NothingToClaim(id) => {
                EngineError::Validation(format!("position {id} holds no shares to claim"))
            }
            LedgerError::Overflow(overflow) => overflow.into(),
        }
    }
}

impl From<AccountError> for EngineError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::InsufficientBalance {
                requested,
                available,
            } => EngineError::InsufficientFunds {
                requested,
                available,
            },
            AccountError::InvalidAmount(amount) => {
                EngineError::InvalidAmount(format!("amount must be positive: {amount}"))
            }
            AccountError::StalePnl { recorded, supplied } => EngineError::Validation(format!(
                "lifetime P&L is {recorded}, conversion started from {supplied}"
            )),
            AccountError::Overflow(overflow) => overflow.into(),
        }
    }
}
