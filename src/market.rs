//! Market definitions and runtime state.
//!
//! A market is either a binary YES/NO pool or a perpetual holdings market. The
//! kind is fixed when the market is created and decides which sides may trade.
//! Prices are never stored; they are projected from the pool or from net
//! holdings on every read.

use crate::pricing::{BinaryPool, BinaryPrices, HoldingsCurve, PricingError};
use crate::types::{checked_add, MarketId, MarketKind, Overflow, Price, Side, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle of a market. Resolution is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
    Open,
    Resolved,
}

/// How a market resolves. Binary markets resolve to an outcome, perpetual
/// markets settle at their spot price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Yes,
    No,
    Spot,
}

impl Resolution {
    pub fn kind(&self) -> MarketKind {
        match self {
            Resolution::Yes | Resolution::No => MarketKind::Binary,
            Resolution::Spot => MarketKind::Perpetual,
        }
    }

    pub fn winning_side(&self) -> Option<Side> {
        match self {
            Resolution::Yes => Some(Side::Yes),
            Resolution::No => Some(Side::No),
            Resolution::Spot => None,
        }
    }
}

/// Creation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MarketSpec {
    Binary {
        question: String,
        seed_yes: Decimal,
        seed_no: Decimal,
    },
    Perpetual {
        ticker: String,
        initial_price: Decimal,
        synthetic_supply: Decimal,
    },
}

impl MarketSpec {
    pub fn binary(question: impl Into<String>, seed_liquidity: Decimal) -> Self {
        Self::Binary {
            question: question.into(),
            seed_yes: seed_liquidity,
            seed_no: seed_liquidity,
        }
    }

    pub fn perpetual(
        ticker: impl Into<String>,
        initial_price: Decimal,
        synthetic_supply: Decimal,
    ) -> Self {
        Self::Perpetual {
            ticker: ticker.into(),
            initial_price,
            synthetic_supply,
        }
    }
}

/// Pricing state. The variant is the market kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pricing {
    Binary(BinaryPool),
    Holdings {
        curve: HoldingsCurve,
        net_holdings: Decimal,
    },
}

/// Current price as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketPrice {
    Binary(BinaryPrices),
    Spot(Price),
}

impl MarketPrice {
    /// Per-share mark for one side of the market.
    pub fn for_side(&self, side: Side) -> Option<Decimal> {
        match self {
            MarketPrice::Binary(prices) => prices.for_side(side),
            MarketPrice::Spot(price) => match side {
                Side::Long | Side::Short => Some(price.value()),
                Side::Yes | Side::No => None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    /// Question for binary markets, ticker for perpetual ones.
    pub title: String,
    pub pricing: Pricing,
    pub status: MarketStatus,
    pub resolution: Option<Resolution>,
    /// Perpetual spot frozen at resolution.
    pub settlement_price: Option<Price>,
    /// Cumulative capital traded. Never decreases.
    pub traded_notional: Decimal,
    /// Bumped on every committed mutation.
    pub version: u64,
    pub created_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}

impl Market {
    pub fn new(id: MarketId, spec: MarketSpec, timestamp: Timestamp) -> Result<Self, MarketError> {
        let (title, pricing) = match spec {
            MarketSpec::Binary {
                question,
                seed_yes,
                seed_no,
            } => (question, Pricing::Binary(BinaryPool::seeded(seed_yes, seed_no)?)),
            MarketSpec::Perpetual {
                ticker,
                initial_price,
                synthetic_supply,
            } => (
                ticker,
                Pricing::Holdings {
                    curve: HoldingsCurve::new(initial_price, synthetic_supply)?,
                    net_holdings: Decimal::ZERO,
                },
            ),
        };

        if title.trim().is_empty() {
            return Err(MarketError::MissingTitle);
        }

        Ok(Self {
            id,
            title,
            pricing,
            status: MarketStatus::Open,
            resolution: None,
            settlement_price: None,
            traded_notional: Decimal::ZERO,
            version: 0,
            created_at: timestamp,
            resolved_at: None,
        })
    }

    pub fn kind(&self) -> MarketKind {
        match self.pricing {
            Pricing::Binary(_) => MarketKind::Binary,
            Pricing::Holdings { .. } => MarketKind::Perpetual,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == MarketStatus::Open
    }

    pub fn check_side(&self, side: Side) -> Result<(), MarketError> {
        if side.kind() == self.kind() {
            Ok(())
        } else {
            Err(MarketError::SideMismatch {
                side,
                kind: self.kind(),
            })
        }
    }

    /// Current price. A resolved perpetual reports its frozen settlement price.
    pub fn price(&self, floor: Price) -> Result<MarketPrice, MarketError> {
        match &self.pricing {
            Pricing::Binary(pool) => Ok(MarketPrice::Binary(pool.prices()?)),
            Pricing::Holdings {
                curve,
                net_holdings,
            } => match self.settlement_price {
                Some(settled) => Ok(MarketPrice::Spot(settled)),
                None => Ok(MarketPrice::Spot(curve.price(*net_holdings, floor)?)),
            },
        }
    }

    pub fn net_holdings(&self) -> Option<Decimal> {
        match &self.pricing {
            Pricing::Binary(_) => None,
            Pricing::Holdings { net_holdings, .. } => Some(*net_holdings),
        }
    }

    pub fn pool(&self) -> Option<&BinaryPool> {
        match &self.pricing {
            Pricing::Binary(pool) => Some(pool),
            Pricing::Holdings { .. } => None,
        }
    }

    pub fn record_trade(&mut self, notional: Decimal) -> Result<(), Overflow> {
        self.traded_notional = checked_add(self.traded_notional, notional, "traded notional")?;
        self.version += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketError {
    #[error("Market title must not be empty")]
    MissingTitle,

    #[error("Side {side} does not trade in {kind:?} markets")]
    SideMismatch { side: Side, kind: MarketKind },

    #[error("Resolution {resolution:?} does not apply to {kind:?} markets")]
    ResolutionMismatch {
        resolution: Resolution,
        kind: MarketKind,
    },

    #[error("Pricing error: {0}")]
    Pricing(#[from] PricingError),
}
