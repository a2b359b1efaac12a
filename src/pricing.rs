// 2.0: pricing curves. both are pure projections of market state; nothing here stores a price.
// 2.1 binary AMM: yes = Y/(Y+N), no = N/(Y+N).
// 2.2 holdings curve: price = initial + net_holdings / synthetic_supply.

use crate::types::{checked_add, checked_div, checked_sub, MarketKind, Overflow, Price, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryPrices {
    pub yes: Decimal,
    pub no: Decimal,
}

impl BinaryPrices {
    pub fn for_side(&self, side: Side) -> Option<Decimal> {
        match side {
            Side::Yes => Some(self.yes),
            Side::No => Some(self.no),
            Side::Long | Side::Short => None,
        }
    }
}

/// Result of pricing a buy against the pool snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryFill {
    pub shares: Decimal,
    pub price: Price,
}

/// YES/NO share pools. `total_volume` is stored alongside the two pools and
/// always equals their sum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryPool {
    yes_shares: Decimal,
    no_shares: Decimal,
    total_volume: Decimal,
}

impl BinaryPool {
    /// Both sides must be seeded; an empty pool has no defined price.
    pub fn seeded(yes_shares: Decimal, no_shares: Decimal) -> Result<Self, PricingError> {
        if yes_shares <= Decimal::ZERO || no_shares <= Decimal::ZERO {
            return Err(PricingError::InvalidSeed { yes: yes_shares, no: no_shares });
        }
        let total_volume = checked_add(yes_shares, no_shares, "pool seed")?;
        Ok(Self {
            yes_shares,
            no_shares,
            total_volume,
        })
    }

    pub fn yes_shares(&self) -> Decimal {
        self.yes_shares
    }

    pub fn no_shares(&self) -> Decimal {
        self.no_shares
    }

    pub fn total_volume(&self) -> Decimal {
        self.total_volume
    }

    pub fn is_balanced(&self) -> bool {
        self.yes_shares + self.no_shares == self.total_volume
    }

    pub fn shares(&self, side: Side) -> Result<Decimal, PricingError> {
        match side {
            Side::Yes => Ok(self.yes_shares),
            Side::No => Ok(self.no_shares),
            Side::Long | Side::Short => Err(PricingError::SideMismatch {
                side,
                kind: MarketKind::Binary,
            }),
        }
    }

    pub fn price(&self, side: Side) -> Result<Price, PricingError> {
        let side_shares = self.shares(side)?;
        let total = checked_add(self.yes_shares, self.no_shares, "pool total")?;
        if total <= Decimal::ZERO {
            return Err(PricingError::EmptyPool);
        }
        let price = checked_div(side_shares, total, "pool price")?;
        Price::new(price).ok_or(PricingError::EmptyPool)
    }

    pub fn prices(&self) -> Result<BinaryPrices, PricingError> {
        Ok(BinaryPrices {
            yes: self.price(Side::Yes)?.value(),
            no: self.price(Side::No)?.value(),
        })
    }

    /// Shares bought for `amount` at the current snapshot price.
    pub fn quote_buy(&self, side: Side, amount: Decimal) -> Result<BinaryFill, PricingError> {
        let price = self.price(side)?;
        let shares = checked_div(amount, price.value(), "binary buy shares")?;
        Ok(BinaryFill { shares, price })
    }

    pub fn add_shares(&mut self, side: Side, shares: Decimal) -> Result<(), PricingError> {
        let pool = self.shares(side)?;
        let next_pool = checked_add(pool, shares, "pool add")?;
        self.commit_side(side, next_pool)
    }

    /// Sold shares return to the curve. A pool may never be drained to zero.
    pub fn remove_shares(&mut self, side: Side, shares: Decimal) -> Result<(), PricingError> {
        let pool = self.shares(side)?;
        let next_pool = checked_sub(pool, shares, "pool remove")?;
        if next_pool <= Decimal::ZERO {
            return Err(PricingError::EmptyPool);
        }
        self.commit_side(side, next_pool)
    }

    // total is re-summed from the pools so rounding can never split them apart
    fn commit_side(&mut self, side: Side, value: Decimal) -> Result<(), PricingError> {
        let (yes, no) = match side {
            Side::Yes => (value, self.no_shares),
            Side::No => (self.yes_shares, value),
            Side::Long | Side::Short => {
                return Err(PricingError::SideMismatch {
                    side,
                    kind: MarketKind::Binary,
                })
            }
        };
        self.total_volume = checked_add(yes, no, "pool volume")?;
        self.yes_shares = yes;
        self.no_shares = no;
        Ok(())
    }
}

/// Linear holdings curve for perpetual markets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingsCurve {
    initial_price: Price,
    synthetic_supply: Decimal,
}

impl HoldingsCurve {
    pub fn new(initial_price: Decimal, synthetic_supply: Decimal) -> Result<Self, PricingError> {
        let initial_price =
            Price::new(initial_price).ok_or(PricingError::InvalidInitialPrice(initial_price))?;
        if synthetic_supply <= Decimal::ZERO {
            return Err(PricingError::InvalidSupply(synthetic_supply));
        }
        Ok(Self {
            initial_price,
            synthetic_supply,
        })
    }

    pub fn initial_price(&self) -> Price {
        self.initial_price
    }

    pub fn synthetic_supply(&self) -> Decimal {
        self.synthetic_supply
    }

    pub fn price_delta(&self, net_holdings: Decimal) -> Result<Decimal, PricingError> {
        Ok(checked_div(net_holdings, self.synthetic_supply, "holdings delta")?)
    }

    /// Unclamped linear price. May be zero or negative under heavy shorting.
    pub fn raw_price(&self, net_holdings: Decimal) -> Result<Decimal, PricingError> {
        let delta = self.price_delta(net_holdings)?;
        Ok(checked_add(self.initial_price.value(), delta, "holdings price")?)
    }

    /// Price used for execution and reporting: the linear price, never below `floor`.
    pub fn price(&self, net_holdings: Decimal, floor: Price) -> Result<Price, PricingError> {
        let raw = self.raw_price(net_holdings)?;
        Ok(Price::new(raw).map_or(floor, |price| price.max(floor)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PricingError {
    #[error("Pool has no liquidity on one side")]
    EmptyPool,

    #[error("Both pools must be seeded with positive shares: yes {yes}, no {no}")]
    InvalidSeed { yes: Decimal, no: Decimal },

    #[error("Initial price must be positive: {0}")]
    InvalidInitialPrice(Decimal),

    #[error("Synthetic supply must be positive: {0}")]
    InvalidSupply(Decimal),

    #[error("Side {side} does not trade in {kind:?} markets")]
    SideMismatch { side: Side, kind: MarketKind },

    #[error(transparent)]
    Overflow(#[from] Overflow),
}
