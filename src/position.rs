// 4.0: position ledger. one record per (user, market, side), kept after it closes.
// 4.1 increase_position averages the entry, reduce_position realizes pnl at the bottom.
// released_cost is split out so callers can price an exit before reducing.
// 4.2 PositionBook is the per-market store; it lives under the market lock.

use crate::types::{
    checked_add, checked_div, checked_mul, checked_sub, MarketId, Overflow, PositionId, Price,
    Quote, Side, Timestamp, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub user_id: UserId,
    pub market_id: MarketId,
    pub side: Side,
    pub shares: Decimal,
    pub avg_price: Price,
    // capital still deployed. released proportionally on reduction, exactly on full close
    pub open_cost: Quote,
    pub total_spent: Quote,
    pub total_received: Quote,
    pub realized_pnl: Quote,
    pub has_claimed: bool,
    pub opened_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Position {
    pub fn open(
        id: PositionId,
        user_id: UserId,
        market_id: MarketId,
        side: Side,
        shares: Decimal,
        price: Price,
        cost: Quote,
        timestamp: Timestamp,
    ) -> Result<Self, LedgerError> {
        if shares <= Decimal::ZERO {
            return Err(LedgerError::InvalidShares(shares));
        }
        Ok(Self {
            id,
            user_id,
            market_id,
            side,
            shares,
            avg_price: price,
            open_cost: cost,
            total_spent: cost,
            total_received: Quote::zero(),
            realized_pnl: Quote::zero(),
            has_claimed: false,
            opened_at: timestamp,
            updated_at: timestamp,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_zero()
    }

    pub fn is_open(&self) -> bool {
        !self.is_empty() && !self.has_claimed
    }

    // 4.3: what the shares are worth at `price`. a short can lose at most its open cost.
    pub fn mark_value(&self, price: Decimal) -> Result<Quote, Overflow> {
        if self.side.is_short() {
            let edge = checked_sub(self.avg_price.value(), price, "short mark")?;
            let pnl = checked_mul(edge, self.shares, "short mark")?;
            let value = checked_add(self.open_cost.value(), pnl, "short mark")?;
            Ok(Quote::new(value.max(Decimal::ZERO)))
        } else {
            Ok(Quote::new(checked_mul(self.shares, price, "mark value")?))
        }
    }

    pub fn unrealized_pnl(&self, price: Decimal) -> Result<Quote, Overflow> {
        if self.is_empty() {
            return Ok(Quote::zero());
        }
        Ok(self.mark_value(price)?.checked_sub(self.open_cost)?)
    }
}

/// Outcome of a reducing trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reduction {
    pub position: Position,
    pub realized_pnl: Quote,
    pub cost_released: Quote,
    pub proceeds: Quote,
}

// 4.4: adds to a position. avg' = (avg * shares + price * delta) / (shares + delta)
pub fn increase_position(
    position: &Position,
    delta_shares: Decimal,
    price: Price,
    cost: Quote,
    timestamp: Timestamp,
) -> Result<Position, LedgerError> {
    if delta_shares <= Decimal::ZERO {
        return Err(LedgerError::InvalidShares(delta_shares));
    }

    let new_shares = checked_add(position.shares, delta_shares, "position shares")?;
    let avg_price = if position.is_empty() {
        price
    } else {
        let held_value = checked_mul(position.avg_price.value(), position.shares, "entry value")?;
        let added_value = checked_mul(price.value(), delta_shares, "entry value")?;
        let weighted = checked_add(held_value, added_value, "entry value")?;
        Price::new(checked_div(weighted, new_shares, "average price")?).unwrap_or(price)
    };

    Ok(Position {
        shares: new_shares,
        avg_price,
        open_cost: position.open_cost.checked_add(cost)?,
        total_spent: position.total_spent.checked_add(cost)?,
        updated_at: timestamp,
        ..position.clone()
    })
}

// 4.5: capital a sale of `shares` takes off the position. proportional, exact on a full close.
pub fn released_cost(position: &Position, shares: Decimal) -> Result<Quote, LedgerError> {
    if shares <= Decimal::ZERO {
        return Err(LedgerError::InvalidShares(shares));
    }
    if shares > position.shares {
        return Err(LedgerError::InsufficientShares {
            requested: shares,
            held: position.shares,
        });
    }

    if shares == position.shares {
        Ok(position.open_cost)
    } else {
        let scaled = checked_mul(position.open_cost.value(), shares, "cost release")?;
        Ok(Quote::new(checked_div(scaled, position.shares, "cost release")?))
    }
}

// 4.6: sells part or all of a position at `exit_price`. avg price is untouched.
// proceeds = released cost + realized edge, so a sale can lose at most what it releases.
pub fn reduce_position(
    position: &Position,
    shares: Decimal,
    exit_price: Price,
    timestamp: Timestamp,
) -> Result<Reduction, LedgerError> {
    let cost_released = released_cost(position, shares)?;
    let remaining = position.shares - shares;

    let edge = checked_sub(exit_price.value(), position.avg_price.value(), "realized pnl")?;
    let gross_pnl = checked_mul(edge * position.side.sign(), shares, "realized pnl")?;

    let value = checked_add(cost_released.value(), gross_pnl, "exit proceeds")?;
    let (proceeds, realized_pnl) = if value < Decimal::ZERO {
        (Quote::zero(), cost_released.negate())
    } else {
        (Quote::new(value), Quote::new(gross_pnl))
    };

    let updated = Position {
        shares: remaining,
        open_cost: position.open_cost.checked_sub(cost_released)?,
        total_received: position.total_received.checked_add(proceeds)?,
        realized_pnl: position.realized_pnl.checked_add(realized_pnl)?,
        updated_at: timestamp,
        ..position.clone()
    };

    Ok(Reduction {
        position: updated,
        realized_pnl,
        cost_released,
        proceeds,
    })
}

// 4.7: terminal claim. check and set happen together, under the market lock.
pub fn claim_position(
    position: &mut Position,
    payout: Quote,
    timestamp: Timestamp,
) -> Result<Quote, LedgerError> {
    if position.has_claimed {
        return Err(LedgerError::AlreadyClaimed(position.id));
    }
    if position.is_empty() {
        return Err(LedgerError::NothingToClaim(position.id));
    }

    let realized = payout.checked_sub(position.open_cost)?;
    let total_received = position.total_received.checked_add(payout)?;
    let realized_total = position.realized_pnl.checked_add(realized)?;

    position.has_claimed = true;
    position.total_received = total_received;
    position.realized_pnl = realized_total;
    position.open_cost = Quote::zero();
    position.updated_at = timestamp;
    Ok(realized)
}

/// Positions of a single market, indexed by id and by owner.
#[derive(Debug, Clone, Default)]
pub struct PositionBook {
    positions: HashMap<PositionId, Position>,
    by_owner: HashMap<(UserId, Side), PositionId>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: PositionId) -> Option<&Position> {
        self.positions.get(&id)
    }

    pub fn get_mut(&mut self, id: PositionId) -> Option<&mut Position> {
        self.positions.get_mut(&id)
    }

    pub fn find(&self, user_id: UserId, side: Side) -> Option<&Position> {
        self.by_owner
            .get(&(user_id, side))
            .and_then(|id| self.positions.get(id))
    }

    pub fn upsert(&mut self, position: Position) {
        self.by_owner
            .insert((position.user_id, position.side), position.id);
        self.positions.insert(position.id, position);
    }

    pub fn for_user(&self, user_id: UserId) -> impl Iterator<Item = &Position> {
        self.positions
            .values()
            .filter(move |position| position.user_id == user_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn ids(&self) -> Vec<PositionId> {
        let mut ids: Vec<PositionId> = self.positions.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Share amount must be positive: {0}")]
    InvalidShares(Decimal),

    #[error("Insufficient shares: requested {requested}, held {held}")]
    InsufficientShares { requested: Decimal, held: Decimal },

    #[error("Position {0} already claimed")]
    AlreadyClaimed(PositionId),

    #[error("Position {0} holds no shares to claim")]
    NothingToClaim(PositionId),

    #[error(transparent)]
    Overflow(#[from] Overflow),
}
