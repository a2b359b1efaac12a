// 11.0 engine/portfolio.rs: read side. prices, positions, balances, listings.
// every market read goes through the market lock so a reader never sees half a trade.

use super::core::{Engine, MarketSlot};
use super::results::{BalanceView, EngineError, MarketSummary, Portfolio, PositionView};
use super::settlement::settlement_mark;
use crate::market::{Market, MarketPrice, MarketStatus};
use crate::points::PointsAccount;
use crate::position::Position;
use crate::types::{MarketId, MarketKind, PositionId, Quote, Side, UserId};
use rust_decimal::Decimal;

impl Engine {
    pub fn get_price(&self, market_id: MarketId) -> Result<MarketPrice, EngineError> {
        self.retrying(|| {
            self.with_market(market_id, |slot| {
                Ok(slot.market.price(self.config.floor_price())?)
            })
        })
    }

    pub fn get_market(&self, market_id: MarketId) -> Result<Market, EngineError> {
        self.retrying(|| self.with_market(market_id, |slot| Ok(slot.market.clone())))
    }

    /// The user's most recently updated position in `market_id`.
    pub fn get_position(
        &self,
        user_id: UserId,
        market_id: MarketId,
    ) -> Result<Option<Position>, EngineError> {
        self.retrying(|| {
            self.with_market(market_id, |slot| {
                Ok(slot
                    .positions
                    .for_user(user_id)
                    .max_by_key(|position| (position.updated_at, position.id))
                    .cloned())
            })
        })
    }

    pub fn get_position_on_side(
        &self,
        user_id: UserId,
        market_id: MarketId,
        side: Side,
    ) -> Result<Option<Position>, EngineError> {
        self.retrying(|| {
            self.with_market(market_id, |slot| {
                Ok(slot.positions.find(user_id, side).cloned())
            })
        })
    }

    pub fn get_position_by_id(&self, position_id: PositionId) -> Result<Position, EngineError> {
        let market_id = self.market_of(position_id)?;
        self.retrying(|| {
            self.with_market(market_id, |slot| {
                slot.positions
                    .get(position_id)
                    .cloned()
                    .ok_or(EngineError::PositionNotFound(position_id))
            })
        })
    }

    /// Every position the user holds or held, across all markets.
    pub fn positions_for(&self, user_id: UserId) -> Result<Vec<Position>, EngineError> {
        self.ensure_user(user_id)?;
        let mut positions = Vec::new();
        for market_id in self.market_ids() {
            let mut held = self.retrying(|| {
                self.with_market(market_id, |slot| {
                    Ok(slot.positions.for_user(user_id).cloned().collect::<Vec<_>>())
                })
            })?;
            held.sort_by_key(|position| position.id);
            positions.extend(held);
        }
        Ok(positions)
    }

    /// Open positions marked to market. Resolved markets mark at their
    /// settlement value until the position is claimed.
    pub fn get_portfolio(&self, user_id: UserId) -> Result<Portfolio, EngineError> {
        let balance = self.get_balance(user_id)?;

        let mut views = Vec::new();
        for market_id in self.market_ids() {
            let market_views = self.retrying(|| {
                self.with_market(market_id, |slot| self.position_views(slot, user_id))
            })?;
            views.extend(market_views);
        }

        let mut total_market_value = Quote::zero();
        let mut total_unrealized_pnl = Quote::zero();
        for view in &views {
            total_market_value = total_market_value.checked_add(view.market_value)?;
            total_unrealized_pnl = total_unrealized_pnl.checked_add(view.unrealized_pnl)?;
        }

        Ok(Portfolio {
            user_id,
            balance: balance.balance,
            positions: views,
            total_market_value,
            total_unrealized_pnl,
            lifetime_pnl: balance.lifetime_pnl,
            reputation_points: balance.points.reputation_points,
        })
    }

    pub fn get_balance(&self, user_id: UserId) -> Result<BalanceView, EngineError> {
        self.accounts
            .get(&user_id)
            .map(|account| BalanceView::from(account.value()))
            .ok_or(EngineError::UserNotFound(user_id))
    }

    pub fn points(&self, user_id: UserId) -> Result<PointsAccount, EngineError> {
        self.accounts
            .get(&user_id)
            .map(|account| account.points.clone())
            .ok_or(EngineError::UserNotFound(user_id))
    }

    /// Markets filtered by kind and status, in id order.
    pub fn list_markets(
        &self,
        kind: Option<MarketKind>,
        status: Option<MarketStatus>,
    ) -> Result<Vec<MarketSummary>, EngineError> {
        let mut summaries = Vec::new();
        for market_id in self.market_ids() {
            let summary = self.retrying(|| {
                self.with_market(market_id, |slot| {
                    let market = &slot.market;
                    if kind.is_some_and(|k| k != market.kind())
                        || status.is_some_and(|s| s != market.status)
                    {
                        return Ok(None);
                    }
                    Ok(Some(MarketSummary {
                        market_id,
                        kind: market.kind(),
                        title: market.title.clone(),
                        resolved: !market.is_open(),
                        price: market.price(self.config.floor_price())?,
                        traded_notional: market.traded_notional,
                        version: market.version,
                    }))
                })
            })?;
            summaries.extend(summary);
        }
        Ok(summaries)
    }

    pub fn market_prices(&self) -> Result<Vec<(MarketId, MarketPrice)>, EngineError> {
        self.market_ids()
            .into_iter()
            .map(|market_id| self.get_price(market_id).map(|price| (market_id, price)))
            .collect()
    }

    fn ensure_user(&self, user_id: UserId) -> Result<(), EngineError> {
        if self.accounts.contains_key(&user_id) {
            Ok(())
        } else {
            Err(EngineError::UserNotFound(user_id))
        }
    }

    fn position_views(
        &self,
        slot: &MarketSlot,
        user_id: UserId,
    ) -> Result<Vec<PositionView>, EngineError> {
        let market = &slot.market;
        let current = if market.is_open() {
            Some(market.price(self.config.floor_price())?)
        } else {
            None
        };

        let mut open: Vec<&Position> = slot
            .positions
            .for_user(user_id)
            .filter(|position| position.is_open())
            .collect();
        open.sort_by_key(|position| position.id);

        open.into_iter()
            .map(|position| -> Result<PositionView, EngineError> {
                let mark_price = match &current {
                    Some(price) => price.for_side(position.side).unwrap_or(Decimal::ZERO),
                    None => settlement_mark(market, position.side)?,
                };
                Ok(PositionView {
                    position: position.clone(),
                    mark_price,
                    market_value: position.mark_value(mark_price)?,
                    unrealized_pnl: position.unrealized_pnl(mark_price)?,
                })
            })
            .collect()
    }
}
