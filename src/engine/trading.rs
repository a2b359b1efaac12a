// 9.0 engine/trading.rs: trade execution. every trade is planned against a snapshot taken
// under the market lock, then committed as one unit: balance, pool or holdings, position, event.
// buys fill at the price before their own impact, sells at the price after it, so an
// immediate round trip is value-neutral.
// 9.1 buy/sell retry lock conflicts, execute is a single attempt.
// 9.2 plan_trade never mutates; quote reuses it.

use super::core::{Engine, MarketSlot};
use super::results::{ConflictReason, EngineError, TradeQuote, TradeRequest, TradeResult};
use crate::events::{EventPayload, PointsSource, TradeEvent};
use crate::market::Pricing;
use crate::position::{increase_position, reduce_position, released_cost, Position};
use crate::types::{
    checked_add, checked_div, checked_mul, checked_sub, MarketId, PositionId, Price, Quote, Side,
    TradeAction, UserId,
};
use rust_decimal::Decimal;
use tracing::debug;

/// Everything a trade changes, computed before anything is changed.
#[derive(Debug, Clone)]
struct TradePlan {
    position: Position,
    shares: Decimal,
    price: Price,
    // debited on a buy, credited on a sell
    cash: Quote,
    realized_pnl: Option<Quote>,
    pricing: Pricing,
}

impl Engine {
    pub fn buy(
        &self,
        user_id: UserId,
        market_id: MarketId,
        side: Side,
        amount: Decimal,
    ) -> Result<TradeResult, EngineError> {
        let request = TradeRequest::buy(user_id, market_id, side, amount);
        self.retrying(|| self.execute(&request))
    }

    pub fn sell(
        &self,
        user_id: UserId,
        market_id: MarketId,
        side: Side,
        shares: Decimal,
    ) -> Result<TradeResult, EngineError> {
        let request = TradeRequest::sell(user_id, market_id, side, shares);
        self.retrying(|| self.execute(&request))
    }

    /// Single attempt. A lock timeout or a stale `expected_version` comes back
    /// as `ConcurrencyConflict`.
    pub fn execute(&self, request: &TradeRequest) -> Result<TradeResult, EngineError> {
        self.with_market(request.market_id, |slot| self.execute_in(slot, request))
    }

    /// Preview of `request` against the current market state. Nothing changes.
    pub fn quote(&self, request: &TradeRequest) -> Result<TradeQuote, EngineError> {
        self.retrying(|| {
            self.with_market(request.market_id, |slot| {
                let plan = self.plan_trade(slot, request, || PositionId(0))?;
                Ok(TradeQuote {
                    market_id: request.market_id,
                    side: request.side,
                    action: request.action,
                    shares: plan.shares,
                    amount: plan.cash,
                    price: plan.price,
                    realized_pnl: plan.realized_pnl,
                    market_version: slot.market.version,
                })
            })
        })
    }

    /// Sells `shares` out of an existing position.
    pub fn sell_position(
        &self,
        position_id: PositionId,
        shares: Decimal,
    ) -> Result<TradeResult, EngineError> {
        let market_id = self.market_of(position_id)?;
        self.retrying(|| {
            self.with_market(market_id, |slot| {
                let position = slot
                    .positions
                    .get(position_id)
                    .ok_or(EngineError::PositionNotFound(position_id))?;
                let request =
                    TradeRequest::sell(position.user_id, market_id, position.side, shares);
                self.execute_in(slot, &request)
            })
        })
    }

    /// Sells every remaining share of a position.
    pub fn close_position(&self, position_id: PositionId) -> Result<TradeResult, EngineError> {
        let market_id = self.market_of(position_id)?;
        self.retrying(|| {
            self.with_market(market_id, |slot| {
                let position = slot
                    .positions
                    .get(position_id)
                    .ok_or(EngineError::PositionNotFound(position_id))?;
                if position.is_empty() {
                    return Err(EngineError::Validation(format!(
                        "position {position_id} is already closed"
                    )));
                }
                let request = TradeRequest::sell(
                    position.user_id,
                    market_id,
                    position.side,
                    position.shares,
                );
                self.execute_in(slot, &request)
            })
        })
    }

    pub(super) fn market_of(&self, position_id: PositionId) -> Result<MarketId, EngineError> {
        self.position_markets
            .get(&position_id)
            .map(|entry| *entry.value())
            .ok_or(EngineError::PositionNotFound(position_id))
    }

    // 9.3: runs with the market lock held.
    fn execute_in(
        &self,
        slot: &mut MarketSlot,
        request: &TradeRequest,
    ) -> Result<TradeResult, EngineError> {
        if let Some(expected) = request.expected_version {
            if expected != slot.market.version {
                return Err(EngineError::ConcurrencyConflict {
                    market_id: request.market_id,
                    reason: ConflictReason::StaleVersion {
                        expected,
                        actual: slot.market.version,
                    },
                });
            }
        }

        let plan = self.plan_trade(slot, request, || self.next_position_id())?;

        let mut market = slot.market.clone();
        market.pricing = plan.pricing.clone();
        market.record_trade(plan.cash.value())?;

        let (new_balance, points_delta, reputation_points) = {
            let mut account = self
                .accounts
                .get_mut(&request.user_id)
                .ok_or(EngineError::UserNotFound(request.user_id))?;

            let mut next = account.clone();
            match request.action {
                TradeAction::Buy => next.debit(plan.cash)?,
                TradeAction::Sell => next.credit(plan.cash)?,
            }
            let points_delta = match plan.realized_pnl {
                Some(pnl) => next.realize_pnl(pnl, &self.config.points)?,
                None => 0,
            };

            let snapshot = (next.balance, points_delta, next.points.reputation_points);
            *account = next;
            snapshot
        };

        // commit
        let market_version = market.version;
        let now = self.time();
        let position_id = plan.position.id;
        slot.market = market;
        slot.positions.upsert(plan.position);
        self.position_markets.insert(position_id, request.market_id);

        let trade_id = self.next_trade_id();
        debug!(
            market = %request.market_id,
            user = %request.user_id,
            side = %request.side,
            action = request.action.label(request.side),
            shares = %plan.shares,
            price = %plan.price,
            amount = %plan.cash,
            "trade executed"
        );

        self.emit_event(EventPayload::Trade(TradeEvent {
            id: trade_id,
            market_id: request.market_id,
            user_id: request.user_id,
            position_id,
            side: request.side,
            action: request.action,
            amount: plan.cash,
            shares: plan.shares,
            price: plan.price,
            realized_pnl: plan.realized_pnl,
            executed_at: now,
        }));
        if points_delta != 0 {
            self.emit_points(
                request.user_id,
                PointsSource::TradingPnl,
                points_delta,
                reputation_points,
            );
        }

        Ok(TradeResult {
            trade_id,
            position_id,
            market_id: request.market_id,
            side: request.side,
            action: request.action,
            shares: plan.shares,
            amount: plan.cash,
            executed_price: plan.price,
            realized_pnl: plan.realized_pnl,
            points_delta,
            new_balance,
            market_version,
        })
    }

    // 9.4: validation and pricing. `new_position_id` is only called when the
    // user has no record on this side yet.
    fn plan_trade(
        &self,
        slot: &MarketSlot,
        request: &TradeRequest,
        new_position_id: impl FnOnce() -> PositionId,
    ) -> Result<TradePlan, EngineError> {
        let market = &slot.market;
        if request.amount <= Decimal::ZERO {
            return Err(EngineError::InvalidAmount(format!(
                "{} amount must be positive: {}",
                request.action.label(request.side),
                request.amount
            )));
        }
        if !market.is_open() {
            return Err(EngineError::MarketResolved(market.id));
        }
        market.check_side(request.side)?;

        let now = self.time();
        let floor = self.config.floor_price();
        let existing = slot.positions.find(request.user_id, request.side);

        match request.action {
            TradeAction::Buy => {
                let cost = Quote::new(request.amount);
                {
                    let account = self
                        .accounts
                        .get(&request.user_id)
                        .ok_or(EngineError::UserNotFound(request.user_id))?;
                    account.ensure_funds(cost)?;
                }

                let (shares, price, pricing) = match &market.pricing {
                    Pricing::Binary(pool) => {
                        let fill = pool.quote_buy(request.side, request.amount)?;
                        let mut next = pool.clone();
                        next.add_shares(request.side, fill.shares)?;
                        (fill.shares, fill.price, Pricing::Binary(next))
                    }
                    Pricing::Holdings {
                        curve,
                        net_holdings,
                    } => {
                        let price = curve.price(*net_holdings, floor)?;
                        let shares = checked_div(request.amount, price.value(), "holdings shares")?;
                        let delta = checked_mul(request.amount, request.side.sign(), "holdings delta")?;
                        let net = checked_add(*net_holdings, delta, "net holdings")?;
                        (
                            shares,
                            price,
                            Pricing::Holdings {
                                curve: *curve,
                                net_holdings: net,
                            },
                        )
                    }
                };

                let position = match existing {
                    Some(position) => increase_position(position, shares, price, cost, now)?,
                    None => Position::open(
                        new_position_id(),
                        request.user_id,
                        market.id,
                        request.side,
                        shares,
                        price,
                        cost,
                        now,
                    )?,
                };

                Ok(TradePlan {
                    position,
                    shares,
                    price,
                    cash: cost,
                    realized_pnl: None,
                    pricing,
                })
            }
            TradeAction::Sell => {
                let position = existing.ok_or(EngineError::InsufficientShares {
                    requested: request.amount,
                    held: Decimal::ZERO,
                })?;
                let released = released_cost(position, request.amount)?;

                // exits fill at the state the sale leaves behind: the pool after the
                // shares return, or the curve after the released capital comes off
                let (price, pricing) = match &market.pricing {
                    Pricing::Binary(pool) => {
                        let mut next = pool.clone();
                        next.remove_shares(request.side, request.amount)?;
                        (next.price(request.side)?, Pricing::Binary(next))
                    }
                    Pricing::Holdings {
                        curve,
                        net_holdings,
                    } => {
                        let reversal = checked_mul(
                            released.value(),
                            request.side.sign(),
                            "holdings reversal",
                        )?;
                        let net = checked_sub(*net_holdings, reversal, "net holdings")?;
                        (
                            curve.price(net, floor)?,
                            Pricing::Holdings {
                                curve: *curve,
                                net_holdings: net,
                            },
                        )
                    }
                };

                let reduction = reduce_position(position, request.amount, price, now)?;

                Ok(TradePlan {
                    position: reduction.position,
                    shares: request.amount,
                    price,
                    cash: reduction.proceeds,
                    realized_pnl: Some(reduction.realized_pnl),
                    pricing,
                })
            }
        }
    }
}
