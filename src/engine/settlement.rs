// 10.0 engine/settlement.rs: OPEN -> resolve -> RESOLVED -> claim per position.
// resolution is terminal. claims are a check-and-set on has_claimed under the market lock.

use super::core::{Engine, MarketSlot};
use super::results::{ClaimResult, EngineError, ResolutionSummary};
use crate::account::Account;
use crate::events::{EventPayload, MarketResolvedEvent, PointsSource, PositionClaimedEvent};
use crate::market::{Market, MarketError, MarketStatus, Pricing, Resolution};
use crate::position::{claim_position, Position};
use crate::types::{MarketId, PositionId, Price, Quote, Side, UserId};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info};

impl Engine {
    pub fn resolve(
        &self,
        market_id: MarketId,
        resolution: Resolution,
    ) -> Result<ResolutionSummary, EngineError> {
        self.retrying(|| {
            self.with_market(market_id, |slot| self.resolve_in(slot, resolution))
        })
    }

    pub fn claim(&self, position_id: PositionId) -> Result<ClaimResult, EngineError> {
        let market_id = self.market_of(position_id)?;
        self.retrying(|| {
            self.with_market(market_id, |slot| self.claim_in(slot, position_id))
        })
    }

    /// Claims every unclaimed position that still holds shares. Every claim is
    /// planned and every credit dry-run first, so an error pays nobody.
    pub fn claim_all(&self, market_id: MarketId) -> Result<Vec<ClaimResult>, EngineError> {
        self.retrying(|| {
            self.with_market(market_id, |slot| {
                if slot.market.is_open() {
                    return Err(not_resolved(market_id));
                }
                let plans = slot
                    .positions
                    .ids()
                    .into_iter()
                    .filter(|id| slot.positions.get(*id).is_some_and(Position::is_open))
                    .map(|position_id| self.plan_claim(slot, position_id))
                    .collect::<Result<Vec<_>, _>>()?;

                // users holding both sides are staged through both credits
                let mut staged: HashMap<UserId, Account> = HashMap::new();
                for plan in &plans {
                    let user_id = plan.claimed.user_id;
                    let current = match staged.remove(&user_id) {
                        Some(account) => account,
                        None => self
                            .accounts
                            .get(&user_id)
                            .map(|account| account.clone())
                            .ok_or(EngineError::UserNotFound(user_id))?,
                    };
                    let (next, _) = self.settle_account(&current, plan)?;
                    staged.insert(user_id, next);
                }

                plans
                    .into_iter()
                    .map(|plan| self.commit_claim(slot, plan))
                    .collect()
            })
        })
    }

    fn resolve_in(
        &self,
        slot: &mut MarketSlot,
        resolution: Resolution,
    ) -> Result<ResolutionSummary, EngineError> {
        let market_id = slot.market.id;
        if !slot.market.is_open() {
            return Err(EngineError::AlreadyResolved(market_id));
        }
        if resolution.kind() != slot.market.kind() {
            return Err(MarketError::ResolutionMismatch {
                resolution,
                kind: slot.market.kind(),
            }
            .into());
        }

        // perpetuals settle at the spot price at this instant
        let settlement_price = match &slot.market.pricing {
            Pricing::Binary(_) => None,
            Pricing::Holdings {
                curve,
                net_holdings,
            } => Some(curve.price(*net_holdings, self.config.floor_price())?),
        };

        let market = &mut slot.market;
        market.status = MarketStatus::Resolved;
        market.resolution = Some(resolution);
        market.settlement_price = settlement_price;
        market.resolved_at = Some(self.time());
        market.version += 1;

        let open_positions = slot.positions.iter().filter(|p| p.is_open()).count();

        info!(market = %market_id, ?resolution, ?settlement_price, open_positions, "market resolved");
        self.emit_event(EventPayload::MarketResolved(MarketResolvedEvent {
            market_id,
            resolution,
            settlement_price,
            open_positions,
        }));

        Ok(ResolutionSummary {
            market_id,
            resolution,
            settlement_price,
            open_positions,
        })
    }

    // 10.1: runs with the market lock held.
    fn claim_in(
        &self,
        slot: &mut MarketSlot,
        position_id: PositionId,
    ) -> Result<ClaimResult, EngineError> {
        let plan = self.plan_claim(slot, position_id)?;
        self.commit_claim(slot, plan)
    }

    // checks and prices a claim without touching the slot or any account
    fn plan_claim(&self, slot: &MarketSlot, position_id: PositionId) -> Result<ClaimPlan, EngineError> {
        if slot.market.is_open() {
            return Err(not_resolved(slot.market.id));
        }

        let position = slot
            .positions
            .get(position_id)
            .ok_or(EngineError::PositionNotFound(position_id))?;
        let payout = settlement_payout(&slot.market, position)?;

        let mut claimed = position.clone();
        let realized = claim_position(&mut claimed, payout, self.time())?;

        Ok(ClaimPlan {
            claimed,
            payout,
            realized,
        })
    }

    fn settle_account(&self, account: &Account, plan: &ClaimPlan) -> Result<(Account, i64), EngineError> {
        let mut next = account.clone();
        next.credit(plan.payout)?;
        let points_delta = next.realize_pnl(plan.realized, &self.config.points)?;
        Ok((next, points_delta))
    }

    fn commit_claim(&self, slot: &mut MarketSlot, plan: ClaimPlan) -> Result<ClaimResult, EngineError> {
        let market_id = slot.market.id;
        let user_id = plan.claimed.user_id;

        let (new_balance, points_delta, reputation_points) = {
            let mut account = self
                .accounts
                .get_mut(&user_id)
                .ok_or(EngineError::UserNotFound(user_id))?;

            let (next, points_delta) = self.settle_account(&account, &plan)?;
            let snapshot = (next.balance, points_delta, next.points.reputation_points);
            *account = next;
            snapshot
        };

        let ClaimPlan {
            claimed,
            payout,
            realized,
        } = plan;
        let position_id = claimed.id;
        slot.positions.upsert(claimed);

        debug!(market = %market_id, position = %position_id, user = %user_id, %payout, "position claimed");
        self.emit_event(EventPayload::PositionClaimed(PositionClaimedEvent {
            market_id,
            position_id,
            user_id,
            payout,
            realized_pnl: realized,
        }));
        if points_delta != 0 {
            self.emit_points(user_id, PointsSource::TradingPnl, points_delta, reputation_points);
        }

        Ok(ClaimResult {
            position_id,
            market_id,
            user_id,
            payout,
            realized_pnl: realized,
            points_delta,
            new_balance,
        })
    }
}

struct ClaimPlan {
    claimed: Position,
    payout: Quote,
    realized: Quote,
}

fn not_resolved(market_id: MarketId) -> EngineError {
    EngineError::Validation(format!("market {market_id} is not resolved"))
}

/// Per-share value of `side` once `market` has resolved. Winning binary
/// shares redeem at 1, losing ones at 0; perpetuals use the frozen spot.
pub(super) fn settlement_mark(market: &Market, side: Side) -> Result<Decimal, EngineError> {
    match market.resolution {
        Some(Resolution::Spot) => market
            .settlement_price
            .map(|price: Price| price.value())
            .ok_or_else(|| not_resolved(market.id)),
        Some(outcome) => Ok(if outcome.winning_side() == Some(side) {
            Decimal::ONE
        } else {
            Decimal::ZERO
        }),
        None => Err(not_resolved(market.id)),
    }
}

fn settlement_payout(market: &Market, position: &Position) -> Result<Quote, EngineError> {
    let mark = settlement_mark(market, position.side)?;
    Ok(position.mark_value(mark)?)
}

#[cfg(test)]
mod tests {
    use super::super::config::EngineConfig;
    use super::*;
    use crate::account::FixedAllocation;
    use rust_decimal_macros::dec;

    fn setup() -> (Engine, UserId, UserId) {
        let engine = Engine::new(EngineConfig::default());
        let alice = engine
            .register_user(&FixedAllocation(Quote::new(dec!(1000))))
            .unwrap();
        let bob = engine
            .register_user(&FixedAllocation(Quote::new(dec!(1000))))
            .unwrap();
        (engine, alice, bob)
    }

    #[test]
    fn winning_side_redeems_at_one() {
        let (engine, alice, bob) = setup();
        let market = engine.create_binary_market("Win?", dec!(500)).unwrap();
        let yes = engine.buy(alice, market, Side::Yes, dec!(100)).unwrap();
        let no = engine.buy(bob, market, Side::No, dec!(100)).unwrap();

        let summary = engine.resolve(market, Resolution::Yes).unwrap();
        assert_eq!(summary.open_positions, 2);

        let won = engine.claim(yes.position_id).unwrap();
        assert_eq!(won.payout.value(), yes.shares);
        assert_eq!(won.realized_pnl.value(), yes.shares - dec!(100));

        let lost = engine.claim(no.position_id).unwrap();
        assert!(lost.payout.is_zero());
        assert_eq!(lost.realized_pnl.value(), dec!(-100));
        assert_eq!(lost.new_balance.value(), dec!(900));
    }

    #[test]
    fn double_claim_rejected() {
        let (engine, alice, _) = setup();
        let market = engine.create_binary_market("Twice?", dec!(100)).unwrap();
        let bought = engine.buy(alice, market, Side::Yes, dec!(10)).unwrap();
        engine.resolve(market, Resolution::Yes).unwrap();

        let first = engine.claim(bought.position_id).unwrap();
        assert_eq!(
            engine.claim(bought.position_id),
            Err(EngineError::AlreadyClaimed(bought.position_id))
        );
        assert_eq!(
            engine.get_balance(alice).unwrap().balance,
            first.new_balance
        );
    }

    #[test]
    fn resolve_twice_rejected() {
        let (engine, alice, _) = setup();
        let market = engine.create_binary_market("Once?", dec!(100)).unwrap();
        let bought = engine.buy(alice, market, Side::No, dec!(10)).unwrap();

        engine.resolve(market, Resolution::No).unwrap();
        assert_eq!(
            engine.resolve(market, Resolution::Yes),
            Err(EngineError::AlreadyResolved(market))
        );

        let claim = engine.claim(bought.position_id).unwrap();
        assert_eq!(claim.payout.value(), bought.shares);
    }

    #[test]
    fn claim_before_resolution_rejected() {
        let (engine, alice, _) = setup();
        let market = engine.create_binary_market("Early?", dec!(100)).unwrap();
        let bought = engine.buy(alice, market, Side::Yes, dec!(10)).unwrap();
        assert!(matches!(
            engine.claim(bought.position_id),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(engine.claim_all(market), Err(EngineError::Validation(_))));
    }

    #[test]
    fn mismatched_resolution_rejected() {
        let (engine, _, _) = setup();
        let binary = engine.create_binary_market("Kind?", dec!(100)).unwrap();
        let perp = engine
            .create_perpetual_market("KIND", dec!(10), dec!(100))
            .unwrap();
        assert!(matches!(
            engine.resolve(binary, Resolution::Spot),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            engine.resolve(perp, Resolution::Yes),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn perpetual_settles_at_spot() {
        let (engine, alice, bob) = setup();
        let market = engine
            .create_perpetual_market("SPOT", dec!(10), dec!(100))
            .unwrap();
        let long = engine.buy(alice, market, Side::Long, dec!(100)).unwrap();
        // price now 11
        let short = engine.buy(bob, market, Side::Short, dec!(110)).unwrap();
        // back to 9.9

        let summary = engine.resolve(market, Resolution::Spot).unwrap();
        assert_eq!(summary.settlement_price.map(|p| p.value()), Some(dec!(9.9)));

        let long_claim = engine.claim(long.position_id).unwrap();
        assert_eq!(long_claim.payout.value(), dec!(99));

        // short of 10 shares at 11, settled at 9.9
        let short_claim = engine.claim(short.position_id).unwrap();
        assert_eq!(short_claim.payout.value(), dec!(121));
        assert_eq!(short_claim.realized_pnl.value(), dec!(11));
    }

    #[test]
    fn claim_all_pays_every_open_position() {
        let (engine, alice, bob) = setup();
        let market = engine.create_binary_market("All?", dec!(100)).unwrap();
        engine.buy(alice, market, Side::Yes, dec!(10)).unwrap();
        engine.buy(bob, market, Side::Yes, dec!(10)).unwrap();
        let closed = engine.buy(bob, market, Side::No, dec!(10)).unwrap();
        engine.close_position(closed.position_id).unwrap();

        engine.resolve(market, Resolution::Yes).unwrap();
        let claims = engine.claim_all(market).unwrap();
        assert_eq!(claims.len(), 2);
        assert!(engine.claim_all(market).unwrap().is_empty());
    }

    #[test]
    fn claim_all_pays_nobody_when_one_claim_fails() {
        let (engine, alice, _) = setup();
        let market = engine.create_binary_market("Partial?", dec!(100)).unwrap();
        let first = engine.buy(alice, market, Side::Yes, dec!(10)).unwrap();

        // a balance sitting at the top of the decimal range cannot take its payout
        let whale = engine
            .register_user(&FixedAllocation(Quote::zero()))
            .unwrap();
        engine.deposit(whale, Quote::new(dec!(10))).unwrap();
        engine.buy(whale, market, Side::Yes, dec!(10)).unwrap();
        engine
            .deposit(whale, Quote::new(Decimal::MAX - dec!(10)))
            .unwrap();

        engine.resolve(market, Resolution::Yes).unwrap();
        let before = engine.get_balance(alice).unwrap();

        assert!(matches!(engine.claim_all(market), Err(EngineError::Arithmetic(_))));
        assert_eq!(engine.get_balance(alice).unwrap(), before);
        assert!(!engine
            .get_position_on_side(alice, market, Side::Yes)
            .unwrap()
            .unwrap()
            .has_claimed);
        assert!(!engine
            .events()
            .iter()
            .any(|event| matches!(event.payload, EventPayload::PositionClaimed(_))));

        let claim = engine.claim(first.position_id).unwrap();
        assert_eq!(claim.payout.value(), first.shares);
    }

    #[test]
    fn empty_position_has_nothing_to_claim() {
        let (engine, alice, _) = setup();
        let market = engine.create_binary_market("Empty?", dec!(100)).unwrap();
        let bought = engine.buy(alice, market, Side::Yes, dec!(10)).unwrap();
        engine.close_position(bought.position_id).unwrap();
        engine.resolve(market, Resolution::Yes).unwrap();

        assert!(matches!(
            engine.claim(bought.position_id),
            Err(EngineError::Validation(_))
        ));
    }
}
