//! Trading performance to reputation points.
//!
//! `pnl_to_points` floors P&L into ten-dollar brackets and caps losses at
//! -100 points. Earned points always follow the *lifetime* P&L: when it moves
//! from `old` to `new` the account gains `points(new) - points(old)`. Converting
//! the increment alone (`points(new - old)`) drifts whenever the two lifetime
//! values sit in different brackets, so it is never done.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointsParams {
    /// P&L per point.
    pub divisor: Decimal,
    /// Lowest score a losing P&L can map to.
    pub loss_floor: i64,
    /// Reputation every account starts with.
    pub base_reputation: i64,
}

impl Default for PointsParams {
    fn default() -> Self {
        Self {
            divisor: Decimal::TEN,
            loss_floor: -100,
            base_reputation: 100,
        }
    }
}

impl PointsParams {
    pub fn to_points(&self, pnl: Decimal) -> i64 {
        let Some(scaled) = pnl.checked_div(self.divisor) else {
            return if pnl.is_sign_negative() { self.loss_floor } else { i64::MAX };
        };
        let floored = scaled.floor();
        let points = floored.to_i64().unwrap_or(if floored.is_sign_negative() {
            i64::MIN
        } else {
            i64::MAX
        });

        if pnl < Decimal::ZERO {
            points.max(self.loss_floor)
        } else {
            points
        }
    }
}

/// Points for a lifetime P&L under the default parameters.
pub fn pnl_to_points(pnl: Decimal) -> i64 {
    PointsParams::default().to_points(pnl)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsAccount {
    pub user_id: UserId,
    pub lifetime_pnl: Decimal,
    /// Lifetime P&L that `earned_points` currently reflects.
    pub last_applied_pnl: Decimal,
    pub earned_points: i64,
    pub invite_points: i64,
    pub bonus_points: i64,
    pub reputation_points: i64,
}

impl PointsAccount {
    pub fn new(user_id: UserId, params: &PointsParams) -> Self {
        Self {
            user_id,
            lifetime_pnl: Decimal::ZERO,
            last_applied_pnl: Decimal::ZERO,
            earned_points: 0,
            invite_points: 0,
            bonus_points: 0,
            reputation_points: params.base_reputation,
        }
    }

    /// Moves lifetime P&L to `new_pnl`, diffing against the last applied value.
    /// Applying the same value twice yields a zero second delta.
    pub fn apply_lifetime_pnl(&mut self, new_pnl: Decimal, params: &PointsParams) -> i64 {
        let delta = params
            .to_points(new_pnl)
            .saturating_sub(params.to_points(self.last_applied_pnl));
        self.earned_points = self.earned_points.saturating_add(delta);
        self.lifetime_pnl = new_pnl;
        self.last_applied_pnl = new_pnl;
        self.recompute(params);
        delta
    }

    pub fn award_invite(&mut self, points: i64, params: &PointsParams) {
        self.invite_points = self.invite_points.saturating_add(points);
        self.recompute(params);
    }

    pub fn award_bonus(&mut self, points: i64, params: &PointsParams) {
        self.bonus_points = self.bonus_points.saturating_add(points);
        self.recompute(params);
    }

    fn recompute(&mut self, params: &PointsParams) {
        self.reputation_points = params
            .base_reputation
            .saturating_add(self.invite_points)
            .saturating_add(self.earned_points)
            .saturating_add(self.bonus_points);
    }
}
