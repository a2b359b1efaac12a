//! Participant accounts and starting capital.
//!
//! An account holds the spendable balance, lifetime trading P&L and the points
//! ledger fed by that P&L. Balances never go negative: debits larger than the
//! balance fail with `InsufficientBalance`.

use crate::points::{PointsAccount, PointsParams};
use crate::types::{Quote, Timestamp, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: UserId,
    pub balance: Quote,
    pub total_deposited: Quote,
    pub total_withdrawn: Quote,
    pub realized_pnl: Quote,
    pub points: PointsAccount,
    pub created_at: Timestamp,
}

impl Account {
    pub fn new(id: UserId, params: &PointsParams, timestamp: Timestamp) -> Self {
        Self {
            id,
            balance: Quote::zero(),
            total_deposited: Quote::zero(),
            total_withdrawn: Quote::zero(),
            realized_pnl: Quote::zero(),
            points: PointsAccount::new(id, params),
            created_at: timestamp,
        }
    }

    pub fn deposit(&mut self, amount: Quote) -> Result<(), AccountError> {
        if amount.value() <= Decimal::ZERO {
            return Err(AccountError::InvalidAmount(amount));
        }
        let balance = self.balance.checked_add(amount)?;
        let deposited = self.total_deposited.checked_add(amount)?;
        self.balance = balance;
        self.total_deposited = deposited;
        Ok(())
    }

    pub fn withdraw(&mut self, amount: Quote) -> Result<(), AccountError> {
        if amount.value() <= Decimal::ZERO {
            return Err(AccountError::InvalidAmount(amount));
        }
        self.ensure_funds(amount)?;
        let withdrawn = self.total_withdrawn.checked_add(amount)?;
        self.balance = self.balance.checked_sub(amount)?;
        self.total_withdrawn = withdrawn;
        Ok(())
    }

    pub fn ensure_funds(&self, amount: Quote) -> Result<(), AccountError> {
        if amount > self.balance {
            return Err(AccountError::InsufficientBalance {
                requested: amount,
                available: self.balance,
            });
        }
        Ok(())
    }

    /// Trade debit. Callers check funds before mutating anything else.
    pub fn debit(&mut self, amount: Quote) -> Result<(), AccountError> {
        self.ensure_funds(amount)?;
        self.balance = self.balance.checked_sub(amount)?;
        Ok(())
    }

    pub fn credit(&mut self, amount: Quote) -> Result<(), AccountError> {
        self.balance = self.balance.checked_add(amount)?;
        Ok(())
    }

    /// Adds realized P&L to the lifetime total and syncs earned points.
    /// Returns the points delta.
    pub fn realize_pnl(&mut self, pnl: Quote, params: &PointsParams) -> Result<i64, AccountError> {
        let realized = self.realized_pnl.checked_add(pnl)?;
        self.realized_pnl = realized;
        Ok(self.points.apply_lifetime_pnl(realized.value(), params))
    }

    /// Moves lifetime P&L from `old_pnl` to `new_pnl` for P&L tracked outside
    /// the engine. A conversion that already landed (`new_pnl` is the recorded
    /// value) returns 0; any other baseline mismatch is rejected.
    pub fn convert_lifetime_pnl(
        &mut self,
        old_pnl: Decimal,
        new_pnl: Decimal,
        params: &PointsParams,
    ) -> Result<i64, AccountError> {
        let recorded = self.realized_pnl.value();
        if new_pnl == recorded {
            return Ok(0);
        }
        if old_pnl != recorded {
            return Err(AccountError::StalePnl {
                recorded,
                supplied: old_pnl,
            });
        }
        self.realized_pnl = Quote::new(new_pnl);
        Ok(self.points.apply_lifetime_pnl(new_pnl, params))
    }
}

/// Source of starting capital for newly registered participants.
pub trait CapitalAllocator: Send + Sync {
    fn starting_capital(&self, user_id: UserId) -> Quote;
}

/// Every participant gets the same amount.
#[derive(Debug, Clone, Copy)]
pub struct FixedAllocation(pub Quote);

impl CapitalAllocator for FixedAllocation {
    fn starting_capital(&self, _user_id: UserId) -> Quote {
        self.0
    }
}

impl<F> CapitalAllocator for F
where
    F: Fn(UserId) -> Quote + Send + Sync,
{
    fn starting_capital(&self, user_id: UserId) -> Quote {
        self(user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Quote, available: Quote },

    #[error("Amount must be positive: {0}")]
    InvalidAmount(Quote),

    #[error("Lifetime P&L is {recorded}, not {supplied}")]
    StalePnl { recorded: Decimal, supplied: Decimal },

    #[error(transparent)]
    Overflow(#[from] crate::types::Overflow),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_account() -> Account {
        let mut account = Account::new(UserId(1), &PointsParams::default(), Timestamp::from_millis(0));
        account.deposit(Quote::new(dec!(10000))).unwrap();
        account
    }

    #[test]
    fn account_deposit_withdraw() {
        let mut account = test_account();
        assert_eq!(account.balance.value(), dec!(10000));

        account.deposit(Quote::new(dec!(5000))).unwrap();
        assert_eq!(account.balance.value(), dec!(15000));

        account.withdraw(Quote::new(dec!(3000))).unwrap();
        assert_eq!(account.balance.value(), dec!(12000));
        assert_eq!(account.total_withdrawn.value(), dec!(3000));
    }

    #[test]
    fn withdraw_insufficient_balance() {
        let mut account = test_account();
        let result = account.withdraw(Quote::new(dec!(20000)));
        assert!(matches!(result, Err(AccountError::InsufficientBalance { .. })));
        assert_eq!(account.balance.value(), dec!(10000));
    }

    #[test]
    fn non_positive_deposit_rejected() {
        let mut account = test_account();
        assert!(matches!(
            account.deposit(Quote::new(dec!(0))),
            Err(AccountError::InvalidAmount(_))
        ));
        assert!(matches!(
            account.deposit(Quote::new(dec!(-5))),
            Err(AccountError::InvalidAmount(_))
        ));
    }

    #[test]
    fn debit_never_goes_negative() {
        let mut account = test_account();
        account.debit(Quote::new(dec!(10000))).unwrap();
        assert!(account.balance.is_zero());
        assert!(account.debit(Quote::new(dec!(0.01))).is_err());
        assert!(account.balance.is_zero());
    }

    #[test]
    fn realized_pnl_drives_points() {
        let params = PointsParams::default();
        let mut account = test_account();

        assert_eq!(account.realize_pnl(Quote::new(dec!(15)), &params).unwrap(), 1);
        assert_eq!(account.realize_pnl(Quote::new(dec!(-5)), &params).unwrap(), 0);
        assert_eq!(account.realized_pnl.value(), dec!(10));
        assert_eq!(account.points.earned_points, 1);
        assert_eq!(account.points.reputation_points, 101);
    }

    #[test]
    fn conversion_shares_lifetime_with_trading() {
        let params = PointsParams::default();
        let mut account = test_account();

        assert_eq!(account.convert_lifetime_pnl(dec!(0), dec!(75), &params).unwrap(), 7);
        // replay of the same conversion
        assert_eq!(account.convert_lifetime_pnl(dec!(0), dec!(75), &params).unwrap(), 0);
        assert_eq!(
            account.convert_lifetime_pnl(dec!(0), dec!(90), &params),
            Err(AccountError::StalePnl {
                recorded: dec!(75),
                supplied: dec!(0)
            })
        );

        // a trade builds on the converted value
        assert_eq!(account.realize_pnl(Quote::new(dec!(2.5)), &params).unwrap(), 0);
        assert_eq!(account.realized_pnl.value(), dec!(77.5));
        assert_eq!(account.points.lifetime_pnl, dec!(77.5));
        assert_eq!(account.points.earned_points, 7);
    }

    #[test]
    fn allocators() {
        let fixed = FixedAllocation(Quote::new(dec!(1000)));
        assert_eq!(fixed.starting_capital(UserId(9)).value(), dec!(1000));

        let tiered = |user: UserId| Quote::new(Decimal::from(user.0) * dec!(100));
        assert_eq!(tiered.starting_capital(UserId(3)).value(), dec!(300));
    }
}
