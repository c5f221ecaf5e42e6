//! ERC-4626-style share ledger with virtual-offset protection.
//!
//! Converts between deposited assets and internal shares, accrues yield,
//! and socializes losses. See spec.md §4.1.

use std::collections::BTreeMap;

use crate::amount::Amount;
use crate::error::{PoolError, PoolResult};
use crate::ReceiverId;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "candid", derive(candid::CandidType))]
#[derive(Clone, Debug, Default)]
pub struct ShareLedger {
    total_shares: Amount,
    total_assets: Amount,
    user_shares: BTreeMap<ReceiverId, Amount>,
}

impl ShareLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_shares(&self) -> Amount {
        self.total_shares
    }

    pub fn total_assets(&self) -> Amount {
        self.total_assets
    }

    pub fn shares_of(&self, receiver: ReceiverId) -> Amount {
        self.user_shares.get(&receiver).copied().unwrap_or(Amount::ZERO)
    }

    pub fn holders(&self) -> impl Iterator<Item = (&ReceiverId, &Amount)> {
        self.user_shares.iter()
    }

    /// `(total_assets + VIRTUAL_ASSETS) / (total_shares + VIRTUAL_SHARES)`,
    /// expressed as an `Amount` scaled the same way as any other amount
    /// (i.e. a price of 1.0 is `Amount::from_units(1)`).
    pub fn share_price(&self) -> Amount {
        let assets = self
            .total_assets
            .checked_add(Amount::VIRTUAL_ASSETS)
            .unwrap_or(Amount::MAX);
        let shares = self
            .total_shares
            .checked_add(Amount::VIRTUAL_SHARES)
            .unwrap_or(Amount::MAX);
        assets
            .mul_div(Amount::from_units(1), shares)
            .unwrap_or(Amount::ZERO)
    }

    pub fn convert_to_shares(&self, assets: Amount) -> Amount {
        let price = self.share_price();
        if price.is_zero() {
            return Amount::ZERO;
        }
        assets.mul_div(Amount::from_units(1), price).unwrap_or(Amount::ZERO)
    }

    pub fn convert_to_assets(&self, shares: Amount) -> Amount {
        shares.mul_div(self.share_price(), Amount::from_units(1)).unwrap_or(Amount::ZERO)
    }

    pub fn user_asset_value(&self, receiver: ReceiverId) -> Amount {
        self.convert_to_assets(self.shares_of(receiver))
    }

    /// Mints shares for `amount` deposited assets. Returns the shares
    /// minted (0 if `amount == 0`).
    pub fn deposit(&mut self, receiver: ReceiverId, amount: Amount) -> PoolResult<Amount> {
        if amount.is_zero() {
            return Ok(Amount::ZERO);
        }
        let shares_minted = self.convert_to_shares(amount);
        let new_user_shares = self
            .shares_of(receiver)
            .checked_add(shares_minted)
            .ok_or(PoolError::Overflow)?;
        self.total_shares = self.total_shares.checked_add(shares_minted).ok_or(PoolError::Overflow)?;
        self.total_assets = self.total_assets.checked_add(amount).ok_or(PoolError::Overflow)?;
        self.user_shares.insert(receiver, new_user_shares);
        Ok(shares_minted)
    }

    /// Burns shares worth up to `amount` assets, returning the amount
    /// actually withdrawn. Full-burns (all of the user's shares) whenever
    /// the request would exhaust the position or leave dust behind.
    pub fn withdraw(
        &mut self,
        receiver: ReceiverId,
        amount: Amount,
        dust_threshold: Amount,
    ) -> PoolResult<Amount> {
        let user_shares = self.shares_of(receiver);
        if user_shares.is_zero() {
            return Err(PoolError::NoShares(receiver));
        }
        let user_asset_value = self.convert_to_assets(user_shares);
        if amount > user_asset_value {
            return Err(PoolError::InsufficientBalance { requested: amount, available: user_asset_value });
        }

        let shares_to_burn = self.convert_to_shares(amount);

        let residual = user_asset_value.saturating_sub(amount);
        let full_burn = amount >= user_asset_value
            || shares_to_burn > user_shares
            || (!residual.is_zero() && residual < dust_threshold);

        let (burned_shares, actual_withdrawn) = if full_burn {
            (user_shares, user_asset_value)
        } else {
            (shares_to_burn, amount)
        };

        self.total_assets = self
            .total_assets
            .checked_sub(actual_withdrawn)
            .ok_or(PoolError::Underflow)?;
        self.total_shares = self.total_shares.checked_sub(burned_shares).ok_or(PoolError::Underflow)?;
        let remaining = user_shares.checked_sub(burned_shares).ok_or(PoolError::Underflow)?;
        if remaining.is_zero() {
            self.user_shares.remove(&receiver);
        } else {
            self.user_shares.insert(receiver, remaining);
        }

        Ok(actual_withdrawn)
    }

    /// Accrues yield into `total_assets`, routing a virtual-share dust
    /// remainder to the caller (who forwards it to the protocol bucket).
    /// Returns `(actual_accrued, dust)`.
    pub fn accrue_yield(&mut self, amount: Amount) -> PoolResult<(Amount, Amount)> {
        if self.total_shares.is_zero() || amount.is_zero() {
            return Ok((Amount::ZERO, Amount::ZERO));
        }
        let denom = self.total_shares.checked_add(Amount::VIRTUAL_SHARES).ok_or(PoolError::Overflow)?;
        let dust = amount.mul_div(Amount::VIRTUAL_SHARES, denom).ok_or(PoolError::Overflow)?;
        let actual = amount.checked_sub(dust).ok_or(PoolError::Underflow)?;
        self.total_assets = self.total_assets.checked_add(actual).ok_or(PoolError::Overflow)?;
        Ok((actual, dust))
    }

    /// Socializes a loss by reducing `total_assets`, capped at the
    /// current balance. No virtual-share dust routing: losses must
    /// propagate fully through share price.
    pub fn decrease_total_assets(&mut self, amount: Amount) -> Amount {
        let actual = amount.min(self.total_assets);
        self.total_assets = self.total_assets.saturating_sub(actual);
        actual
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(id: u64) -> ReceiverId {
        ReceiverId(id)
    }

    #[test]
    fn first_deposit_mints_shares_near_1_to_1() {
        let mut ledger = ShareLedger::new();
        let minted = ledger.deposit(r(1), Amount::from_units(100)).unwrap();
        // With virtual offsets of 1e-4, minted shares are very close to
        // (but not exactly) the deposited amount.
        let diff = Amount::from_units(100).raw().abs_diff(minted.raw());
        assert!(diff < 1000, "diff was {diff}");
    }

    #[test]
    fn deposit_zero_is_noop() {
        let mut ledger = ShareLedger::new();
        assert_eq!(ledger.deposit(r(1), Amount::ZERO).unwrap(), Amount::ZERO);
        assert!(ledger.total_shares().is_zero());
    }

    #[test]
    fn withdraw_requires_shares() {
        let mut ledger = ShareLedger::new();
        let err = ledger.withdraw(r(1), Amount::from_units(1), Amount::ZERO).unwrap_err();
        assert_eq!(err, PoolError::NoShares(r(1)));
    }

    #[test]
    fn withdraw_burns_dust_remainder_fully() {
        let mut ledger = ShareLedger::new();
        ledger.deposit(r(1), Amount::from_units(10)).unwrap();
        // Withdraw all but a sliver below the dust threshold.
        let value = ledger.user_asset_value(r(1));
        let ask = value.saturating_sub(Amount::from_raw(5));
        let dust_threshold = Amount::from_raw(100);
        let got = ledger.withdraw(r(1), ask, dust_threshold).unwrap();
        assert_eq!(got, value);
        assert!(ledger.shares_of(r(1)).is_zero());
    }

    #[test]
    fn accrue_yield_routes_virtual_share_dust() {
        let mut ledger = ShareLedger::new();
        ledger.deposit(r(1), Amount::from_units(100)).unwrap();
        let (actual, dust) = ledger.accrue_yield(Amount::from_units(10)).unwrap();
        assert!(actual.checked_add(dust).unwrap() == Amount::from_units(10));
        assert!(!dust.is_zero());
    }

    #[test]
    fn accrue_yield_with_no_shares_is_noop() {
        let mut ledger = ShareLedger::new();
        let (actual, dust) = ledger.accrue_yield(Amount::from_units(10)).unwrap();
        assert!(actual.is_zero() && dust.is_zero());
    }

    #[test]
    fn share_price_monotonic_under_yield_and_loss() {
        let mut ledger = ShareLedger::new();
        ledger.deposit(r(1), Amount::from_units(100)).unwrap();
        let before = ledger.share_price();
        ledger.accrue_yield(Amount::from_units(10)).unwrap();
        let after_yield = ledger.share_price();
        assert!(after_yield >= before);
        ledger.decrease_total_assets(Amount::from_units(5));
        let after_loss = ledger.share_price();
        assert!(after_loss <= after_yield);
    }

    #[test]
    fn sum_of_user_shares_equals_total() {
        let mut ledger = ShareLedger::new();
        ledger.deposit(r(1), Amount::from_units(100)).unwrap();
        ledger.deposit(r(2), Amount::from_units(50)).unwrap();
        let sum: u64 = ledger.holders().map(|(_, s)| s.raw()).sum();
        assert_eq!(sum, ledger.total_shares().raw());
    }
}
