//! Three-bucket yield allocation with waterfall deficit absorption.
//! See spec.md §4.3.

use crate::amount::Amount;
use crate::share_ledger::ShareLedger;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "candid", derive(candid::CandidType))]
#[derive(Clone, Copy, Debug, Default)]
pub struct AllocationBook {
    pub allocated_rewards: Amount,
    pub allocated_prize_yield: Amount,
    pub allocated_protocol_fee: Amount,
}

impl AllocationBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> Amount {
        self.allocated_rewards
            .checked_add(self.allocated_prize_yield)
            .and_then(|s| s.checked_add(self.allocated_protocol_fee))
            .unwrap_or(Amount::MAX)
    }

    /// Absorbs `deficit` in fee -> prize -> rewards order, reducing
    /// `ledger`'s total assets by whatever portion is absorbed by the
    /// rewards bucket (since rewards back real user principal). Returns
    /// any residual deficit that could not be absorbed anywhere
    /// (non-zero residual is an `InsolvencyDetected` condition).
    pub fn apply_waterfall(&mut self, deficit: Amount, ledger: &mut ShareLedger) -> Amount {
        let mut remaining = deficit;

        let from_fee = remaining.min(self.allocated_protocol_fee);
        self.allocated_protocol_fee = self.allocated_protocol_fee.saturating_sub(from_fee);
        remaining = remaining.saturating_sub(from_fee);

        let from_prize = remaining.min(self.allocated_prize_yield);
        self.allocated_prize_yield = self.allocated_prize_yield.saturating_sub(from_prize);
        remaining = remaining.saturating_sub(from_prize);

        let from_rewards = remaining.min(self.allocated_rewards);
        self.allocated_rewards = self.allocated_rewards.saturating_sub(from_rewards);
        remaining = remaining.saturating_sub(from_rewards);
        if !from_rewards.is_zero() {
            ledger.decrease_total_assets(from_rewards);
        }

        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReceiverId;

    #[test]
    fn waterfall_drains_fee_then_prize_then_rewards() {
        let mut book = AllocationBook {
            allocated_rewards: Amount::from_units(100),
            allocated_prize_yield: Amount::from_units(10),
            allocated_protocol_fee: Amount::from_units(5),
        };
        let mut ledger = ShareLedger::new();
        ledger.deposit(ReceiverId(1), Amount::from_units(100)).unwrap();

        let residual = book.apply_waterfall(Amount::from_units(20), &mut ledger);
        assert!(residual.is_zero());
        assert!(book.allocated_protocol_fee.is_zero());
        assert!(book.allocated_prize_yield.is_zero());
        assert_eq!(book.allocated_rewards, Amount::from_units(90));
    }

    #[test]
    fn insolvency_reports_residual_when_buckets_exhausted() {
        let mut book = AllocationBook {
            allocated_rewards: Amount::from_units(5),
            allocated_prize_yield: Amount::from_units(3),
            allocated_protocol_fee: Amount::from_units(2),
        };
        let mut ledger = ShareLedger::new();
        let residual = book.apply_waterfall(Amount::from_units(15), &mut ledger);
        assert_eq!(residual, Amount::from_units(5));
        assert!(book.total().is_zero());
    }

    #[test]
    fn exact_drop_leaves_no_insolvency() {
        let mut book = AllocationBook {
            allocated_rewards: Amount::ZERO,
            allocated_prize_yield: Amount::ZERO,
            allocated_protocol_fee: Amount::from_units(10),
        };
        let mut ledger = ShareLedger::new();
        let residual = book.apply_waterfall(Amount::from_units(10), &mut ledger);
        assert!(residual.is_zero());
        assert!(book.total().is_zero());
    }
}
