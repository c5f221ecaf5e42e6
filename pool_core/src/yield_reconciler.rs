//! Synchronizes the external venue's reported balance with the internal
//! allocation buckets, handling both appreciation and depreciation.
//! See spec.md §4.4.

use crate::allocation_book::AllocationBook;
use crate::amount::Amount;
use crate::capabilities::YieldConnector;
use crate::error::{PoolError, PoolResult};
use crate::events::Event;
use crate::share_ledger::ShareLedger;

/// A closed variant set of distribution strategies for newly observed
/// yield. Exactly one variant today; the enum exists so new strategies
/// can be added without touching call sites.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "candid", derive(candid::CandidType))]
#[derive(Clone, Copy, Debug)]
pub enum DistributionStrategy {
    /// `rewards + prize + fee` must sum to exactly `Amount::from_units(1)`.
    /// The fee bucket receives the residual of the multiplication so the
    /// three shares conserve `delta` exactly in fixed-point.
    FixedPercentage { rewards: Amount, prize: Amount, fee: Amount },
}

impl DistributionStrategy {
    pub fn validate(&self) -> PoolResult<()> {
        match self {
            DistributionStrategy::FixedPercentage { rewards, prize, fee } => {
                let sum = rewards
                    .checked_add(*prize)
                    .and_then(|s| s.checked_add(*fee))
                    .ok_or(PoolError::Overflow)?;
                if sum != Amount::from_units(1) {
                    return Err(PoolError::PercentagesNotNormalized { actual: sum });
                }
                Ok(())
            }
        }
    }

    /// Splits `delta` into `(rewards, prize, fee)`, exactly conserving
    /// `delta` by giving the fee bucket the remainder.
    fn split(&self, delta: Amount) -> PoolResult<(Amount, Amount, Amount)> {
        match self {
            DistributionStrategy::FixedPercentage { rewards, prize, .. } => {
                let rewards_amt = delta.mul_div(*rewards, Amount::from_units(1)).ok_or(PoolError::Overflow)?;
                let prize_amt = delta.mul_div(*prize, Amount::from_units(1)).ok_or(PoolError::Overflow)?;
                let spent = rewards_amt.checked_add(prize_amt).ok_or(PoolError::Overflow)?;
                let fee_amt = delta.checked_sub(spent).ok_or(PoolError::Underflow)?;
                Ok((rewards_amt, prize_amt, fee_amt))
            }
        }
    }
}

pub struct YieldReconciler<'a> {
    pub book: &'a mut AllocationBook,
    pub ledger: &'a mut ShareLedger,
    pub strategy: DistributionStrategy,
}

impl<'a> YieldReconciler<'a> {
    pub fn new(book: &'a mut AllocationBook, ledger: &'a mut ShareLedger, strategy: DistributionStrategy) -> Self {
        YieldReconciler { book, ledger, strategy }
    }

    /// Aligns the allocation book to `connector`'s reported balance,
    /// emitting the events that resulted. Dust below
    /// `Amount::MIN_DISTRIBUTION_THRESHOLD` is left to accumulate.
    ///
    /// The comparison baseline is `ledger.total_assets() + prize + fee`,
    /// not `book.total()`: `allocated_rewards` is a running tally of
    /// yield already folded into `total_assets` via `accrue_yield`, not
    /// a separate pot, so including it here would double-count.
    pub fn reconcile(&mut self, connector: &impl YieldConnector) -> PoolResult<Vec<Event>> {
        let mut events = Vec::new();
        let balance = connector.available();
        let allocated = self
            .ledger
            .total_assets()
            .checked_add(self.book.allocated_prize_yield)
            .and_then(|s| s.checked_add(self.book.allocated_protocol_fee))
            .unwrap_or(Amount::MAX);

        let delta = if balance > allocated {
            balance.checked_sub(allocated).unwrap_or(Amount::ZERO)
        } else {
            allocated.checked_sub(balance).unwrap_or(Amount::ZERO)
        };

        if delta < Amount::MIN_DISTRIBUTION_THRESHOLD {
            return Ok(events);
        }

        if balance > allocated {
            self.strategy.validate()?;
            let (rewards, prize, fee) = self.strategy.split(delta)?;
            let (actual_rewards, dust) = self.ledger.accrue_yield(rewards)?;
            self.book.allocated_prize_yield = self.book.allocated_prize_yield.checked_add(prize).ok_or(PoolError::Overflow)?;
            let fee_total = fee.checked_add(dust).ok_or(PoolError::Overflow)?;
            self.book.allocated_protocol_fee = self.book.allocated_protocol_fee.checked_add(fee_total).ok_or(PoolError::Overflow)?;
            self.book.allocated_rewards = self.book.allocated_rewards.checked_add(actual_rewards).ok_or(PoolError::Overflow)?;
            events.push(Event::YieldAccrued { actual: actual_rewards, dust });
            events.push(Event::Reconciled { rewards: actual_rewards, prize, fee: fee_total });
        } else {
            let residual = self.book.apply_waterfall(delta, self.ledger);
            events.push(Event::LossSocialized { amount: delta.saturating_sub(residual) });
            if !residual.is_zero() {
                events.push(Event::InsolvencyDetected { unreconciled: residual });
            }
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Vault;
    use crate::ReceiverId;

    struct FakeConnector {
        balance: Amount,
    }

    impl YieldConnector for FakeConnector {
        fn deposit_capacity(&mut self, vault: &mut Vault) -> PoolResult<()> {
            self.balance = self.balance.checked_add(vault.drain()).unwrap();
            Ok(())
        }
        fn minimum_capacity(&self) -> Amount {
            Amount::MAX
        }
        fn minimum_available(&self) -> Amount {
            self.balance
        }
        fn withdraw_available(&mut self, max: Amount) -> Vault {
            let taken = max.min(self.balance);
            self.balance = self.balance.saturating_sub(taken);
            Vault::new(taken)
        }
    }

    fn strategy() -> DistributionStrategy {
        DistributionStrategy::FixedPercentage {
            rewards: Amount::from_raw(Amount::from_units(1).raw() / 2),
            prize: Amount::from_raw(Amount::from_units(1).raw() * 4 / 10),
            fee: Amount::from_raw(Amount::from_units(1).raw() / 10),
        }
    }

    #[test]
    fn s2_reconcile_splits_yield_50_40_10() {
        let mut book = AllocationBook::new();
        let mut ledger = ShareLedger::new();
        ledger.deposit(ReceiverId(1), Amount::from_units(100)).unwrap();
        ledger.deposit(ReceiverId(2), Amount::from_units(100)).unwrap();
        // 200 principal plus 10 of newly observed yield.
        let connector = FakeConnector { balance: Amount::from_units(210) };

        let mut reconciler = YieldReconciler::new(&mut book, &mut ledger, strategy());
        reconciler.reconcile(&connector).unwrap();

        assert_eq!(book.total(), Amount::from_units(10));
        let diff_rewards = book.allocated_rewards.raw().abs_diff(Amount::from_units(5).raw());
        let diff_prize = book.allocated_prize_yield.raw().abs_diff(Amount::from_units(4).raw());
        let diff_fee = book.allocated_protocol_fee.raw().abs_diff(Amount::from_units(1).raw());
        assert!(diff_rewards < 10 && diff_prize < 10 && diff_fee < 1000, "{:?}", book);
    }

    #[test]
    fn s4_loss_waterfall_no_insolvency() {
        let mut book = AllocationBook {
            allocated_rewards: Amount::from_units(100),
            allocated_prize_yield: Amount::from_units(10),
            allocated_protocol_fee: Amount::from_units(5),
        };
        let mut ledger = ShareLedger::new();
        // `allocated_rewards` is already inside this 100: it represents
        // the portion of total_assets attributable to past yield.
        ledger.deposit(ReceiverId(1), Amount::from_units(100)).unwrap();
        let connector = FakeConnector { balance: Amount::from_units(95) };

        let mut reconciler = YieldReconciler::new(&mut book, &mut ledger, strategy());
        let events = reconciler.reconcile(&connector).unwrap();

        assert!(book.allocated_protocol_fee.is_zero());
        assert!(book.allocated_prize_yield.is_zero());
        // Tracked total was 100+10+5=115, balance dropped to 95: a 20
        // deficit drains fee (5) then prize (10), leaving 5 to come out
        // of rewards (100 -> 95).
        assert_eq!(book.allocated_rewards, Amount::from_units(95));
        assert!(!events.iter().any(|e| matches!(e, Event::InsolvencyDetected { .. })));
    }

    #[test]
    fn s5_insolvency_reports_exact_residual() {
        let mut book = AllocationBook {
            allocated_rewards: Amount::from_units(500),
            allocated_prize_yield: Amount::from_units(300),
            allocated_protocol_fee: Amount::from_units(200),
        };
        let mut ledger = ShareLedger::new();
        ledger.deposit(ReceiverId(1), Amount::from_units(500)).unwrap();
        let connector = FakeConnector { balance: Amount::ZERO };

        let mut reconciler = YieldReconciler::new(&mut book, &mut ledger, strategy());
        let events = reconciler.reconcile(&connector).unwrap();
        assert!(book.total().is_zero());
        assert!(ledger.total_assets().is_zero());
        // Exact match: tracked total (1000) equals the drop to zero, so
        // no insolvency event.
        assert!(!events.iter().any(|e| matches!(e, Event::InsolvencyDetected { .. })));
    }

    #[test]
    fn insolvency_reported_when_loss_exceeds_tracked_buffers() {
        // Buffers (rewards only, 5) are far smaller than the principal
        // (20) the venue claims to have lost entirely: the waterfall
        // drains what it can and reports the rest as unreconciled.
        let mut book = AllocationBook {
            allocated_rewards: Amount::from_units(5),
            allocated_prize_yield: Amount::ZERO,
            allocated_protocol_fee: Amount::ZERO,
        };
        let mut ledger = ShareLedger::new();
        ledger.deposit(ReceiverId(1), Amount::from_units(20)).unwrap();
        let connector = FakeConnector { balance: Amount::ZERO };

        let mut reconciler = YieldReconciler::new(&mut book, &mut ledger, strategy());
        let events = reconciler.reconcile(&connector).unwrap();

        assert!(events
            .iter()
            .any(|e| matches!(e, Event::InsolvencyDetected { unreconciled } if *unreconciled == Amount::from_units(15))));
        assert!(book.total().is_zero());
        assert_eq!(ledger.total_assets(), Amount::from_units(15));
    }

    #[test]
    fn dust_below_threshold_is_skipped() {
        let mut book = AllocationBook::new();
        let mut ledger = ShareLedger::new();
        ledger.deposit(ReceiverId(1), Amount::from_units(100)).unwrap();
        let connector = FakeConnector { balance: Amount::from_units(100).checked_add(Amount::from_raw(1)).unwrap() };
        let mut reconciler = YieldReconciler::new(&mut book, &mut ledger, strategy());
        let events = reconciler.reconcile(&connector).unwrap();
        assert!(events.is_empty());
        assert!(book.total().is_zero());
    }
}
