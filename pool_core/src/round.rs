//! Normalized time-weighted average balance (TWAB) rounds.
//!
//! A scaled accumulator records share-time per receiver without
//! overflowing by dividing by [`Round::TWAB_SCALE`] at each per-update
//! step rather than at finalization. See spec.md §4.2.

use std::collections::BTreeMap;

use crate::amount::Amount;
use crate::error::{PoolError, PoolResult};
use crate::{ReceiverId, RoundId};

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "candid", derive(candid::CandidType))]
#[derive(Clone, Debug)]
pub struct Round {
    pub round_id: RoundId,
    pub start_time: u64,
    pub target_end_time: u64,
    pub actual_end_time: Option<u64>,
    user_scaled_twab: BTreeMap<ReceiverId, Amount>,
    user_last_update_time: BTreeMap<ReceiverId, u64>,
    user_shares_at_last_update: BTreeMap<ReceiverId, Amount>,
}

impl Round {
    /// One year, in seconds: the unit the scaled accumulator divides by
    /// at every update so it never overflows over realistic round
    /// durations and share balances.
    pub const TWAB_SCALE: u64 = 31_536_000;

    pub fn new(round_id: RoundId, start_time: u64, target_end_time: u64) -> Self {
        Round {
            round_id,
            start_time,
            target_end_time,
            actual_end_time: None,
            user_scaled_twab: BTreeMap::new(),
            user_last_update_time: BTreeMap::new(),
            user_shares_at_last_update: BTreeMap::new(),
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.actual_end_time.is_some()
    }

    fn effective_time(&self, at_time: u64) -> u64 {
        match self.actual_end_time {
            Some(end) => at_time.min(end),
            None => at_time,
        }
    }

    /// Accumulates pending share-time using the *old* balance, then
    /// records the new balance as the basis for future accrual.
    pub fn record_share_change(
        &mut self,
        receiver: ReceiverId,
        old_shares: Amount,
        new_shares: Amount,
        at_time: u64,
    ) -> PoolResult<()> {
        let effective_time = self.effective_time(at_time);
        let last_update = self
            .user_last_update_time
            .get(&receiver)
            .copied()
            .unwrap_or(self.start_time);

        if effective_time > last_update {
            let elapsed = effective_time - last_update;
            let scaled_pending = old_shares
                .mul_div_u64(elapsed, Self::TWAB_SCALE)
                .ok_or(PoolError::Overflow)?;
            if !scaled_pending.is_zero() {
                let entry = self
                    .user_scaled_twab
                    .entry(receiver)
                    .or_insert(Amount::ZERO);
                *entry = entry.checked_add(scaled_pending).ok_or(PoolError::Overflow)?;
            }
        }

        self.user_shares_at_last_update.insert(receiver, new_shares);
        self.user_last_update_time.insert(receiver, effective_time);
        Ok(())
    }

    /// Finalized prize weight for `receiver`, capped at `current_shares`
    /// (the safety cap from spec.md §4.2).
    pub fn finalize_twab(&self, receiver: ReceiverId, current_shares: Amount, round_end: u64) -> Amount {
        let accumulated = self
            .user_scaled_twab
            .get(&receiver)
            .copied()
            .unwrap_or(Amount::ZERO);
        let last = self
            .user_last_update_time
            .get(&receiver)
            .copied()
            .unwrap_or(self.start_time);
        let shares = self
            .user_shares_at_last_update
            .get(&receiver)
            .copied()
            .unwrap_or(current_shares);

        let tail_elapsed = round_end.saturating_sub(last);
        let scaled_pending = shares.mul_div_u64(tail_elapsed, Self::TWAB_SCALE).unwrap_or(Amount::ZERO);

        let duration = round_end.saturating_sub(self.start_time);
        if duration == 0 {
            return Amount::ZERO;
        }

        let total_scaled = accumulated.checked_add(scaled_pending).unwrap_or(Amount::MAX);
        let weight = total_scaled.mul_div_u64(Self::TWAB_SCALE, duration).unwrap_or(Amount::ZERO);
        weight.min(shares)
    }

    /// Permitted only before the round is finalized. Shortening must
    /// satisfy `new_target >= now`, otherwise a user's already-accumulated
    /// share-time could exceed the new (shorter) duration and violate the
    /// finalize_twab safety cap.
    pub fn set_target_end_time(&mut self, new_target: u64, now: u64) -> PoolResult<()> {
        if self.is_finalized() {
            return Err(PoolError::CannotShortenRoundBeforeNow);
        }
        if new_target < self.target_end_time && new_target < now {
            return Err(PoolError::CannotShortenRoundBeforeNow);
        }
        self.target_end_time = new_target;
        Ok(())
    }

    /// Sets `actual_end_time` exactly once, at draw start.
    pub fn finalize_at(&mut self, now: u64) -> PoolResult<()> {
        if self.is_finalized() {
            return Err(PoolError::ActiveRoundAlreadyExists);
        }
        self.actual_end_time = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(id: u64) -> ReceiverId {
        ReceiverId(id)
    }

    #[test]
    fn full_round_holder_identity() {
        // Holds `s` shares from start to actual_end with no other
        // activity: finalize_twab approx equals s.
        let mut round = Round::new(RoundId(1), 0, 1000);
        let shares = Amount::from_units(100);
        round.record_share_change(r(1), Amount::ZERO, shares, 0).unwrap();
        round.finalize_at(1000).unwrap();
        let weight = round.finalize_twab(r(1), shares, 1000);
        let diff = weight.raw().abs_diff(shares.raw());
        assert!(diff < 10, "diff was {diff}");
    }

    #[test]
    fn half_duration_holder_gets_half_weight() {
        let mut round = Round::new(RoundId(1), 0, 1000);
        let shares = Amount::from_units(100);
        // Deposits at t=500, held to actual_end=1000.
        round.record_share_change(r(1), Amount::ZERO, shares, 500).unwrap();
        round.finalize_at(1000).unwrap();
        let weight = round.finalize_twab(r(1), shares, 1000);
        let expected = Amount::from_units(50);
        let diff = weight.raw().abs_diff(expected.raw());
        assert!(diff < 1_000_000, "diff was {diff} weight={weight:?}");
    }

    #[test]
    fn late_depositor_after_finalization_gets_zero_weight() {
        let mut round = Round::new(RoundId(1), 0, 1000);
        round.finalize_at(1000).unwrap();
        // Deposit attempted at t=1001, after actual_end=1000: timestamp
        // is capped, so no share-time accrues before the cap and the new
        // balance is recorded exactly at the cap with zero duration left.
        round.record_share_change(r(2), Amount::ZERO, Amount::from_units(100), 1001).unwrap();
        let weight = round.finalize_twab(r(2), Amount::from_units(100), 1000);
        assert!(weight.is_zero());
    }

    #[test]
    fn finalized_weight_never_exceeds_current_shares() {
        let mut round = Round::new(RoundId(1), 0, 1000);
        let shares = Amount::from_units(100);
        round.record_share_change(r(1), Amount::ZERO, shares, 0).unwrap();
        round.finalize_at(1000).unwrap();
        let weight = round.finalize_twab(r(1), shares, 1000);
        assert!(weight <= shares);
    }

    #[test]
    fn cannot_shorten_round_to_before_now() {
        let mut round = Round::new(RoundId(1), 0, 1000);
        let err = round.set_target_end_time(400, 500).unwrap_err();
        assert_eq!(err, PoolError::CannotShortenRoundBeforeNow);
    }

    #[test]
    fn can_lengthen_round_any_time() {
        let mut round = Round::new(RoundId(1), 0, 1000);
        round.set_target_end_time(2000, 500).unwrap();
        assert_eq!(round.target_end_time, 2000);
    }

    #[test]
    fn cannot_retarget_after_finalization() {
        let mut round = Round::new(RoundId(1), 0, 1000);
        round.finalize_at(1000).unwrap();
        assert!(round.set_target_end_time(2000, 1000).is_err());
    }
}
