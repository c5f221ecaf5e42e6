//! Three-phase batched draw: `start_draw` -> `process_batch`* ->
//! `complete_draw`. Bounded-cost winner selection over arbitrarily many
//! participants with cancellation-safe resumption. See spec.md §4.5.

use crate::amount::Amount;
use crate::error::{PoolError, PoolResult};
use crate::prize_distribution::PrizeDistribution;
use crate::ReceiverId;

/// Warn (but do not reject) once accumulated weight crosses this bound;
/// an operator-facing signal that a round's TWAB has grown unusually
/// large relative to expectations.
pub const WEIGHT_WARNING_THRESHOLD: Amount = Amount::from_raw(u64::MAX / 4);

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "candid", derive(candid::CandidType))]
#[derive(Clone, Debug)]
pub struct DrawReceipt {
    pub prize_amount: Amount,
    pub randomness_request_id: u64,
    pub commit_block: u64,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "candid", derive(candid::CandidType))]
#[derive(Clone, Debug, Default)]
pub struct BatchSelectionData {
    pub receiver_ids: Vec<ReceiverId>,
    pub cumulative_weights: Vec<Amount>,
    pub total_weight: Amount,
    pub cursor: usize,
    pub snapshot_count: usize,
    /// Set once [`WEIGHT_WARNING_THRESHOLD`] is first crossed, so a batch
    /// only reports the warning on the transition instead of on every
    /// subsequent call for the rest of the draw.
    pub weight_warning_emitted: bool,
}

impl BatchSelectionData {
    pub fn new(snapshot_count: usize) -> Self {
        BatchSelectionData {
            receiver_ids: Vec::new(),
            cumulative_weights: Vec::new(),
            total_weight: Amount::ZERO,
            cursor: 0,
            snapshot_count,
            weight_warning_emitted: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.snapshot_count
    }

    pub fn remaining(&self) -> usize {
        self.snapshot_count.saturating_sub(self.cursor)
    }

    /// Records one finalized `(receiver, weight)` pair if `weight > 0`
    /// and advances the cursor. Returns `true` exactly once, the call
    /// whose running total first crosses [`WEIGHT_WARNING_THRESHOLD`].
    pub fn push(&mut self, receiver: ReceiverId, weight: Amount) -> PoolResult<bool> {
        self.cursor += 1;
        if weight.is_zero() {
            return Ok(false);
        }
        self.receiver_ids.push(receiver);
        self.total_weight = self.total_weight.checked_add(weight).ok_or(PoolError::Overflow)?;
        self.cumulative_weights.push(self.total_weight);
        let newly_crossed = !self.weight_warning_emitted && self.total_weight > WEIGHT_WARNING_THRESHOLD;
        if newly_crossed {
            self.weight_warning_emitted = true;
        }
        Ok(newly_crossed)
    }
}

/// Deterministic xorshift128+ PRNG, seeded from the fulfilled randomness
/// value. Two u64 words of state, never both zero.
pub struct Xorshift128Plus {
    s0: u64,
    s1: u64,
}

impl Xorshift128Plus {
    pub fn from_seed(seed: u64) -> Self {
        // splitmix64 to expand a single u64 seed into two well-distributed
        // words, avoiding the all-zero state that would otherwise be
        // reachable from seed == 0.
        let mut z = seed.wrapping_add(0x9E3779B97F4A7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        let s0 = z ^ (z >> 31);

        let mut z = seed.wrapping_add(0x9E3779B97F4A7C15).wrapping_add(0x9E3779B97F4A7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        let mut s1 = z ^ (z >> 31);
        if s0 == 0 && s1 == 0 {
            s1 = 1;
        }
        Xorshift128Plus { s0, s1 }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut s1 = self.s0;
        let s0 = self.s1;
        self.s0 = s0;
        s1 ^= s1 << 23;
        s1 ^= s1 >> 17;
        s1 ^= s0;
        s1 ^= s0 >> 26;
        self.s1 = s1;
        self.s0.wrapping_add(self.s1)
    }

    /// A draw uniformly in `[0, bound)`.
    pub fn next_below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        self.next_u64() % bound
    }
}

/// Binary search `cumulative_weights` for the first index whose
/// cumulative weight exceeds `r`.
fn find_bucket(cumulative_weights: &[Amount], r: u64) -> usize {
    let mut lo = 0usize;
    let mut hi = cumulative_weights.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if cumulative_weights[mid].raw() > r {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo
}

/// Selects `winner_count` winners from `batch` using `seed`, rejecting
/// collisions and falling back to deterministic fill-in-order if the
/// rejection-sampling budget (`3 * snapshot_count`) is exhausted before
/// enough distinct winners are found.
pub fn select_winners(batch: &BatchSelectionData, winner_count: usize, seed: u64) -> Vec<ReceiverId> {
    if batch.receiver_ids.is_empty() {
        return Vec::new();
    }

    if batch.total_weight.is_zero() {
        return batch
            .receiver_ids
            .iter()
            .take(winner_count)
            .copied()
            .collect();
    }

    let mut rng = Xorshift128Plus::from_seed(seed);
    let mut selected = Vec::with_capacity(winner_count.min(batch.receiver_ids.len()));
    let mut used = std::collections::BTreeSet::new();
    let max_attempts = 3 * batch.snapshot_count.max(1);
    let mut attempts = 0;

    while selected.len() < winner_count && selected.len() < batch.receiver_ids.len() && attempts < max_attempts {
        attempts += 1;
        let r = rng.next_below(batch.total_weight.raw());
        let idx = find_bucket(&batch.cumulative_weights, r);
        if idx >= batch.receiver_ids.len() {
            continue;
        }
        if used.insert(idx) {
            selected.push(batch.receiver_ids[idx]);
        }
    }

    if selected.len() < winner_count {
        for (idx, receiver) in batch.receiver_ids.iter().enumerate() {
            if selected.len() >= winner_count {
                break;
            }
            if used.insert(idx) {
                selected.push(*receiver);
            }
        }
    }

    selected
}

/// Applies `distribution` to `receipt.prize_amount` over `winners`,
/// returning parallel `(receiver, amount, nft_count)` triples.
pub fn apply_distribution(
    winners: &[ReceiverId],
    prize: Amount,
    distribution: &PrizeDistribution,
) -> PoolResult<Vec<(ReceiverId, Amount, usize)>> {
    let awards = distribution.distribute(prize)?;
    Ok(winners
        .iter()
        .zip(awards.into_iter())
        .map(|(r, a)| (*r, a.amount, a.nft_count))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(id: u64) -> ReceiverId {
        ReceiverId(id)
    }

    fn sample_batch() -> BatchSelectionData {
        let mut batch = BatchSelectionData::new(2);
        batch.push(r(1), Amount::from_units(100)).unwrap();
        batch.push(r(2), Amount::from_units(50)).unwrap();
        batch
    }

    #[test]
    fn selection_is_deterministic_given_same_seed() {
        let batch = sample_batch();
        let a = select_winners(&batch, 1, 42);
        let b = select_winners(&batch, 1, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn different_seeds_can_select_different_winners() {
        let batch = sample_batch();
        // Sweep a range of seeds; both participants must be reachable,
        // proportional to their weight.
        let mut saw_r1 = false;
        let mut saw_r2 = false;
        for seed in 0u64..200 {
            match select_winners(&batch, 1, seed).as_slice() {
                [only] if *only == r(1) => saw_r1 = true,
                [only] if *only == r(2) => saw_r2 = true,
                _ => {}
            }
        }
        assert!(saw_r1 && saw_r2);
    }

    #[test]
    fn zero_total_weight_falls_back_to_first_k() {
        let mut batch = BatchSelectionData::new(2);
        batch.receiver_ids = vec![r(1), r(2)];
        batch.total_weight = Amount::ZERO;
        let winners = select_winners(&batch, 1, 7);
        assert_eq!(winners, vec![r(1)]);
    }

    #[test]
    fn empty_batch_yields_no_winners() {
        let batch = BatchSelectionData::new(0);
        assert!(select_winners(&batch, 3, 7).is_empty());
    }

    #[test]
    fn winner_count_exceeding_participants_fills_what_exists() {
        let batch = sample_batch();
        let winners = select_winners(&batch, 5, 99);
        assert_eq!(winners.len(), 2);
    }

    #[test]
    fn prize_conservation_across_distribution() {
        let winners = vec![r(1), r(2), r(3)];
        let dist = PrizeDistribution::PercentageSplit {
            splits: vec![
                Amount::from_raw(Amount::from_units(1).raw() / 3),
                Amount::from_raw(Amount::from_units(1).raw() / 3),
                Amount::from_raw(Amount::from_units(1).raw() - 2 * (Amount::from_units(1).raw() / 3)),
            ],
        };
        let prize = Amount::from_units(10);
        let applied = apply_distribution(&winners, prize, &dist).unwrap();
        let sum: u64 = applied.iter().map(|(_, a, _)| a.raw()).sum();
        assert_eq!(sum, prize.raw());
    }

    #[test]
    fn batch_selection_fills_incrementally_and_completes() {
        let mut batch = BatchSelectionData::new(3);
        assert!(!batch.is_complete());
        batch.push(r(1), Amount::from_units(1)).unwrap();
        batch.push(r(2), Amount::ZERO).unwrap();
        batch.push(r(3), Amount::from_units(1)).unwrap();
        assert!(batch.is_complete());
        assert_eq!(batch.receiver_ids, vec![r(1), r(3)]);
    }
}
