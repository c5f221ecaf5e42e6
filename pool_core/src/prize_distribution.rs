//! Prize distribution variants. All produce parallel `(amounts)` arrays
//! that sum exactly to the input prize, with the last amount absorbing
//! the fixed-point remainder (spec.md §4.5).

use crate::amount::Amount;
use crate::error::{PoolError, PoolResult};

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "candid", derive(candid::CandidType))]
#[derive(Clone, Debug)]
pub enum PrizeDistribution {
    SingleWinner,
    PercentageSplit { splits: Vec<Amount> },
    FixedAmountTiers { tiers: Vec<PrizeTier> },
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "candid", derive(candid::CandidType))]
#[derive(Clone, Debug)]
pub struct PrizeTier {
    pub amount: Amount,
    pub count: usize,
    pub nfts_per_winner: usize,
}

/// One awarded slot: the winner's index into the selected-winners list,
/// the amount they receive, and the count of opaque NFT ids reserved
/// for them (custody lives outside the core).
pub struct Award {
    pub amount: Amount,
    pub nft_count: usize,
}

impl PrizeDistribution {
    pub fn winner_count(&self) -> usize {
        match self {
            PrizeDistribution::SingleWinner => 1,
            PrizeDistribution::PercentageSplit { splits } => splits.len(),
            PrizeDistribution::FixedAmountTiers { tiers } => tiers.iter().map(|t| t.count).sum(),
        }
    }

    /// Distributes `prize` across `winner_count()` awards, each summing
    /// exactly to `prize`.
    pub fn distribute(&self, prize: Amount) -> PoolResult<Vec<Award>> {
        match self {
            PrizeDistribution::SingleWinner => Ok(vec![Award { amount: prize, nft_count: 0 }]),

            PrizeDistribution::PercentageSplit { splits } => {
                if splits.is_empty() {
                    return Ok(vec![]);
                }
                let sum = splits
                    .iter()
                    .try_fold(Amount::ZERO, |acc, s| acc.checked_add(*s))
                    .ok_or(PoolError::Overflow)?;
                if sum != Amount::from_units(1) {
                    return Err(PoolError::PercentagesNotNormalized { actual: sum });
                }
                let mut awards = Vec::with_capacity(splits.len());
                let mut distributed = Amount::ZERO;
                for split in &splits[..splits.len() - 1] {
                    let amount = prize.mul_div(*split, Amount::from_units(1)).ok_or(PoolError::Overflow)?;
                    distributed = distributed.checked_add(amount).ok_or(PoolError::Overflow)?;
                    awards.push(Award { amount, nft_count: 0 });
                }
                let remainder = prize.checked_sub(distributed).ok_or(PoolError::Underflow)?;
                awards.push(Award { amount: remainder, nft_count: 0 });
                Ok(awards)
            }

            PrizeDistribution::FixedAmountTiers { tiers } => {
                let mut awards = Vec::with_capacity(self.winner_count());
                let mut distributed = Amount::ZERO;
                let total_slots = self.winner_count();
                let mut slot = 0;
                for tier in tiers {
                    for _ in 0..tier.count {
                        slot += 1;
                        let amount = if slot == total_slots {
                            prize.checked_sub(distributed).ok_or(PoolError::Underflow)?
                        } else {
                            tier.amount
                        };
                        distributed = distributed.checked_add(amount).ok_or(PoolError::Overflow)?;
                        awards.push(Award { amount, nft_count: tier.nfts_per_winner });
                    }
                }
                Ok(awards)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_winner_gets_entire_prize() {
        let awards = PrizeDistribution::SingleWinner.distribute(Amount::from_units(100)).unwrap();
        assert_eq!(awards.len(), 1);
        assert_eq!(awards[0].amount, Amount::from_units(100));
    }

    #[test]
    fn percentage_split_conserves_prize_exactly() {
        let dist = PrizeDistribution::PercentageSplit {
            splits: vec![
                Amount::from_raw(Amount::from_units(1).raw() / 3),
                Amount::from_raw(Amount::from_units(1).raw() / 3),
                Amount::from_raw(Amount::from_units(1).raw() / 3 + 1), // residual makes exactly 1.0
            ],
        };
        let awards = dist.distribute(Amount::from_units(100)).unwrap();
        let sum: u64 = awards.iter().map(|a| a.amount.raw()).sum();
        assert_eq!(sum, Amount::from_units(100).raw());
    }

    #[test]
    fn percentage_split_rejects_non_normalized() {
        let dist = PrizeDistribution::PercentageSplit { splits: vec![Amount::from_units(1) /* 1.0 but only one bucket missing the rest is fine actually */] };
        // A single 1.0 split sums to exactly 1.0, so this should succeed.
        assert!(dist.distribute(Amount::from_units(10)).is_ok());

        let bad = PrizeDistribution::PercentageSplit { splits: vec![Amount::from_units(1), Amount::from_units(1)] };
        assert!(matches!(bad.distribute(Amount::from_units(10)), Err(PoolError::PercentagesNotNormalized { .. })));
    }

    #[test]
    fn fixed_tiers_conserve_prize_exactly() {
        let dist = PrizeDistribution::FixedAmountTiers {
            tiers: vec![
                PrizeTier { amount: Amount::from_units(10), count: 2, nfts_per_winner: 1 },
                PrizeTier { amount: Amount::from_units(3), count: 3, nfts_per_winner: 0 },
            ],
        };
        let prize = Amount::from_units(100);
        let awards = dist.distribute(prize).unwrap();
        assert_eq!(awards.len(), 5);
        let sum: u64 = awards.iter().map(|a| a.amount.raw()).sum();
        assert_eq!(sum, prize.raw());
        assert_eq!(awards[0].nft_count, 1);
        assert_eq!(awards[4].nft_count, 0);
    }
}
