//! Configuration structs (spec.md §6) and the emergency state matrix
//! (spec.md §4.6).

use crate::amount::Amount;
use crate::prize_distribution::PrizeDistribution;
use crate::yield_reconciler::DistributionStrategy;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "candid", derive(candid::CandidType))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmergencyState {
    Normal,
    Paused,
    Emergency,
    Partial,
}

impl EmergencyState {
    pub fn deposits_allowed(self) -> bool {
        matches!(self, EmergencyState::Normal | EmergencyState::Partial)
    }

    pub fn withdrawals_allowed(self) -> bool {
        !matches!(self, EmergencyState::Paused)
    }

    pub fn draws_allowed(self) -> bool {
        matches!(self, EmergencyState::Normal)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "candid", derive(candid::CandidType))]
#[derive(Clone, Debug)]
pub struct EmergencyConfig {
    pub max_emergency_duration: Option<u64>,
    pub auto_recovery_enabled: bool,
    pub min_yield_source_health: f64,
    pub max_withdraw_failures: usize,
    pub partial_mode_deposit_limit: Option<Amount>,
    pub min_balance_threshold: f64,
    pub min_recovery_health: f64,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        EmergencyConfig {
            max_emergency_duration: Some(86_400),
            auto_recovery_enabled: true,
            min_yield_source_health: 0.5,
            max_withdraw_failures: 3,
            partial_mode_deposit_limit: Some(Amount::from_units(100)),
            min_balance_threshold: 0.95,
            min_recovery_health: 0.5,
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "candid", derive(candid::CandidType))]
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub minimum_deposit: Amount,
    pub draw_interval_seconds: u64,
    pub distribution_strategy: DistributionStrategy,
    pub prize_distribution: PrizeDistribution,
    pub dust_threshold: Amount,
}
