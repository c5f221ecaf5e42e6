//! Admin-gated canister configuration, stored in its own stable cell
//! separate from the pool state so a config change never needs to
//! touch (and re-serialize) the much larger `Pool` value.

use candid::{CandidType, Principal};
use ic_stable_structures::memory_manager::VirtualMemory;
use ic_stable_structures::{storable::Bound, DefaultMemoryImpl, StableCell, Storable};
use pool_core::config::{EmergencyConfig, PoolConfig};
use pool_core::prize_distribution::PrizeDistribution;
use pool_core::yield_reconciler::DistributionStrategy;
use pool_core::Amount;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::cell::RefCell;

use crate::storage::{Memory, MEMORY_MANAGER};

const CONFIG_MEMORY_ID: u8 = 1;

#[derive(Clone, CandidType, Deserialize, Serialize)]
pub struct CanisterConfig {
    pub admin_principal: Option<Principal>,
    pub ledger_canister: Principal,
    pub pool_config: PoolConfig,
    pub emergency_config: EmergencyConfig,
}

impl Storable for CanisterConfig {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(candid::encode_one(self).expect("failed to encode CanisterConfig"))
    }

    fn into_bytes(self) -> Vec<u8> {
        candid::encode_one(&self).expect("failed to encode CanisterConfig")
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        candid::decode_one(&bytes).expect("failed to decode CanisterConfig")
    }

    const BOUND: Bound = Bound::Unbounded;
}

impl Default for CanisterConfig {
    fn default() -> Self {
        Self {
            admin_principal: None,
            // Mainnet ckUSDT ledger; operators retarget via `set_ledger_canister`.
            ledger_canister: Principal::from_text("cngnf-vqaaa-aaaar-qag4q-cai")
                .expect("invalid default ledger principal"),
            pool_config: PoolConfig {
                minimum_deposit: Amount::from_units(1),
                draw_interval_seconds: 7 * 24 * 3600,
                distribution_strategy: DistributionStrategy::FixedPercentage {
                    rewards: Amount::from_raw(Amount::from_units(1).raw() / 2),
                    prize: Amount::from_raw(Amount::from_units(1).raw() * 4 / 10),
                    fee: Amount::from_raw(Amount::from_units(1).raw() / 10),
                },
                prize_distribution: PrizeDistribution::SingleWinner,
                dust_threshold: Amount::from_raw(Amount::from_units(1).raw() / 1000),
            },
            emergency_config: EmergencyConfig::default(),
        }
    }
}

thread_local! {
    static CONFIG: RefCell<StableCell<CanisterConfig, VirtualMemory<DefaultMemoryImpl>>> = {
        RefCell::new(
            StableCell::init(
                MEMORY_MANAGER.with(|m| m.borrow().get(ic_stable_structures::memory_manager::MemoryId::new(CONFIG_MEMORY_ID))),
                CanisterConfig::default(),
            )
        )
    };
}

pub fn get() -> CanisterConfig {
    CONFIG.with(|c| c.borrow().get().clone())
}

pub fn is_admin(caller: Principal) -> bool {
    get().admin_principal.map_or(false, |admin| admin == caller)
}

/// First caller claims the admin seat; subsequent changes require the
/// current admin's signature.
pub fn set_admin(new_admin: Principal) -> Result<(), String> {
    let caller = ic_cdk::caller();
    CONFIG.with(|c| {
        let mut cfg = c.borrow().get().clone();
        if let Some(current) = cfg.admin_principal {
            if caller != current {
                return Err("unauthorized: only the current admin can change admin".to_string());
            }
        }
        cfg.admin_principal = Some(new_admin);
        c.borrow_mut().set(cfg);
        Ok(())
    })
}

pub fn set_pool_config(new_config: PoolConfig) -> Result<(), String> {
    require_admin()?;
    new_config.distribution_strategy.validate().map_err(|e| e.to_string())?;
    CONFIG.with(|c| {
        let mut cfg = c.borrow().get().clone();
        cfg.pool_config = new_config;
        c.borrow_mut().set(cfg);
    });
    Ok(())
}

pub fn set_emergency_config(new_config: EmergencyConfig) -> Result<(), String> {
    require_admin()?;
    CONFIG.with(|c| {
        let mut cfg = c.borrow().get().clone();
        cfg.emergency_config = new_config;
        c.borrow_mut().set(cfg);
    });
    Ok(())
}

pub fn set_ledger_canister(new_ledger: Principal) -> Result<(), String> {
    require_admin()?;
    CONFIG.with(|c| {
        let mut cfg = c.borrow().get().clone();
        cfg.ledger_canister = new_ledger;
        c.borrow_mut().set(cfg);
    });
    Ok(())
}

pub fn require_admin() -> Result<(), String> {
    let caller = ic_cdk::caller();
    if !is_admin(caller) {
        return Err("unauthorized: admin-only operation".to_string());
    }
    Ok(())
}
