//! Stable-memory layout. One `MemoryManager` partitions a single stable
//! memory into the virtual regions each stable structure below owns, the
//! same scheme `dice_backend`'s canisters use so a canister upgrade
//! never has to migrate byte layouts by hand.

use ic_stable_structures::memory_manager::{MemoryId, MemoryManager, VirtualMemory};
use ic_stable_structures::{storable::Bound, DefaultMemoryImpl, StableCell, Storable};
use pool_core::pool::Pool;
use std::borrow::Cow;
use std::cell::RefCell;

pub type Memory = VirtualMemory<DefaultMemoryImpl>;

const POOL_MEMORY_ID: u8 = 0;

struct StorablePool(Pool);

impl Storable for StorablePool {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(candid::encode_one(&self.0).expect("failed to encode Pool"))
    }

    fn into_bytes(self) -> Vec<u8> {
        candid::encode_one(&self.0).expect("failed to encode Pool")
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        StorablePool(candid::decode_one(&bytes).expect("failed to decode Pool"))
    }

    // Receiver maps grow with the depositor set; unlike the teacher's
    // fixed-shape `Config`/`PendingWithdrawal` payloads this can't be
    // given a fixed upper bound.
    const BOUND: Bound = Bound::Unbounded;
}

thread_local! {
    pub static MEMORY_MANAGER: RefCell<MemoryManager<DefaultMemoryImpl>> =
        RefCell::new(MemoryManager::init(DefaultMemoryImpl::default()));

    static POOL: RefCell<StableCell<StorablePool, Memory>> = RefCell::new(
        StableCell::init(
            MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(POOL_MEMORY_ID))),
            StorablePool(Pool::new(
                crate::config::CanisterConfig::default().pool_config,
                crate::config::CanisterConfig::default().emergency_config,
            )),
        )
    );
}

/// Runs `f` against the persisted `Pool`, writing back whatever `f`
/// mutated. The closure's return value escapes untouched.
pub fn with_pool<R>(f: impl FnOnce(&mut Pool) -> R) -> R {
    POOL.with(|cell| {
        let mut pool = cell.borrow().get().0.clone();
        let result = f(&mut pool);
        cell.borrow_mut().set(StorablePool(pool));
        result
    })
}

pub fn read_pool<R>(f: impl FnOnce(&Pool) -> R) -> R {
    POOL.with(|cell| f(&cell.borrow().get().0))
}
