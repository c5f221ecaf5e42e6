//! Append-only audit trail. Every state-mutating entry point drains the
//! `Vec<pool_core::events::Event>` its call to `Pool` returned and
//! records each one here, mirroring `accounting.rs`'s
//! `AuditEntry`/`WITHDRAWAL_AUDIT_LOG` pattern but wrapping the core's
//! own event enum instead of a casino-specific one.

use candid::{CandidType, Deserialize, Principal};
use ic_stable_structures::memory_manager::MemoryId;
use ic_stable_structures::{storable::Bound, StableVec, Storable};
use pool_core::events::Event;
use serde::Serialize;
use std::borrow::Cow;
use std::cell::RefCell;

use crate::storage::{Memory, MEMORY_MANAGER};

const AUDIT_LOG_MEMORY_ID: u8 = 2;

#[derive(Clone, CandidType, Deserialize, Serialize, Debug)]
pub struct AuditEntry {
    pub timestamp: u64,
    pub caller: Principal,
    pub event: Event,
}

impl Storable for AuditEntry {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(candid::encode_one(self).expect("failed to encode AuditEntry"))
    }

    fn into_bytes(self) -> Vec<u8> {
        candid::encode_one(self).expect("failed to encode AuditEntry")
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        candid::decode_one(&bytes).expect("failed to decode AuditEntry")
    }

    const BOUND: Bound = Bound::Unbounded;
}

thread_local! {
    static AUDIT_LOG: RefCell<StableVec<AuditEntry, Memory>> = RefCell::new(
        StableVec::init(MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(AUDIT_LOG_MEMORY_ID))))
    );
}

pub fn record(caller: Principal, events: Vec<Event>) {
    let timestamp = ic_cdk::api::time();
    AUDIT_LOG.with(|log| {
        let mut log = log.borrow_mut();
        for event in events {
            ic_cdk::println!("{:?}", event);
            log.push(&AuditEntry { timestamp, caller, event });
        }
    });
}

pub fn get_log(start: usize, limit: usize) -> Vec<AuditEntry> {
    AUDIT_LOG.with(|log| log.borrow().iter().skip(start).take(limit).collect())
}

pub fn log_len() -> u64 {
    AUDIT_LOG.with(|log| log.borrow().len())
}
