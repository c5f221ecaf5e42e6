//! Canister wiring for the prize-linked savings pool engine. Owns
//! stable storage for a [`pool_core::pool::Pool`], exposes its
//! operations as `#[update]`/`#[query]` entry points, and supplies the
//! three external capabilities the core depends on: an ICRC-2 ledger
//! ([`connector::LedgerConnector`]), the management canister's VRF
//! ([`oracle::ManagementCanisterOracle`]), and a bounded winner ring
//! ([`tracker::RingWinnerTracker`]).
//!
//! Follows `dice_backend`/`crash_backend`'s shape: one `MemoryManager`
//! partitions stable memory (`storage.rs`), an admin-gated config cell
//! (`config.rs`) sits beside it, a `StableVec` audit log
//! (`audit.rs`) records every emitted [`pool_core::events::Event`], and
//! an `OperationGuard` (`guard.rs`) keeps concurrent calls from the same
//! caller from racing each other across an `await`.

mod audit;
mod config;
mod connector;
mod guard;
mod oracle;
mod storage;
mod tracker;

use candid::Principal;
use ic_cdk::{caller, init, post_upgrade, pre_upgrade, query, update};
use pool_core::capabilities::RequestHandle;
use pool_core::{Amount, ReceiverId};
use std::time::Duration;

use connector::LedgerConnector;
use guard::{GuardedOperation, OperationGuard};
use oracle::ManagementCanisterOracle;
use tracker::RingWinnerTracker;

const BALANCE_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);
const TRANSFER_PUMP_INTERVAL: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Lifecycle hooks
// ---------------------------------------------------------------------------

#[init]
fn init() {
    ic_cdk::println!("prize_pool_backend initialized");
    start_timers();
}

#[pre_upgrade]
fn pre_upgrade() {
    // Every stable structure persists on its own; nothing to snapshot here.
}

#[post_upgrade]
fn post_upgrade() {
    start_timers();
    ic_cdk::println!("prize_pool_backend upgraded");
}

fn start_timers() {
    ic_cdk_timers::set_timer_interval(BALANCE_REFRESH_INTERVAL, || {
        async {
            let ledger = config::get().ledger_canister;
            connector::refresh_cached_balance(ledger).await;
        }
    });
    ic_cdk_timers::set_timer_interval(TRANSFER_PUMP_INTERVAL, || {
        async {
            let ledger = config::get().ledger_canister;
            connector::pump_pending_transfers(ledger).await;
        }
    });
}

// ---------------------------------------------------------------------------
// Depositor entry points (spec.md §4.6)
// ---------------------------------------------------------------------------

#[update]
async fn deposit(amount_raw: u64, is_sponsor: bool) -> Result<u64, String> {
    let receiver = ReceiverId(caller_as_u64());
    let amount = Amount::from_raw(amount_raw);
    let now = ic_cdk::api::time();

    connector::queue_outbound_transfer_in(caller(), amount).await?;

    let result = storage::with_pool(|pool| {
        let mut connector = LedgerConnector;
        pool.deposit(receiver, amount, now, is_sponsor, &mut connector)
    });

    match result {
        Ok((shares_minted, events)) => {
            audit::record(caller(), events);
            Ok(shares_minted.raw())
        }
        Err(e) => Err(e.to_string()),
    }
}

#[update]
async fn withdraw(amount_raw: u64) -> Result<u64, String> {
    let _guard = OperationGuard::new(GuardedOperation::Withdraw)?;
    let receiver = ReceiverId(caller_as_u64());
    let amount = Amount::from_raw(amount_raw);
    let now = ic_cdk::api::time();

    let result = storage::with_pool(|pool| {
        let mut connector = LedgerConnector;
        pool.withdraw(receiver, amount, now, &mut connector)
    });

    match result {
        Ok((actual, events)) => {
            audit::record(caller(), events);
            connector::queue_outbound_transfer(caller(), actual);
            Ok(actual.raw())
        }
        Err(e) => Err(e.to_string()),
    }
}

#[query]
fn get_position(receiver: u64) -> u64 {
    storage::read_pool(|pool| pool.ledger().user_asset_value(ReceiverId(receiver)).raw())
}

#[query]
fn get_pending_nft_claims(receiver: u64) -> Vec<u64> {
    storage::read_pool(|pool| pool.pending_nft_claims(ReceiverId(receiver)).to_vec())
}

#[update]
fn fund_rewards_directly(amount_raw: u64) -> Result<(), String> {
    let amount = Amount::from_raw(amount_raw);
    let events = storage::with_pool(|pool| pool.fund_rewards_directly(amount)).map_err(|e| e.to_string())?;
    audit::record(caller(), events);
    Ok(())
}

#[update]
fn set_receiver_bonus_weight(receiver: u64, weight_raw: u64) -> Result<(), String> {
    config::require_admin()?;
    storage::with_pool(|pool| pool.set_receiver_bonus_weight(ReceiverId(receiver), Amount::from_raw(weight_raw)));
    Ok(())
}

#[update]
fn mark_sponsor(receiver: u64) -> Result<(), String> {
    config::require_admin()?;
    storage::with_pool(|pool| pool.mark_sponsor(ReceiverId(receiver)));
    Ok(())
}

// ---------------------------------------------------------------------------
// Draw lifecycle (spec.md §4.5)
// ---------------------------------------------------------------------------

#[update]
fn start_next_round() -> Result<(), String> {
    config::require_admin()?;
    let now = ic_cdk::api::time();
    storage::with_pool(|pool| pool.start_next_round(now).map(|event| audit::record(caller(), vec![event])))
        .map_err(|e| e.to_string())
}

#[update]
fn set_round_target_end_time(new_target: u64) -> Result<(), String> {
    config::require_admin()?;
    let now = ic_cdk::api::time();
    let event = storage::with_pool(|pool| pool.set_round_target_end_time(new_target, now)).map_err(|e| e.to_string())?;
    audit::record(caller(), vec![event]);
    Ok(())
}

#[update]
fn start_draw() -> Result<(), String> {
    config::require_admin()?;
    let now = ic_cdk::api::time();
    let events = storage::with_pool(|pool| {
        let mut connector = LedgerConnector;
        let mut oracle = ManagementCanisterOracle;
        pool.start_draw(now, &mut connector, &mut oracle, None)
    })
    .map_err(|e| e.to_string())?;
    audit::record(caller(), events);
    Ok(())
}

#[update]
fn process_batch(limit: u32) -> Result<u64, String> {
    let _guard = OperationGuard::new(GuardedOperation::ProcessBatch)?;
    let now = ic_cdk::api::time();
    let (remaining, events) =
        storage::with_pool(|pool| pool.process_batch(limit as usize, now)).map_err(|e| e.to_string())?;
    audit::record(caller(), events);
    Ok(remaining as u64)
}

#[update]
async fn complete_draw() -> Result<(), String> {
    config::require_admin()?;
    let current_block = ic_cdk::api::time();
    let now = current_block;

    // Resolve real entropy for the pending request before handing it to
    // `Pool::complete_draw`'s synchronous `oracle.fulfill`: the seed is
    // folded into a deterministic oracle so the core never awaits.
    let receipt_handle = storage::read_pool(|pool| {
        pool.pending_draw().map(|r| RequestHandle { request_id: r.randomness_request_id, commit_block: r.commit_block })
    });
    if let Some(handle) = receipt_handle {
        let seed = ManagementCanisterOracle::fulfill_with_entropy(handle, current_block).await.map_err(|e| e.to_string())?;
        let events = storage::with_pool(|pool| {
            let mut connector = LedgerConnector;
            let mut oracle = SeededOracle { seed };
            let mut tracker = RingWinnerTracker;
            pool.complete_draw(current_block, &mut oracle, &mut tracker, &mut connector, now)
        })
        .map_err(|e| e.to_string())?;
        audit::record(caller(), events);
        Ok(())
    } else {
        Err("no draw in progress".to_string())
    }
}

/// Wraps a pre-resolved VRF seed (already fetched via
/// `ManagementCanisterOracle::fulfill_with_entropy`) behind the core's
/// synchronous `RandomnessOracle` trait.
struct SeededOracle {
    seed: u64,
}

impl pool_core::capabilities::RandomnessOracle for SeededOracle {
    fn request(&mut self) -> RequestHandle {
        unreachable!("SeededOracle only ever fulfills an existing request")
    }
    fn fulfill(&mut self, _handle: RequestHandle, _current_block: u64) -> pool_core::PoolResult<u64> {
        Ok(self.seed)
    }
}

#[query]
fn recent_winners(limit: u32) -> Vec<tracker::WinRecord> {
    tracker::recent_winners(limit as usize)
}

// ---------------------------------------------------------------------------
// Admin / config surface
// ---------------------------------------------------------------------------

#[update]
fn set_admin(new_admin: Principal) -> Result<(), String> {
    config::set_admin(new_admin)
}

#[update]
fn set_pool_config(new_config: pool_core::config::PoolConfig) -> Result<(), String> {
    config::set_pool_config(new_config)
}

#[update]
fn set_emergency_config(new_config: pool_core::config::EmergencyConfig) -> Result<(), String> {
    config::set_emergency_config(new_config)
}

#[update]
fn set_ledger_canister(new_ledger: Principal) -> Result<(), String> {
    config::set_ledger_canister(new_ledger)
}

#[update]
fn set_emergency_state(state: pool_core::config::EmergencyState) -> Result<(), String> {
    config::require_admin()?;
    let event = storage::with_pool(|pool| pool.set_emergency_state(state));
    audit::record(caller(), vec![event]);
    Ok(())
}

#[update]
fn withdraw_protocol_fee(to: Principal) -> Result<u64, String> {
    config::require_admin()?;
    let amount = storage::read_pool(|pool| pool.unclaimed_protocol_fee());
    if !amount.is_zero() {
        connector::queue_outbound_transfer(to, amount);
    }
    Ok(amount.raw())
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[query]
fn get_emergency_state() -> pool_core::config::EmergencyState {
    storage::read_pool(|pool| pool.emergency_state())
}

#[query]
fn get_prize_pool() -> u64 {
    storage::read_pool(|pool| pool.prize_pool().raw())
}

#[query]
fn get_audit_log(start: u64, limit: u64) -> Vec<audit::AuditEntry> {
    audit::get_log(start as usize, limit as usize)
}

#[query]
fn get_audit_log_len() -> u64 {
    audit::log_len()
}

fn caller_as_u64() -> u64 {
    // Collapses a `Principal` into the core's opaque `ReceiverId` space
    // by hashing its bytes; the core never interprets the id beyond
    // equality and ordering (spec.md §9).
    let bytes = caller().as_slice().to_vec();
    let mut acc = 0xcbf29ce484222325u64; // FNV-1a offset basis
    for b in bytes {
        acc ^= b as u64;
        acc = acc.wrapping_mul(0x100000001b3);
    }
    acc
}

ic_cdk::export_candid!();
