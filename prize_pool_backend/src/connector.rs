//! `YieldConnector` over an ICRC-2 ledger canister (the "external yield
//! venue" of spec.md §1 — an ICRC-2 token already accruing yield
//! elsewhere, e.g. a lending-protocol receipt token).
//!
//! The trait's methods are synchronous (the core has no async runtime
//! dependency), but moving real tokens is necessarily an inter-canister
//! `await`. The same split `dice_backend/src/defi_accounting/accounting.rs`
//! uses for outbound ICP transfers is used here: `withdraw_available`
//! optimistically debits a cached balance and queues the real transfer;
//! a periodic timer (`pump_pending_transfers`, started in `lib.rs`)
//! drains the queue and retries on `Uncertain` failures exactly as
//! `process_pending_withdrawals` does, while `Definite` failures credit
//! the cached balance back so the connector never reports money it no
//! longer has queued to move.
//!
//! A second timer (`refresh_cached_balance`) pulls the canister's real
//! `icrc1_balance_of` reading, the same "`CACHED_CANISTER_BALANCE`
//! refreshed via heartbeat" shape `accounting.rs::refresh_canister_balance`
//! uses — without it the cached balance only ever reflects this
//! canister's own `deposit`/`withdraw` bookkeeping and could never show
//! yield accruing directly to the canister's ledger account.

use candid::{CandidType, Deserialize, Nat, Principal};
use ic_cdk::api::call::RejectionCode;
use ic_stable_structures::memory_manager::MemoryId;
use ic_stable_structures::{storable::Bound, StableCell, StableVec, Storable};
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use pool_core::amount::Amount;
use pool_core::capabilities::{Vault, YieldConnector};
use pool_core::error::{PoolError, PoolResult};
use serde::Serialize;
use std::borrow::Cow;
use std::cell::RefCell;

use crate::storage::{Memory, MEMORY_MANAGER};

const CACHED_BALANCE_MEMORY_ID: u8 = 3;
const PENDING_TRANSFERS_MEMORY_ID: u8 = 4;

#[derive(Clone, Copy, CandidType, Deserialize, Serialize, Debug, Default)]
struct CachedBalance(u64);

impl Storable for CachedBalance {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(candid::encode_one(self).unwrap())
    }
    fn into_bytes(self) -> Vec<u8> {
        candid::encode_one(self).unwrap()
    }
    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        candid::decode_one(&bytes).unwrap()
    }
    const BOUND: Bound = Bound::Bounded { max_size: 16, is_fixed_size: true };
}

#[derive(Clone, CandidType, Deserialize, Serialize, Debug)]
struct PendingTransfer {
    to: Principal,
    raw_amount: u64,
    retries: u8,
}

impl Storable for PendingTransfer {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(candid::encode_one(self).unwrap())
    }
    fn into_bytes(self) -> Vec<u8> {
        candid::encode_one(self).unwrap()
    }
    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        candid::decode_one(&bytes).unwrap()
    }
    const BOUND: Bound = Bound::Bounded { max_size: 128, is_fixed_size: false };
}

#[derive(CandidType, Deserialize)]
struct Account {
    owner: Principal,
    subaccount: Option<Vec<u8>>,
}

#[derive(CandidType, Deserialize)]
struct TransferArg {
    from_subaccount: Option<Vec<u8>>,
    to: Account,
    amount: Nat,
    fee: Option<Nat>,
    memo: Option<Vec<u8>>,
    created_at_time: Option<u64>,
}

#[derive(CandidType, Deserialize, Debug)]
enum TransferError {
    BadFee { expected_fee: Nat },
    BadBurn { min_burn_amount: Nat },
    InsufficientFunds { balance: Nat },
    TooOld,
    CreatedInFuture { ledger_time: u64 },
    Duplicate { duplicate_of: Nat },
    TemporarilyUnavailable,
    GenericError { error_code: Nat, message: String },
}

#[derive(CandidType, Deserialize)]
struct TransferFromArgs {
    spender_subaccount: Option<Vec<u8>>,
    from: Account,
    to: Account,
    amount: Nat,
    fee: Option<Nat>,
    memo: Option<Vec<u8>>,
    created_at_time: Option<u64>,
}

#[derive(CandidType, Deserialize, Debug)]
enum TransferFromError {
    BadFee { expected_fee: Nat },
    BadBurn { min_burn_amount: Nat },
    InsufficientFunds { balance: Nat },
    InsufficientAllowance { allowance: Nat },
    TooOld,
    CreatedInFuture { ledger_time: u64 },
    Duplicate { duplicate_of: Nat },
    TemporarilyUnavailable,
    GenericError { error_code: Nat, message: String },
}

const MAX_TRANSFER_RETRIES: u8 = 10;

thread_local! {
    static CACHED_BALANCE: RefCell<StableCell<CachedBalance, Memory>> = RefCell::new(
        StableCell::init(
            MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(CACHED_BALANCE_MEMORY_ID))),
            CachedBalance::default(),
        )
    );

    static PENDING_TRANSFERS: RefCell<StableVec<PendingTransfer, Memory>> = RefCell::new(
        StableVec::init(MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(PENDING_TRANSFERS_MEMORY_ID))))
    );
}

fn read_cached() -> Amount {
    CACHED_BALANCE.with(|c| Amount::from_raw(c.borrow().get().0))
}

fn write_cached(amount: Amount) {
    CACHED_BALANCE.with(|c| { c.borrow_mut().set(CachedBalance(amount.raw())); });
}

fn queue_transfer(to: Principal, amount: Amount) {
    PENDING_TRANSFERS.with(|q| {
        q.borrow_mut()
            .push(&PendingTransfer { to, raw_amount: amount.raw(), retries: 0 })
    });
}

/// `pool_core::capabilities::YieldConnector` backed by the canister's
/// cached ledger balance. `minimum_available` deliberately under-reports
/// while transfers are in flight out (`queue_transfer`'s debit already
/// happened), matching the trait's "may under-report" contract.
pub struct LedgerConnector;

impl YieldConnector for LedgerConnector {
    fn deposit_capacity(&mut self, vault: &mut Vault) -> PoolResult<()> {
        // The inbound ICRC-2 transfer_from already completed in the
        // `#[update] deposit` handler before `Pool::deposit` runs (see
        // lib.rs); this only reflects that credit into the cached total.
        let amount = vault.drain();
        let new_balance = read_cached().checked_add(amount).ok_or(PoolError::Overflow)?;
        write_cached(new_balance);
        Ok(())
    }

    fn minimum_capacity(&self) -> Amount {
        Amount::MAX
    }

    fn minimum_available(&self) -> Amount {
        read_cached()
    }

    fn withdraw_available(&mut self, max: Amount) -> Vault {
        let available = read_cached();
        let taken = max.min(available);
        write_cached(available.saturating_sub(taken));
        Vault::new(taken)
    }
}

/// Issues the actual ICRC-2 transfer for a withdrawal that `Pool`
/// already debited from its own ledger. Queued rather than awaited
/// inline so a single `#[update]` call never blocks on ledger latency
/// for a multi-winner draw's full payout round.
pub fn queue_outbound_transfer(to: Principal, amount: Amount) {
    queue_transfer(to, amount);
}

/// Pulls `amount` from `from`'s ledger balance into the canister's own
/// account via ICRC-2 `icrc2_transfer_from`. Called from the
/// `#[update] deposit` handler before `Pool::deposit` runs, so a caller
/// without a standing allowance fails the whole call instead of minting
/// shares for funds that never moved. Does not touch the cached venue
/// balance itself — `Pool::deposit`'s own call to `deposit_capacity`
/// credits it once the deposit is accepted.
pub async fn queue_outbound_transfer_in(from: Principal, amount: Amount) -> Result<(), String> {
    let ledger = crate::config::get().ledger_canister;
    let arg = TransferFromArgs {
        spender_subaccount: None,
        from: Account { owner: from, subaccount: None },
        to: Account { owner: ic_cdk::id(), subaccount: None },
        amount: Nat::from(amount.raw()),
        fee: None,
        memo: None,
        created_at_time: None,
    };

    let result: Result<(Result<Nat, TransferFromError>,), (RejectionCode, String)> =
        ic_cdk::call(ledger, "icrc2_transfer_from", (arg,)).await;

    match result {
        Ok((Ok(_block_index),)) => Ok(()),
        Ok((Err(e),)) => Err(format!("{:?}", e)),
        Err((code, msg)) => Err(format!("{:?}: {}", code, msg)),
    }
}

async fn attempt_transfer(ledger: Principal, to: Principal, raw_amount: u64) -> Result<(), TransferError> {
    let arg = TransferArg {
        from_subaccount: None,
        to: Account { owner: to, subaccount: None },
        amount: Nat::from(raw_amount),
        fee: None,
        memo: None,
        created_at_time: None,
    };

    let result: Result<(Result<Nat, TransferError>,), (RejectionCode, String)> =
        ic_cdk::call(ledger, "icrc1_transfer", (arg,)).await;

    match result {
        Ok((Ok(_block_index),)) => Ok(()),
        Ok((Err(e),)) => Err(e),
        Err((code, msg)) => Err(TransferError::GenericError { error_code: Nat::from(0u64), message: format!("{:?}: {}", code, msg) }),
    }
}

/// Drains the outbound transfer queue, one attempt per pending entry
/// per call. Started as a periodic `ic_cdk_timers` timer in `lib.rs`,
/// the same "`start_parent_withdrawal_timer`" shape `crash_backend` uses.
pub async fn pump_pending_transfers(ledger: Principal) {
    let pending: Vec<(u64, PendingTransfer)> =
        PENDING_TRANSFERS.with(|q| q.borrow().iter().enumerate().map(|(i, t)| (i as u64, t)).collect());

    for (index, transfer) in pending {
        match attempt_transfer(ledger, transfer.to, transfer.raw_amount).await {
            Ok(()) => remove_pending(index),
            Err(TransferError::TemporarilyUnavailable) => bump_retry(index, transfer),
            Err(_definite) => {
                // Credit the amount back to the venue balance: the
                // outbound leg never completed.
                let restored = read_cached().checked_add(Amount::from_raw(transfer.raw_amount)).unwrap_or(Amount::MAX);
                write_cached(restored);
                remove_pending(index);
            }
        }
    }
}

fn nat_to_u64(n: &Nat) -> Option<u64> {
    let magnitude: &BigUint = &n.0;
    magnitude.to_u64()
}

/// Pulls the canister's real ICRC-1 balance and overwrites the cached
/// venue balance with it. The cached figure otherwise only ever moves
/// via this canister's own `deposit_capacity`/`withdraw_available`
/// calls, so without this it can never reflect yield the ledger
/// accrues directly to the canister's own account. Started as a
/// periodic `ic_cdk_timers` timer in `lib.rs`, separate from
/// `pump_pending_transfers`'s transfer-queue drain.
pub async fn refresh_cached_balance(ledger: Principal) {
    let account = Account { owner: ic_cdk::id(), subaccount: None };
    let result: Result<(Nat,), (RejectionCode, String)> =
        ic_cdk::call(ledger, "icrc1_balance_of", (account,)).await;
    match result {
        Ok((balance,)) => {
            if let Some(raw) = nat_to_u64(&balance) {
                write_cached(Amount::from_raw(raw));
            }
        }
        Err(_) => {
            // Balance stays stale until the next tick; the cached figure
            // already under-reports safely in the meantime.
        }
    }
}

fn remove_pending(index: u64) {
    PENDING_TRANSFERS.with(|q| {
        let mut q = q.borrow_mut();
        if index < q.len() {
            // `StableVec` has no remove-by-index; swap-remove via
            // pop+set keeps amortized O(1) at the cost of reordering,
            // harmless since entries carry no positional meaning.
            let last = q.len() - 1;
            if index != last {
                if let Some(last_item) = q.get(last) {
                    q.set(index, &last_item);
                }
            }
            let _ = q.pop();
        }
    });
}

fn bump_retry(index: u64, mut transfer: PendingTransfer) {
    transfer.retries += 1;
    if transfer.retries >= MAX_TRANSFER_RETRIES {
        let restored = read_cached().checked_add(Amount::from_raw(transfer.raw_amount)).unwrap_or(Amount::MAX);
        write_cached(restored);
        remove_pending(index);
        return;
    }
    PENDING_TRANSFERS.with(|q| q.borrow_mut().set(index, &transfer));
}
