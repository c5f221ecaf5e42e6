//! Per-caller reentrancy guard for the batched draw and withdrawal
//! entry points, where an `await` to the ledger or the management
//! canister gives a second call from the same caller a window to race
//! the first one. Keyed by which of this domain's two guarded
//! operations is in flight, not just whether one is, so a caller
//! blocked mid-withdrawal gets told that specifically instead of a
//! generic "busy" reply.

use candid::Principal;
use std::cell::RefCell;
use std::collections::BTreeMap;

/// The two entry points in `lib.rs` that span an `await` and mutate
/// per-caller or shared draw state: a depositor's own withdrawal, and
/// an admin driving the batched draw forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardedOperation {
    Withdraw,
    ProcessBatch,
}

impl GuardedOperation {
    fn label(self) -> &'static str {
        match self {
            GuardedOperation::Withdraw => "withdraw",
            GuardedOperation::ProcessBatch => "process_batch",
        }
    }
}

thread_local! {
    static PENDING_OPERATIONS: RefCell<BTreeMap<Principal, GuardedOperation>> = RefCell::new(BTreeMap::new());
}

#[derive(Debug)]
pub struct OperationGuard {
    caller: Principal,
}

impl OperationGuard {
    /// Claims the slot for `operation` on behalf of the current caller.
    /// Fails if the caller already has any guarded operation in flight,
    /// naming which one.
    pub fn new(operation: GuardedOperation) -> Result<Self, String> {
        let caller = ic_cdk::caller();

        PENDING_OPERATIONS.with(|ops| {
            let mut ops = ops.borrow_mut();
            if let Some(existing) = ops.get(&caller) {
                return Err(format!("{} already in progress for this caller", existing.label()));
            }
            ops.insert(caller, operation);
            Ok(Self { caller })
        })
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        PENDING_OPERATIONS.with(|ops| {
            ops.borrow_mut().remove(&self.caller);
        });
    }
}
