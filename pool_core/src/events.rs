//! Structured events emitted by every state-mutating operation, mirroring
//! the teacher's `AuditEntry`/`AuditEventType` pattern
//! (`dice_backend/src/defi_accounting/accounting.rs`). `pool_core` is
//! IC-agnostic, so events are collected into an in-memory buffer and
//! drained by the canister once per call instead of being pushed
//! straight into a `StableVec`.

use crate::amount::Amount;
use crate::{ReceiverId, RoundId};

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "candid", derive(candid::CandidType))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Deposited { receiver: ReceiverId, amount: Amount, shares_minted: Amount },
    Withdrawn { receiver: ReceiverId, requested: Amount, actual: Amount },
    WithdrawalFailed { receiver: ReceiverId, requested: Amount, available: Amount },
    YieldAccrued { actual: Amount, dust: Amount },
    LossSocialized { amount: Amount },
    Reconciled { rewards: Amount, prize: Amount, fee: Amount },
    InsolvencyDetected { unreconciled: Amount },
    RoundStarted { round_id: RoundId, start_time: u64, target_end_time: u64 },
    RoundTargetEndChanged { round_id: RoundId, new_target: u64 },
    DrawStarted { round_id: RoundId, prize_amount: Amount, snapshot_count: usize },
    BatchProcessed { round_id: RoundId, processed: usize, remaining: usize, total_weight: Amount },
    WeightWarning { round_id: RoundId, total_weight: Amount },
    DrawCompleted { round_id: RoundId, winners: Vec<ReceiverId>, amounts: Vec<Amount> },
    EmergencyStateChanged { from: String, to: String },
    ReceiverRegistered { receiver: ReceiverId },
    ReceiverDeregistered { receiver: ReceiverId },
}
