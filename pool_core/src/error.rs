//! Typed error taxonomy. Every fallible entry point either commits fully
//! or returns one of these and mutates nothing (see spec §7).

use thiserror::Error;

use crate::amount::Amount;
use crate::ReceiverId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    // ---- Validation ----
    #[error("amount must be greater than zero")]
    ZeroAmount,
    #[error("deposit {amount:?} is below the minimum deposit {minimum:?}")]
    BelowMinimumDeposit { amount: Amount, minimum: Amount },
    #[error("deposit would push total assets to {would_be:?}, exceeding the safe TVL cap {cap:?}")]
    TvlCapExceeded { would_be: Amount, cap: Amount },
    #[error("distribution percentages sum to {actual:?}, not 1.0")]
    PercentagesNotNormalized { actual: Amount },

    // ---- State ----
    #[error("a draw is already in progress")]
    DrawAlreadyInProgress,
    #[error("no draw is in progress")]
    NoDrawInProgress,
    #[error("batch selection is not yet complete: {remaining} receivers left")]
    BatchNotComplete { remaining: usize },
    #[error("round cannot be shortened to end before now")]
    CannotShortenRoundBeforeNow,
    #[error("pool is paused")]
    PoolPaused,
    #[error("deposits are disabled while the pool is in emergency mode")]
    DepositsDisabledInEmergency,
    #[error("draws are only permitted while the pool is in the Normal state")]
    DrawsRequireNormalState,
    #[error("no active round")]
    NoActiveRound,
    #[error("round has not reached its target end time yet")]
    DrawNotYetDue,
    #[error("an active round already exists")]
    ActiveRoundAlreadyExists,

    // ---- Resource ----
    #[error("receiver {0} holds no shares")]
    NoShares(ReceiverId),
    #[error("insufficient balance: requested {requested:?}, available {available:?}")]
    InsufficientBalance { requested: Amount, available: Amount },
    #[error("prize pool is empty")]
    EmptyPrizePool,

    // ---- External ----
    #[error("yield sink refused to accept the full deposit; vault still holds {remaining:?}")]
    YieldSinkRefusedDeposit { remaining: Amount },
    #[error("randomness not yet fulfillable: commit block {commit_block}, current block {current_block}")]
    RandomnessNotYetFulfillable { commit_block: u64, current_block: u64 },

    // ---- Invariant (reported, not necessarily fatal) ----
    #[error("insolvency detected after waterfall: {unreconciled:?} unreconciled")]
    InsolvencyDetected { unreconciled: Amount },

    // ---- Arithmetic ----
    #[error("arithmetic overflow")]
    Overflow,
    #[error("arithmetic underflow")]
    Underflow,
}

pub type PoolResult<T> = Result<T, PoolError>;
