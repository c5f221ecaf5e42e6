//! Pure prize-linked savings pool engine.
//!
//! This crate has no IC (or any other platform) dependency: it is the
//! share ledger, TWAB rounds, yield reconciliation, and three-phase draw
//! engine described in spec.md, composed by [`pool::Pool`]. A host
//! (the `prize_pool_backend` canister, or a test harness) supplies the
//! three external capabilities — [`capabilities::YieldConnector`],
//! [`capabilities::RandomnessOracle`], [`capabilities::WinnerTracker`] —
//! and owns persistence, transport, and logging.

pub mod allocation_book;
pub mod amount;
pub mod capabilities;
pub mod config;
pub mod draw_engine;
pub mod error;
pub mod events;
pub mod pool;
pub mod prize_distribution;
pub mod round;
pub mod share_ledger;
pub mod yield_reconciler;

pub use amount::Amount;
pub use error::{PoolError, PoolResult};

/// Opaque identifier for a depositor position. Uniqueness is guaranteed
/// by the external collaborator that mints it (spec.md §9); the core
/// only ever treats it as a map key.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "candid", derive(candid::CandidType))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReceiverId(pub u64);

impl std::fmt::Display for ReceiverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "candid", derive(candid::CandidType))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoundId(pub u64);

impl std::fmt::Display for RoundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
