//! External collaborator interfaces (spec.md §6). The core depends only
//! on these traits; concrete implementations (an ICRC ledger, the IC's
//! management-canister randomness, a bounded leaderboard ring buffer)
//! live in the canister crate.

use crate::amount::Amount;
use crate::error::PoolResult;
use crate::ReceiverId;

/// A unit of custody moved between the pool and the external yield
/// venue. `deposit_capacity` must drain it entirely; the caller asserts
/// `vault.balance().is_zero()` afterwards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Vault(Amount);

impl Vault {
    pub fn new(amount: Amount) -> Self {
        Vault(amount)
    }

    pub fn balance(&self) -> Amount {
        self.0
    }

    pub fn take(&mut self, amount: Amount) -> Amount {
        let taken = amount.min(self.0);
        self.0 = self.0.saturating_sub(taken);
        taken
    }

    pub fn drain(&mut self) -> Amount {
        let all = self.0;
        self.0 = Amount::ZERO;
        all
    }
}

/// Sink and source for the external yield-bearing venue.
pub trait YieldConnector {
    /// Deposits the entire vault; must consume it fully.
    fn deposit_capacity(&mut self, vault: &mut Vault) -> PoolResult<()>;
    /// Accepted-more bound, truthful.
    fn minimum_capacity(&self) -> Amount;
    /// Withdrawable bound; may under-report what is actually held.
    fn minimum_available(&self) -> Amount;
    /// Returns up to `max`, possibly less, including zero.
    fn withdraw_available(&mut self, max: Amount) -> Vault;
    /// Current reported available balance, used by the reconciler.
    fn available(&self) -> Amount {
        self.minimum_available()
    }
}

/// Commit-reveal randomness beacon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestHandle {
    pub request_id: u64,
    pub commit_block: u64,
}

pub trait RandomnessOracle {
    fn request(&mut self) -> RequestHandle;
    /// Must be called with a strictly later block than `handle.commit_block`.
    fn fulfill(&mut self, handle: RequestHandle, current_block: u64) -> PoolResult<u64>;
}

/// Optional, ring-buffered, bounded leaderboard.
pub trait WinnerTracker {
    fn record_winner(&mut self, pool_id: u64, round_id: u64, receiver: ReceiverId, amount: Amount, nft_ids: &[u64]);
}

/// No-op tracker for pools configured without one.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullWinnerTracker;

impl WinnerTracker for NullWinnerTracker {
    fn record_winner(&mut self, _pool_id: u64, _round_id: u64, _receiver: ReceiverId, _amount: Amount, _nft_ids: &[u64]) {}
}

/// Destination for the protocol's share of reconciled yield, forwarded
/// at draw start. "Valid" per spec.md §4.5 means `forward` succeeds;
/// a failure routes the amount to `unclaimed_protocol_fee` instead.
pub trait ProtocolFeeRecipient {
    fn forward(&mut self, amount: Amount) -> PoolResult<()>;
}
