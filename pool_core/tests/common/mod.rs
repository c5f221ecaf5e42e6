//! Shared fakes for the external capabilities, mirroring the in-module
//! fakes in `pool_core::pool`'s own test suite but usable from the
//! integration test binaries under `tests/`.

use pool_core::capabilities::{RandomnessOracle, RequestHandle, Vault, WinnerTracker, YieldConnector};
use pool_core::config::PoolConfig;
use pool_core::prize_distribution::PrizeDistribution;
use pool_core::yield_reconciler::DistributionStrategy;
use pool_core::{Amount, PoolError, PoolResult, ReceiverId};

pub struct FakeConnector {
    pub balance: Amount,
}

impl FakeConnector {
    pub fn new() -> Self {
        FakeConnector { balance: Amount::ZERO }
    }

    pub fn grow(&mut self, by: Amount) {
        self.balance = self.balance.checked_add(by).unwrap();
    }
}

impl YieldConnector for FakeConnector {
    fn deposit_capacity(&mut self, vault: &mut Vault) -> PoolResult<()> {
        self.balance = self.balance.checked_add(vault.drain()).unwrap();
        Ok(())
    }
    fn minimum_capacity(&self) -> Amount {
        Amount::MAX
    }
    fn minimum_available(&self) -> Amount {
        self.balance
    }
    fn withdraw_available(&mut self, max: Amount) -> Vault {
        let taken = max.min(self.balance);
        self.balance = self.balance.saturating_sub(taken);
        Vault::new(taken)
    }
}

pub struct FakeOracle {
    pub next_id: u64,
    pub seed: u64,
}

impl FakeOracle {
    pub fn new(seed: u64) -> Self {
        FakeOracle { next_id: 0, seed }
    }
}

impl RandomnessOracle for FakeOracle {
    fn request(&mut self) -> RequestHandle {
        self.next_id += 1;
        RequestHandle { request_id: self.next_id, commit_block: 100 }
    }
    fn fulfill(&mut self, handle: RequestHandle, current_block: u64) -> PoolResult<u64> {
        if current_block <= handle.commit_block {
            return Err(PoolError::RandomnessNotYetFulfillable { commit_block: handle.commit_block, current_block });
        }
        Ok(self.seed)
    }
}

pub struct RecordingTracker {
    pub records: Vec<(u64, u64, ReceiverId, Amount, Vec<u64>)>,
}

impl RecordingTracker {
    pub fn new() -> Self {
        RecordingTracker { records: Vec::new() }
    }
}

impl WinnerTracker for RecordingTracker {
    fn record_winner(&mut self, pool_id: u64, round_id: u64, receiver: ReceiverId, amount: Amount, nft_ids: &[u64]) {
        self.records.push((pool_id, round_id, receiver, amount, nft_ids.to_vec()));
    }
}

pub fn single_winner_config() -> PoolConfig {
    PoolConfig {
        minimum_deposit: Amount::from_raw(1),
        draw_interval_seconds: 1000,
        distribution_strategy: DistributionStrategy::FixedPercentage {
            rewards: Amount::from_raw(Amount::from_units(1).raw() / 2),
            prize: Amount::from_raw(Amount::from_units(1).raw() * 4 / 10),
            fee: Amount::from_raw(Amount::from_units(1).raw() / 10),
        },
        prize_distribution: PrizeDistribution::SingleWinner,
        dust_threshold: Amount::from_raw(Amount::from_units(1).raw() / 10),
    }
}

pub fn r(id: u64) -> ReceiverId {
    ReceiverId(id)
}
