//! Orchestrator composing C2–C6: lifecycle (rounds, intermission),
//! receiver registration, emergency/health management. See spec.md §4.6
//! and §5.

use std::collections::{BTreeMap, BTreeSet};

use crate::allocation_book::AllocationBook;
use crate::amount::{safe_max_tvl, Amount};
use crate::capabilities::{ProtocolFeeRecipient, RandomnessOracle, RequestHandle, Vault, WinnerTracker, YieldConnector};
use crate::config::{EmergencyConfig, EmergencyState, PoolConfig};
use crate::draw_engine::{apply_distribution, select_winners, BatchSelectionData, DrawReceipt};
use crate::error::{PoolError, PoolResult};
use crate::events::Event;
use crate::round::Round;
use crate::share_ledger::ShareLedger;
use crate::yield_reconciler::YieldReconciler;
use crate::{ReceiverId, RoundId};

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "candid", derive(candid::CandidType))]
#[derive(Clone, Debug)]
pub struct Pool {
    ledger: ShareLedger,
    book: AllocationBook,
    config: PoolConfig,
    emergency_config: EmergencyConfig,
    emergency_state: EmergencyState,
    emergency_entered_at: Option<u64>,
    consecutive_withdraw_failures: usize,
    receiver_bonus_weight: BTreeMap<ReceiverId, Amount>,
    registered_receiver_list: Vec<ReceiverId>,
    receiver_index: BTreeMap<ReceiverId, usize>,
    sponsor_receivers: BTreeSet<ReceiverId>,
    active_round: Option<Round>,
    next_round_id: RoundId,
    last_completed_round_id: RoundId,
    pending_draw: Option<DrawReceipt>,
    pending_selection: Option<BatchSelectionData>,
    prize_pool: Amount,
    unclaimed_protocol_fee: Amount,
    pending_nft_claims: BTreeMap<ReceiverId, Vec<u64>>,
    next_nft_id: u64,
}

impl Pool {
    pub fn new(config: PoolConfig, emergency_config: EmergencyConfig) -> Self {
        Pool {
            ledger: ShareLedger::new(),
            book: AllocationBook::new(),
            config,
            emergency_config,
            emergency_state: EmergencyState::Normal,
            emergency_entered_at: None,
            consecutive_withdraw_failures: 0,
            receiver_bonus_weight: BTreeMap::new(),
            registered_receiver_list: Vec::new(),
            receiver_index: BTreeMap::new(),
            sponsor_receivers: BTreeSet::new(),
            active_round: None,
            next_round_id: RoundId(1),
            last_completed_round_id: RoundId(0),
            pending_draw: None,
            pending_selection: None,
            prize_pool: Amount::ZERO,
            unclaimed_protocol_fee: Amount::ZERO,
            pending_nft_claims: BTreeMap::new(),
            next_nft_id: 1,
        }
    }

    // ---- accessors ----

    pub fn ledger(&self) -> &ShareLedger {
        &self.ledger
    }

    pub fn book(&self) -> &AllocationBook {
        &self.book
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn emergency_state(&self) -> EmergencyState {
        self.emergency_state
    }

    pub fn consecutive_withdraw_failures(&self) -> usize {
        self.consecutive_withdraw_failures
    }

    pub fn active_round(&self) -> Option<&Round> {
        self.active_round.as_ref()
    }

    pub fn last_completed_round_id(&self) -> RoundId {
        self.last_completed_round_id
    }

    pub fn prize_pool(&self) -> Amount {
        self.prize_pool
    }

    pub fn unclaimed_protocol_fee(&self) -> Amount {
        self.unclaimed_protocol_fee
    }

    pub fn pending_selection(&self) -> Option<&BatchSelectionData> {
        self.pending_selection.as_ref()
    }

    pub fn pending_draw(&self) -> Option<&DrawReceipt> {
        self.pending_draw.as_ref()
    }

    pub fn registered_receivers(&self) -> &[ReceiverId] {
        &self.registered_receiver_list
    }

    pub fn is_sponsor(&self, receiver: ReceiverId) -> bool {
        self.sponsor_receivers.contains(&receiver)
    }

    pub fn pending_nft_claims(&self, receiver: ReceiverId) -> &[u64] {
        self.pending_nft_claims.get(&receiver).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn set_receiver_bonus_weight(&mut self, receiver: ReceiverId, weight: Amount) {
        if weight.is_zero() {
            self.receiver_bonus_weight.remove(&receiver);
        } else {
            self.receiver_bonus_weight.insert(receiver, weight);
        }
    }

    pub fn mark_sponsor(&mut self, receiver: ReceiverId) {
        self.sponsor_receivers.insert(receiver);
    }

    // ---- health & emergency (spec.md §4.6) ----

    /// `0.5` if the venue balance covers `allocated_rewards` by
    /// `min_balance_threshold`, plus `0.5 / (1 + consecutive_failures)`.
    pub fn health_score(&self, venue_balance: Amount) -> f64 {
        let required = self
            .book
            .allocated_rewards
            .mul_div_u64((self.emergency_config.min_balance_threshold * 1_000_000.0) as u64, 1_000_000)
            .unwrap_or(Amount::MAX);
        let balance_component = if venue_balance >= required { 0.5 } else { 0.0 };
        let failure_component = 0.5 / (1.0 + self.consecutive_withdraw_failures as f64);
        balance_component + failure_component
    }

    pub fn maybe_auto_trigger_emergency(&mut self, venue_balance: Amount, now: u64) -> Option<Event> {
        if self.emergency_state != EmergencyState::Normal {
            return None;
        }
        let health = self.health_score(venue_balance);
        if health < self.emergency_config.min_yield_source_health
            || self.consecutive_withdraw_failures >= self.emergency_config.max_withdraw_failures
        {
            let from = format!("{:?}", self.emergency_state);
            self.emergency_state = EmergencyState::Emergency;
            self.emergency_entered_at = Some(now);
            return Some(Event::EmergencyStateChanged { from, to: "Emergency".to_string() });
        }
        None
    }

    pub fn maybe_auto_recover(&mut self, venue_balance: Amount, now: u64) -> Option<Event> {
        if self.emergency_state != EmergencyState::Emergency || !self.emergency_config.auto_recovery_enabled {
            return None;
        }
        let health = self.health_score(venue_balance);
        let duration_elapsed = self
            .emergency_entered_at
            .map(|entered| now.saturating_sub(entered) >= self.emergency_config.max_emergency_duration.unwrap_or(u64::MAX))
            .unwrap_or(false);

        let should_recover = health >= 0.9 || (duration_elapsed && health >= self.emergency_config.min_recovery_health);
        if should_recover {
            self.emergency_state = EmergencyState::Normal;
            self.emergency_entered_at = None;
            self.consecutive_withdraw_failures = 0;
            return Some(Event::EmergencyStateChanged { from: "Emergency".to_string(), to: "Normal".to_string() });
        }
        None
    }

    /// Administrative reset; also clears the failure counter per spec.md §5.
    pub fn set_emergency_state(&mut self, state: EmergencyState) -> Event {
        let from = format!("{:?}", self.emergency_state);
        self.emergency_state = state;
        if state == EmergencyState::Normal {
            self.consecutive_withdraw_failures = 0;
            self.emergency_entered_at = None;
        }
        Event::EmergencyStateChanged { from, to: format!("{:?}", state) }
    }

    // ---- receiver registration ----

    fn register_receiver(&mut self, receiver: ReceiverId) -> Option<Event> {
        if self.receiver_index.contains_key(&receiver) {
            return None;
        }
        self.receiver_index.insert(receiver, self.registered_receiver_list.len());
        self.registered_receiver_list.push(receiver);
        Some(Event::ReceiverRegistered { receiver })
    }

    fn deregister_if_empty(&mut self, receiver: ReceiverId) -> Option<Event> {
        if !self.ledger.shares_of(receiver).is_zero() {
            return None;
        }
        if self.pending_draw.is_some() {
            return None;
        }
        let idx = *self.receiver_index.get(&receiver)?;
        let last_idx = self.registered_receiver_list.len() - 1;
        self.registered_receiver_list.swap(idx, last_idx);
        self.registered_receiver_list.pop();
        self.receiver_index.remove(&receiver);
        if idx < self.registered_receiver_list.len() {
            let moved = self.registered_receiver_list[idx];
            self.receiver_index.insert(moved, idx);
        }
        Some(Event::ReceiverDeregistered { receiver })
    }

    // ---- deposit / withdraw (spec.md §4.6) ----

    pub fn deposit(
        &mut self,
        receiver: ReceiverId,
        amount: Amount,
        now: u64,
        is_sponsor: bool,
        connector: &mut impl YieldConnector,
    ) -> PoolResult<(Amount, Vec<Event>)> {
        let mut events = Vec::new();

        if amount.is_zero() {
            return Err(PoolError::ZeroAmount);
        }
        if !self.emergency_state.deposits_allowed() {
            return Err(PoolError::DepositsDisabledInEmergency);
        }
        let would_be = self.ledger.total_assets().checked_add(amount).ok_or(PoolError::Overflow)?;
        if would_be > safe_max_tvl() {
            return Err(PoolError::TvlCapExceeded { would_be, cap: safe_max_tvl() });
        }
        if self.emergency_state == EmergencyState::Normal && amount < self.config.minimum_deposit {
            return Err(PoolError::BelowMinimumDeposit { amount, minimum: self.config.minimum_deposit });
        }
        if self.emergency_state == EmergencyState::Partial {
            if let Some(limit) = self.emergency_config.partial_mode_deposit_limit {
                if amount > limit {
                    return Err(PoolError::TvlCapExceeded { would_be: amount, cap: limit });
                }
            }
        }

        events.extend(self.reconcile(&*connector, now)?);

        // The external transfer is the one step spec.md §7 classifies as
        // fatal-and-reverting; run it before any ledger/round/registration
        // mutation so a refusal here leaves `self` exactly as it was.
        let mut vault = Vault::new(amount);
        connector.deposit_capacity(&mut vault)?;
        if !vault.balance().is_zero() {
            return Err(PoolError::YieldSinkRefusedDeposit { remaining: vault.balance() });
        }

        if is_sponsor {
            self.sponsor_receivers.insert(receiver);
        } else if let Some(event) = self.register_receiver(receiver) {
            events.push(event);
        }

        let old_shares = self.ledger.shares_of(receiver);
        let shares_minted = self.ledger.deposit(receiver, amount)?;
        let new_shares = self.ledger.shares_of(receiver);

        if !is_sponsor {
            if let Some(round) = self.active_round.as_mut() {
                round.record_share_change(receiver, old_shares, new_shares, now)?;
            }
        }

        events.push(Event::Deposited { receiver, amount, shares_minted });
        Ok((shares_minted, events))
    }

    pub fn withdraw(
        &mut self,
        receiver: ReceiverId,
        amount: Amount,
        now: u64,
        connector: &mut impl YieldConnector,
    ) -> PoolResult<(Amount, Vec<Event>)> {
        let mut events = Vec::new();

        if !self.emergency_state.withdrawals_allowed() {
            return Err(PoolError::PoolPaused);
        }

        events.extend(self.reconcile(&*connector, now)?);

        let user_value = self.ledger.user_asset_value(receiver);
        if user_value.is_zero() {
            return Err(PoolError::NoShares(receiver));
        }
        if amount > user_value {
            return Err(PoolError::InsufficientBalance { requested: amount, available: user_value });
        }

        // Mirror ShareLedger::withdraw's own full-burn decision so the
        // liquidity check below sees the amount that will actually be
        // debited, not the smaller partial request.
        let user_shares = self.ledger.shares_of(receiver);
        let shares_to_burn = self.ledger.convert_to_shares(amount);
        let residual = user_value.saturating_sub(amount);
        let full_burn = amount >= user_value
            || shares_to_burn > user_shares
            || (!residual.is_zero() && residual < self.config.dust_threshold);
        let requested = if full_burn { user_value } else { amount };

        // spec.md classifies an illiquid venue as non-fatal: the call
        // reports the shortfall as an event and returns zero moved,
        // rather than erroring out (contrast the deposit path's
        // fatal-and-reverting `YieldSinkRefusedDeposit`).
        let available = connector.available();
        if available < requested {
            self.consecutive_withdraw_failures += 1;
            events.push(Event::WithdrawalFailed { receiver, requested, available });
            return Ok((Amount::ZERO, events));
        }

        let old_shares = self.ledger.shares_of(receiver);
        let actual = self.ledger.withdraw(receiver, requested, self.config.dust_threshold)?;
        let new_shares = self.ledger.shares_of(receiver);

        if let Some(round) = self.active_round.as_mut() {
            round.record_share_change(receiver, old_shares, new_shares, now)?;
        }
        if let Some(event) = self.deregister_if_empty(receiver) {
            events.push(event);
        }

        let vault = connector.withdraw_available(actual);
        self.consecutive_withdraw_failures = 0;
        events.push(Event::Withdrawn { receiver, requested: amount, actual: vault.balance() });
        Ok((vault.balance(), events))
    }

    /// Admin-sponsored direct funding of the rewards bucket. Per spec.md
    /// §9's open question, this re-invokes `accrue_yield` immediately and
    /// preserves the same virtual-share dust routing to the protocol fee
    /// bucket as the normal reconcile path, even though no external
    /// balance changed.
    pub fn fund_rewards_directly(&mut self, amount: Amount) -> PoolResult<Vec<Event>> {
        let mut events = Vec::new();
        let (actual, dust) = self.ledger.accrue_yield(amount)?;
        self.book.allocated_rewards = self.book.allocated_rewards.checked_add(actual).ok_or(PoolError::Overflow)?;
        self.book.allocated_protocol_fee = self.book.allocated_protocol_fee.checked_add(dust).ok_or(PoolError::Overflow)?;
        events.push(Event::YieldAccrued { actual, dust });
        Ok(events)
    }

    /// Reconciles accrued yield, then runs the §4.6 emergency state
    /// machine against the same freshly-observed venue balance: a pool
    /// that just reconciled into bad health auto-trips into `Emergency`,
    /// and one already there auto-recovers once health and/or elapsed
    /// time clear the configured bar. Every state-mutating entry point
    /// routes through here so neither check is reachable only from a
    /// dedicated heartbeat.
    fn reconcile(&mut self, connector: &impl YieldConnector, now: u64) -> PoolResult<Vec<Event>> {
        let mut reconciler = YieldReconciler::new(&mut self.book, &mut self.ledger, self.config.distribution_strategy);
        let mut events = reconciler.reconcile(connector)?;

        let venue_balance = connector.available();
        if let Some(event) = self.maybe_auto_trigger_emergency(venue_balance, now) {
            events.push(event);
        } else if let Some(event) = self.maybe_auto_recover(venue_balance, now) {
            events.push(event);
        }
        Ok(events)
    }

    // ---- round lifecycle (spec.md §4.5, §4.2) ----

    pub fn start_next_round(&mut self, now: u64) -> PoolResult<Event> {
        if self.active_round.is_some() {
            return Err(PoolError::ActiveRoundAlreadyExists);
        }
        let round_id = self.next_round_id;
        self.next_round_id = RoundId(round_id.0 + 1);
        let target_end_time = now.saturating_add(self.config.draw_interval_seconds);
        self.active_round = Some(Round::new(round_id, now, target_end_time));
        Ok(Event::RoundStarted { round_id, start_time: now, target_end_time })
    }

    pub fn set_round_target_end_time(&mut self, new_target: u64, now: u64) -> PoolResult<Event> {
        let round = self.active_round.as_mut().ok_or(PoolError::NoActiveRound)?;
        round.set_target_end_time(new_target, now)?;
        Ok(Event::RoundTargetEndChanged { round_id: round.round_id, new_target })
    }

    // ---- draw phase 1 (spec.md §4.5) ----

    #[allow(clippy::too_many_arguments)]
    pub fn start_draw(
        &mut self,
        now: u64,
        connector: &mut impl YieldConnector,
        oracle: &mut impl RandomnessOracle,
        fee_recipient: Option<&mut dyn ProtocolFeeRecipient>,
    ) -> PoolResult<Vec<Event>> {
        if !self.emergency_state.draws_allowed() {
            return Err(PoolError::DrawsRequireNormalState);
        }
        if self.pending_draw.is_some() {
            return Err(PoolError::DrawAlreadyInProgress);
        }
        let target_end_time = {
            let round = self.active_round.as_ref().ok_or(PoolError::NoActiveRound)?;
            round.target_end_time
        };
        if target_end_time > now {
            return Err(PoolError::DrawNotYetDue);
        }

        let mut events = self.reconcile(&*connector, now)?;

        let prize_amount = self.book.allocated_prize_yield;
        if prize_amount.is_zero() {
            return Err(PoolError::EmptyPrizePool);
        }
        let fee_amount = self.book.allocated_protocol_fee;

        let round_id = {
            let round = self.active_round.as_mut().expect("checked above");
            round.finalize_at(now)?;
            round.round_id
        };

        let snapshot_count = self.registered_receiver_list.len();
        self.pending_selection = Some(BatchSelectionData::new(snapshot_count));
        self.book.allocated_prize_yield = Amount::ZERO;
        self.book.allocated_protocol_fee = Amount::ZERO;

        let prize_vault = connector.withdraw_available(prize_amount);
        self.prize_pool = self.prize_pool.checked_add(prize_vault.balance()).ok_or(PoolError::Overflow)?;

        let fee_vault = connector.withdraw_available(fee_amount);
        let fee_collected = fee_vault.balance();
        let forwarded = match fee_recipient {
            Some(recipient) => recipient.forward(fee_collected).is_ok(),
            None => false,
        };
        if !forwarded {
            self.unclaimed_protocol_fee = self.unclaimed_protocol_fee.checked_add(fee_collected).ok_or(PoolError::Overflow)?;
        }

        let handle = oracle.request();
        self.pending_draw = Some(DrawReceipt {
            prize_amount: self.prize_pool,
            randomness_request_id: handle.request_id,
            commit_block: handle.commit_block,
        });

        events.push(Event::DrawStarted { round_id, prize_amount: self.prize_pool, snapshot_count });
        Ok(events)
    }

    // ---- draw phase 2 ----

    pub fn process_batch(&mut self, limit: usize, _now: u64) -> PoolResult<(usize, Vec<Event>)> {
        let round_end = {
            let round = self.active_round.as_ref().ok_or(PoolError::NoDrawInProgress)?;
            round.actual_end_time.ok_or(PoolError::NoDrawInProgress)?
        };
        if self.pending_draw.is_none() {
            return Err(PoolError::NoDrawInProgress);
        }
        let round_id = self.active_round.as_ref().unwrap().round_id;

        let (start, snapshot_count) = {
            let batch = self.pending_selection.as_ref().ok_or(PoolError::NoDrawInProgress)?;
            (batch.cursor, batch.snapshot_count)
        };
        if start >= snapshot_count {
            return Ok((0, Vec::new()));
        }
        let end = (start + limit).min(snapshot_count);

        let mut weight_warning = false;
        for i in start..end {
            let receiver = self.registered_receiver_list[i];
            let current_shares = self.ledger.shares_of(receiver);
            let w_twab = self
                .active_round
                .as_ref()
                .unwrap()
                .finalize_twab(receiver, current_shares, round_end);
            let w_bonus = self.receiver_bonus_weight.get(&receiver).copied().unwrap_or(Amount::ZERO);
            let weight = w_twab.checked_add(w_bonus).ok_or(PoolError::Overflow)?;
            let batch = self.pending_selection.as_mut().unwrap();
            if batch.push(receiver, weight)? {
                weight_warning = true;
            }
        }

        let batch = self.pending_selection.as_ref().unwrap();
        let remaining = batch.remaining();
        let mut events = vec![Event::BatchProcessed { round_id, processed: end - start, remaining, total_weight: batch.total_weight }];
        if weight_warning {
            events.push(Event::WeightWarning { round_id, total_weight: batch.total_weight });
        }
        Ok((remaining, events))
    }

    // ---- draw phase 3 ----

    pub fn complete_draw(
        &mut self,
        current_block: u64,
        oracle: &mut impl RandomnessOracle,
        tracker: &mut impl WinnerTracker,
        connector: &mut impl YieldConnector,
        now: u64,
    ) -> PoolResult<Vec<Event>> {
        let receipt = self.pending_draw.as_ref().ok_or(PoolError::NoDrawInProgress)?;
        let batch = self.pending_selection.as_ref().ok_or(PoolError::NoDrawInProgress)?;
        if !batch.is_complete() {
            return Err(PoolError::BatchNotComplete { remaining: batch.remaining() });
        }
        let handle = RequestHandle { request_id: receipt.randomness_request_id, commit_block: receipt.commit_block };
        let seed = oracle.fulfill(handle, current_block)?;

        let receipt = self.pending_draw.take().expect("checked above");
        let batch = self.pending_selection.take().expect("checked above");
        let round = self.active_round.take().ok_or(PoolError::NoDrawInProgress)?;

        let winner_count = self.config.prize_distribution.winner_count();
        let winners = select_winners(&batch, winner_count, seed);
        let applied = apply_distribution(&winners, receipt.prize_amount, &self.config.prize_distribution)?;

        let mut winner_ids = Vec::with_capacity(applied.len());
        let mut amounts = Vec::with_capacity(applied.len());

        for (receiver, amount, nft_count) in applied {
            self.prize_pool = self.prize_pool.checked_sub(amount).ok_or(PoolError::Underflow)?;

            let old_shares = self.ledger.shares_of(receiver);
            self.ledger.deposit(receiver, amount)?;
            let new_shares = self.ledger.shares_of(receiver);

            let mut vault = Vault::new(amount);
            connector.deposit_capacity(&mut vault)?;
            if !vault.balance().is_zero() {
                return Err(PoolError::YieldSinkRefusedDeposit { remaining: vault.balance() });
            }

            // Per spec.md §9: at intermission (no active round yet) there
            // is nowhere to accrue further share-time, so this is a no-op
            // until `start_next_round` runs.
            if let Some(active) = self.active_round.as_mut() {
                active.record_share_change(receiver, old_shares, new_shares, now)?;
            }

            if nft_count > 0 {
                let ids: Vec<u64> = (0..nft_count).map(|_| {
                    let id = self.next_nft_id;
                    self.next_nft_id += 1;
                    id
                }).collect();
                tracker.record_winner(0, round.round_id.0, receiver, amount, &ids);
                self.pending_nft_claims.entry(receiver).or_default().extend(ids);
            } else {
                tracker.record_winner(0, round.round_id.0, receiver, amount, &[]);
            }

            winner_ids.push(receiver);
            amounts.push(amount);
        }

        self.last_completed_round_id = round.round_id;

        Ok(vec![Event::DrawCompleted { round_id: round.round_id, winners: winner_ids, amounts }])
    }
}
