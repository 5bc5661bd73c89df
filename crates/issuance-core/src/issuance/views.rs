//! Read-only views. Nothing here mutates engine state.

use serde::Serialize;

use crate::metrics::EngineMetrics;
use crate::{AccountId, Result};

use super::collaborators::Runtime;
use super::engine::{IssuanceEngine, LedgerStore};
use super::jackpot::JackpotStats;
use super::ledger::{EpochState, UserEpochPosition};
use super::multiplier::{resolve_multiplier, MultiplierBreakdown, StreakRecord};
use super::requests::PendingRequest;
use super::types::{EngineParams, EpochId, GenesisParams, RequestId, Roles};

/// Maximum epochs inspected by one `claimable_epochs` scan.
pub const MAX_CLAIM_SCAN: u64 = 256;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UserDashboard {
    pub current_epoch: EpochId,
    pub position: UserEpochPosition,
    pub epoch_raw_tickets: u64,
    pub epoch_weighted_total: u128,
    /// Current emission of the open epoch (base plus surge bonus so far).
    pub epoch_emission: u128,
    pub multiplier: MultiplierBreakdown,
    pub streak: Option<StreakRecord>,
    pub refund_balance: u128,
    pub pending_requests: usize,
    pub jackpot: JackpotStats,
    pub collateral_pool: u128,
    pub token_pool: u128,
    pub reward_pool: u128,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EpochParamsSnapshot {
    pub current_epoch: EpochId,
    pub epoch_start: u64,
    pub epoch_end: u64,
    pub unit_price: u128,
    pub epoch_ticket_cap: u64,
    pub remaining_capacity: u64,
    /// Collateral locked in unfinalized requests across all users.
    pub pending_collateral: u128,
    pub base_emission: u128,
    pub linear_threshold: u64,
    pub claim_window_epochs: u64,
    pub streak_min_window_secs: u64,
    pub streak_max_window_secs: u64,
    pub jackpot_chance_bps: u16,
    pub jackpot_payout_bps: u16,
    pub jackpot_share_bps: u16,
    pub locked: bool,
}

impl IssuanceEngine {
    pub fn roles(&self) -> &Roles {
        &self.roles
    }

    pub fn genesis(&self) -> &GenesisParams {
        &self.genesis
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn automation(&self) -> Option<AccountId> {
        self.automation
    }

    pub fn epoch_state(&self, epoch: EpochId) -> Option<&EpochState> {
        self.store.ledger.epoch(epoch)
    }

    pub fn position(&self, epoch: EpochId, user: AccountId) -> Option<&UserEpochPosition> {
        self.store.ledger.position(epoch, user)
    }

    pub fn pending_request(&self, user: AccountId, id: RequestId) -> Option<&PendingRequest> {
        self.store.requests.get(user, id)
    }

    pub fn pending_count(&self, user: AccountId) -> usize {
        self.store.requests.pending_count(user)
    }

    pub fn refund_balance(&self, user: AccountId) -> u128 {
        self.store.refund_balance(user)
    }

    pub fn reward_pool(&self) -> u128 {
        self.store.reward_pool
    }

    pub fn streak(&self, user: AccountId) -> Option<StreakRecord> {
        self.store.streaks.get(&user).copied()
    }

    pub fn jackpot_stats(&self, user: AccountId) -> JackpotStats {
        self.store.jackpot.stats(user)
    }

    pub fn dashboard(&self, rt: &dyn Runtime, user: AccountId) -> Result<UserDashboard> {
        let current_epoch = self.genesis.epoch_at(rt.now());
        let epoch = self
            .store
            .ledger
            .epoch(current_epoch)
            .cloned()
            .unwrap_or_default();
        let streak = self.streak(user);
        let multiplier = resolve_multiplier(
            rt.holding_bonus_bps(user),
            streak.map(|s| s.days).unwrap_or(0),
        )?;
        Ok(UserDashboard {
            current_epoch,
            position: self.position(current_epoch, user).cloned().unwrap_or_default(),
            epoch_raw_tickets: epoch.raw_ticket_total,
            epoch_weighted_total: epoch.weighted_ticket_total,
            epoch_emission: self.store.ledger.emission_for_epoch(current_epoch)?,
            multiplier,
            streak,
            refund_balance: self.store.refund_balance(user),
            pending_requests: self.store.requests.pending_count(user),
            jackpot: self.store.jackpot.stats(user),
            collateral_pool: self.store.jackpot.collateral_pool(),
            token_pool: self.store.jackpot.token_pool(),
            reward_pool: self.store.reward_pool,
        })
    }

    /// Epochs in `[from, from + limit)` (bounded by `MAX_CLAIM_SCAN` and the current epoch)
    /// that `user` could claim now, with their payouts.
    pub fn claimable_epochs(
        &self,
        now: u64,
        user: AccountId,
        from: EpochId,
        limit: u64,
    ) -> Vec<(EpochId, u128)> {
        let current = self.genesis.epoch_at(now);
        let end = from
            .0
            .saturating_add(limit.min(MAX_CLAIM_SCAN))
            .min(current.0);
        let mut available = self.store.reward_pool;
        let mut out = Vec::new();
        for e in from.0..end {
            if let Ok(amount) = self.compute_claim(now, user, EpochId(e), available) {
                available -= amount;
                out.push((EpochId(e), amount));
            }
        }
        out
    }

    pub fn epoch_params(&self, now: u64) -> EpochParamsSnapshot {
        let current_epoch = self.genesis.epoch_at(now);
        let (streak_min_window_secs, streak_max_window_secs) = self.params.streak_windows();
        EpochParamsSnapshot {
            current_epoch,
            epoch_start: self.genesis.epoch_start(current_epoch),
            epoch_end: self.genesis.epoch_end(current_epoch),
            unit_price: self.params.unit_price,
            epoch_ticket_cap: self.params.epoch_ticket_cap,
            remaining_capacity: self
                .store
                .ledger
                .remaining_capacity(current_epoch, self.params.epoch_ticket_cap),
            pending_collateral: self.store.requests.locked_total(),
            base_emission: self.params.base_emission,
            linear_threshold: self.genesis.linear_threshold(),
            claim_window_epochs: self.genesis.claim_window_epochs(),
            streak_min_window_secs,
            streak_max_window_secs,
            jackpot_chance_bps: self.params.jackpot_chance_bps.get(),
            jackpot_payout_bps: self.params.jackpot_payout_bps.get(),
            jackpot_share_bps: self.params.jackpot_share_bps.get(),
            locked: self.locked,
        }
    }
}
