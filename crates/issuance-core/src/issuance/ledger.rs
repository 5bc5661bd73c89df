//! Epoch ledger: authoritative per-epoch ticket and collateral accounting.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{AccountId, IssuanceError, Result};

use super::math::{add_u128, add_u64, effective_delta, floor_bps, mul_div_floor_u128, sub_u128};
use super::types::{Bps, EpochId, SurgeTier, BPS_U128};

/// Per-epoch aggregate state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EpochState {
    pub raw_ticket_total: u64,
    pub effective_ticket_total: u64,
    pub weighted_ticket_total: u128,
    /// Non-jackpot collateral, swept to the treasury after the grace delay.
    pub collateral_bank: u128,
    /// Full collateral volume (jackpot cut included); drives surge tiers.
    pub bonus_base_amount: u128,
    /// Base emission captured when the epoch opened.
    pub emission_base: u128,
    /// Surge tiers captured when the epoch opened.
    pub surge_tiers: Vec<SurgeTier>,
    pub initialized: bool,
    pub claimed_total: u128,
    pub recovered: bool,
    pub recovered_amount: u128,
    pub swept: bool,
}

/// A user's position within one epoch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UserEpochPosition {
    pub raw_tickets: u64,
    pub weighted_contribution: u128,
    pub participated: bool,
    pub claimed: bool,
}

/// Contribution input (tickets already accepted by the request queue).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Contribution {
    pub epoch: EpochId,
    pub user: AccountId,
    pub tickets: u64,
    pub collateral: u128,
    /// Multiplier in effect for this contribution (bps; 10_000 = 1x).
    pub multiplier_bps: u32,
}

/// Rules the ledger needs from the engine parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContributionRules<'a> {
    pub linear_threshold: u64,
    pub epoch_ticket_cap: u64,
    pub jackpot_share: Bps,
    /// Emission base to capture if this contribution opens the epoch.
    pub base_emission: u128,
    /// Surge tiers to capture if this contribution opens the epoch.
    pub surge_tiers: &'a [SurgeTier],
}

/// Fully validated contribution effects, committed with `EpochLedger::commit`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContributionPlan {
    epoch: EpochId,
    user: AccountId,
    next_epoch: EpochState,
    next_position: UserEpochPosition,
    pub first_in_epoch: bool,
    pub jackpot_cut: u128,
    pub bank_share: u128,
    pub effective_delta: u64,
    pub weighted_delta: u128,
}

#[derive(Clone, Debug, Default)]
pub struct EpochLedger {
    epochs: BTreeMap<EpochId, EpochState>,
    positions: BTreeMap<(EpochId, AccountId), UserEpochPosition>,
}

impl EpochLedger {
    pub fn new() -> EpochLedger {
        EpochLedger::default()
    }

    pub fn epoch(&self, epoch: EpochId) -> Option<&EpochState> {
        self.epochs.get(&epoch)
    }

    pub fn position(&self, epoch: EpochId, user: AccountId) -> Option<&UserEpochPosition> {
        self.positions.get(&(epoch, user))
    }

    pub fn epochs(&self) -> impl Iterator<Item = (&EpochId, &EpochState)> {
        self.epochs.iter()
    }

    /// Positions of a single epoch.
    pub fn positions_in(
        &self,
        epoch: EpochId,
    ) -> impl Iterator<Item = (&AccountId, &UserEpochPosition)> {
        self.positions
            .range((epoch, AccountId([0u8; 32]))..=(epoch, AccountId([0xff; 32])))
            .map(|((_, user), pos)| (user, pos))
    }

    pub fn is_first_contribution(&self, epoch: EpochId, user: AccountId) -> bool {
        self.positions
            .get(&(epoch, user))
            .map(|p| !p.participated)
            .unwrap_or(true)
    }

    pub fn remaining_capacity(&self, epoch: EpochId, cap: u64) -> u64 {
        let used = self.epochs.get(&epoch).map(|e| e.raw_ticket_total).unwrap_or(0);
        cap.saturating_sub(used)
    }

    /// Validates a contribution and computes its effects without mutating the ledger.
    ///
    /// Preconditions:
    /// - `c.tickets > 0`
    /// - `raw_ticket_total + c.tickets <= epoch_ticket_cap` (else `CapacityExceeded`)
    pub fn plan(&self, c: &Contribution, rules: &ContributionRules<'_>) -> Result<ContributionPlan> {
        if c.tickets == 0 {
            return Err(IssuanceError::InvalidInput("tickets must be > 0".into()));
        }
        let prev_epoch = self.epochs.get(&c.epoch).cloned().unwrap_or_default();
        let prev_pos = self
            .positions
            .get(&(c.epoch, c.user))
            .cloned()
            .unwrap_or_default();

        let raw_total = add_u64(prev_epoch.raw_ticket_total, c.tickets)?;
        if raw_total > rules.epoch_ticket_cap {
            return Err(IssuanceError::CapacityExceeded(format!(
                "epoch {} ticket cap {} reached ({} in use, {} requested)",
                c.epoch.0, rules.epoch_ticket_cap, prev_epoch.raw_ticket_total, c.tickets
            )));
        }

        let jackpot_cut = floor_bps(c.collateral, rules.jackpot_share)?;
        let bank_share = sub_u128(c.collateral, jackpot_cut)?;

        let eff = effective_delta(prev_pos.raw_tickets, c.tickets, rules.linear_threshold)?;
        let weighted = mul_div_floor_u128(eff as u128, c.multiplier_bps as u128, BPS_U128)?;

        let mut next_epoch = prev_epoch;
        if !next_epoch.initialized {
            next_epoch.initialized = true;
            next_epoch.emission_base = rules.base_emission;
            next_epoch.surge_tiers = rules.surge_tiers.to_vec();
        }
        next_epoch.raw_ticket_total = raw_total;
        next_epoch.effective_ticket_total = add_u64(next_epoch.effective_ticket_total, eff)?;
        next_epoch.weighted_ticket_total = add_u128(next_epoch.weighted_ticket_total, weighted)?;
        next_epoch.collateral_bank = add_u128(next_epoch.collateral_bank, bank_share)?;
        next_epoch.bonus_base_amount = add_u128(next_epoch.bonus_base_amount, c.collateral)?;

        let first_in_epoch = !prev_pos.participated;
        let next_position = UserEpochPosition {
            raw_tickets: add_u64(prev_pos.raw_tickets, c.tickets)?,
            weighted_contribution: add_u128(prev_pos.weighted_contribution, weighted)?,
            participated: true,
            claimed: prev_pos.claimed,
        };

        Ok(ContributionPlan {
            epoch: c.epoch,
            user: c.user,
            next_epoch,
            next_position,
            first_in_epoch,
            jackpot_cut,
            bank_share,
            effective_delta: eff,
            weighted_delta: weighted,
        })
    }

    /// Applies a plan produced by `plan` (infallible).
    pub fn commit(&mut self, plan: &ContributionPlan) {
        self.epochs.insert(plan.epoch, plan.next_epoch.clone());
        self.positions
            .insert((plan.epoch, plan.user), plan.next_position.clone());
    }

    /// Plan + commit in one step.
    pub fn record_contribution(
        &mut self,
        c: &Contribution,
        rules: &ContributionRules<'_>,
    ) -> Result<ContributionPlan> {
        let plan = self.plan(c, rules)?;
        self.commit(&plan);
        Ok(plan)
    }

    /// Total emission of an epoch: captured base plus cumulative bonus of the captured tiers.
    ///
    /// Epochs that never opened emit nothing.
    pub fn emission_for_epoch(&self, epoch: EpochId) -> Result<u128> {
        match self.epochs.get(&epoch) {
            Some(state) if state.initialized => add_u128(
                state.emission_base,
                surge_bonus(state.bonus_base_amount, &state.surge_tiers)?,
            ),
            _ => Ok(0),
        }
    }

    pub(crate) fn epoch_mut(&mut self, epoch: EpochId) -> &mut EpochState {
        self.epochs.entry(epoch).or_default()
    }

    pub(crate) fn position_mut(
        &mut self,
        epoch: EpochId,
        user: AccountId,
    ) -> Option<&mut UserEpochPosition> {
        self.positions.get_mut(&(epoch, user))
    }
}

/// Sums the bonus of every tier whose threshold is at or below `bonus_base`.
///
/// Tiers accumulate: reaching tier N also pays tiers 1..N-1.
pub fn surge_bonus(bonus_base: u128, tiers: &[SurgeTier]) -> Result<u128> {
    let mut total = 0u128;
    for tier in tiers {
        if tier.threshold <= bonus_base {
            total = add_u128(total, tier.bonus)?;
        }
    }
    Ok(total)
}
