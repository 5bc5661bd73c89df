//! Administrative surface: parameter setters, the one-way lock and reserve seeding.

use tracing::{info, instrument};

use crate::{AccountId, IssuanceError, Result};

use super::collaborators::Runtime;
use super::engine::IssuanceEngine;
use super::math::{add_u128, sub_u128};
use super::types::{validate_streak_windows, validate_surge_tiers, Bps, SurgeTier};

impl IssuanceEngine {
    fn ensure_admin(&self, caller: AccountId) -> Result<()> {
        if caller != self.roles.admin {
            return Err(IssuanceError::Unauthorized(format!(
                "{} is not the admin",
                caller.short()
            )));
        }
        Ok(())
    }

    fn ensure_settable(&self, caller: AccountId) -> Result<()> {
        self.ensure_admin(caller)?;
        if self.locked {
            return Err(IssuanceError::InvalidState("parameters are locked".into()));
        }
        Ok(())
    }

    pub fn set_unit_price(&mut self, caller: AccountId, unit_price: u128) -> Result<()> {
        self.ensure_settable(caller)?;
        if unit_price == 0 {
            return Err(IssuanceError::InvalidInput("unit_price must be > 0".into()));
        }
        self.params.unit_price = unit_price;
        info!(unit_price, "unit price updated");
        Ok(())
    }

    pub fn set_epoch_ticket_cap(&mut self, caller: AccountId, cap: u64) -> Result<()> {
        self.ensure_settable(caller)?;
        if cap == 0 {
            return Err(IssuanceError::InvalidInput(
                "epoch_ticket_cap must be > 0".into(),
            ));
        }
        self.params.epoch_ticket_cap = cap;
        info!(cap, "epoch ticket cap updated");
        Ok(())
    }

    /// Applies to epochs opened after the change; open epochs keep their captured base.
    pub fn set_base_emission(&mut self, caller: AccountId, base_emission: u128) -> Result<()> {
        self.ensure_settable(caller)?;
        self.params.base_emission = base_emission;
        info!(base_emission, "base emission updated");
        Ok(())
    }

    pub fn set_streak_windows(
        &mut self,
        caller: AccountId,
        min_window_secs: u64,
        max_window_secs: u64,
    ) -> Result<()> {
        self.ensure_settable(caller)?;
        validate_streak_windows(min_window_secs, max_window_secs)?;
        self.params.streak_min_window_secs = min_window_secs;
        self.params.streak_max_window_secs = max_window_secs;
        info!(min_window_secs, max_window_secs, "streak windows updated");
        Ok(())
    }

    pub fn set_jackpot_odds(
        &mut self,
        caller: AccountId,
        chance_bps: u16,
        payout_share_bps: u16,
    ) -> Result<()> {
        self.ensure_settable(caller)?;
        let chance = Bps::new(chance_bps)?;
        let payout = Bps::new(payout_share_bps)?;
        self.params.jackpot_chance_bps = chance;
        self.params.jackpot_payout_bps = payout;
        info!(chance_bps, payout_share_bps, "jackpot odds updated");
        Ok(())
    }

    pub fn set_jackpot_share(&mut self, caller: AccountId, share_bps: u16) -> Result<()> {
        self.ensure_settable(caller)?;
        self.params.jackpot_share_bps = Bps::new(share_bps)?;
        info!(share_bps, "jackpot collateral share updated");
        Ok(())
    }

    /// Replaces the surge tiers. Epochs already opened keep the tiers they opened with.
    pub fn set_surge_tiers(&mut self, caller: AccountId, tiers: Vec<SurgeTier>) -> Result<()> {
        self.ensure_settable(caller)?;
        validate_surge_tiers(&tiers)?;
        info!(tiers = tiers.len(), "surge tiers updated");
        self.params.surge_tiers = tiers;
        Ok(())
    }

    /// Registers (or clears) the trusted automation caller.
    pub fn set_automation(&mut self, caller: AccountId, automation: Option<AccountId>) -> Result<()> {
        self.ensure_settable(caller)?;
        self.automation = automation;
        info!(enabled = automation.is_some(), "automation caller updated");
        Ok(())
    }

    /// Permanently disables every setter.
    pub fn lock_parameters(&mut self, caller: AccountId) -> Result<()> {
        self.ensure_settable(caller)?;
        self.locked = true;
        info!("parameters locked");
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Moves `amount` reward units from the admin into the engine's reserve.
    #[instrument(skip_all, fields(amount = amount))]
    pub fn seed_reward_pool(
        &mut self,
        rt: &mut dyn Runtime,
        caller: AccountId,
        amount: u128,
    ) -> Result<()> {
        self.ensure_admin(caller)?;
        self.guarded("seed_reward_pool", |eng| {
            if amount == 0 {
                return Err(IssuanceError::InvalidInput("amount must be > 0".into()));
            }
            let next = add_u128(eng.store.reward_pool, amount)?;
            if !rt.transfer(caller, eng.roles.engine, amount) {
                return Err(IssuanceError::TransferFailed(format!(
                    "admin transfer of {amount} rejected"
                )));
            }
            eng.store.reward_pool = next;
            info!(reward_pool = next, "reward pool seeded");
            Ok(())
        })
    }

    /// One-time transfer of engine-held tokens not backing the reward or jackpot pools.
    #[instrument(skip_all, fields(recipient = %recipient.short(), amount = amount))]
    pub fn seed_initial_distribution(
        &mut self,
        rt: &mut dyn Runtime,
        caller: AccountId,
        recipient: AccountId,
        amount: u128,
    ) -> Result<()> {
        self.ensure_admin(caller)?;
        self.guarded("seed_initial_distribution", |eng| {
            if eng.initial_distribution_done {
                return Err(IssuanceError::InvalidState(
                    "initial distribution already done".into(),
                ));
            }
            let committed = add_u128(eng.store.reward_pool, eng.store.jackpot.token_pool())?;
            let free = sub_u128(rt.balance_of(eng.roles.engine), committed).unwrap_or(0);
            if amount == 0 || amount > free {
                return Err(IssuanceError::Insolvent(format!(
                    "distribution of {amount} exceeds free balance {free}"
                )));
            }

            eng.initial_distribution_done = true;
            if !rt.transfer(eng.roles.engine, recipient, amount) {
                eng.initial_distribution_done = false;
                return Err(IssuanceError::TransferFailed(format!(
                    "distribution of {amount} rejected"
                )));
            }
            info!(free_after = free - amount, "initial distribution sent");
            Ok(())
        })
    }
}
