//! Claim, sweep and recovery of closed epochs.

use std::collections::BTreeSet;

use tracing::{info, instrument, warn};

use crate::{AccountId, IssuanceError, Result};

use super::collaborators::Runtime;
use super::engine::IssuanceEngine;
use super::math::{add_u128, mul_div_floor_u128, sub_u128};
use super::types::EpochId;

/// Upper bound on epochs per batch claim.
pub const MAX_BATCH_CLAIM: usize = 64;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchClaimReport {
    pub claimed: Vec<(EpochId, u128)>,
    pub skipped: Vec<(EpochId, IssuanceError)>,
    pub total: u128,
}

impl IssuanceEngine {
    /// Payout `user` would receive for `epoch` at time `now`, given `available` reward units.
    ///
    /// Failure order: closed, initialized, window, already claimed, share, solvency.
    pub(crate) fn compute_claim(
        &self,
        now: u64,
        user: AccountId,
        epoch: EpochId,
        available: u128,
    ) -> Result<u128> {
        let current = self.genesis.epoch_at(now);
        if current <= epoch {
            return Err(IssuanceError::InvalidState(format!(
                "epoch {} is not closed",
                epoch.0
            )));
        }
        let state = self
            .store
            .ledger
            .epoch(epoch)
            .filter(|s| s.initialized)
            .ok_or_else(|| {
                IssuanceError::InvalidState(format!("epoch {} was never initialized", epoch.0))
            })?;
        if current.0 > epoch.0.saturating_add(self.genesis.claim_window_epochs()) {
            return Err(IssuanceError::InvalidState(format!(
                "claim window for epoch {} has elapsed",
                epoch.0
            )));
        }
        let position = self.store.ledger.position(epoch, user);
        if position.map(|p| p.claimed).unwrap_or(false) {
            return Err(IssuanceError::InvalidState(format!(
                "epoch {} already claimed",
                epoch.0
            )));
        }
        let weighted = position.map(|p| p.weighted_contribution).unwrap_or(0);
        if weighted == 0 || state.weighted_ticket_total == 0 {
            return Err(IssuanceError::Insolvent(format!(
                "no weighted share in epoch {}",
                epoch.0
            )));
        }

        let emission = self.store.ledger.emission_for_epoch(epoch)?;
        let payout = mul_div_floor_u128(emission, weighted, state.weighted_ticket_total)?;
        if payout == 0 {
            return Err(IssuanceError::Insolvent(format!(
                "share of epoch {} rounds to zero",
                epoch.0
            )));
        }
        if add_u128(state.claimed_total, payout)? > emission {
            return Err(IssuanceError::Insolvent(format!(
                "epoch {} emission exhausted",
                epoch.0
            )));
        }
        if payout > available {
            return Err(IssuanceError::Insolvent(format!(
                "reward pool {available} cannot cover {payout}"
            )));
        }
        Ok(payout)
    }

    fn apply_claim(&mut self, user: AccountId, epoch: EpochId, amount: u128, claimed: bool) {
        let state = self.store.ledger.epoch_mut(epoch);
        if claimed {
            state.claimed_total = state.claimed_total.saturating_add(amount);
            self.store.reward_pool = self.store.reward_pool.saturating_sub(amount);
        } else {
            state.claimed_total = state.claimed_total.saturating_sub(amount);
            self.store.reward_pool = self.store.reward_pool.saturating_add(amount);
        }
        if let Some(pos) = self.store.ledger.position_mut(epoch, user) {
            pos.claimed = claimed;
        }
    }

    /// Claims the caller's share of one closed epoch.
    #[instrument(skip_all, fields(user = %caller.short(), epoch = epoch.0))]
    pub fn claim(&mut self, rt: &mut dyn Runtime, caller: AccountId, epoch: EpochId) -> Result<u128> {
        let out = self.guarded("claim", |eng| {
            let amount = eng.compute_claim(rt.now(), caller, epoch, eng.store.reward_pool)?;

            eng.apply_claim(caller, epoch, amount, true);
            if !rt.transfer(eng.roles.engine, caller, amount) {
                eng.apply_claim(caller, epoch, amount, false);
                return Err(IssuanceError::TransferFailed(format!(
                    "reward transfer of {amount} rejected"
                )));
            }
            eng.metrics.claims_total.inc();
            info!(amount, "epoch claimed");
            Ok(amount)
        });
        if out.is_err() {
            self.metrics.claim_failures.inc();
        }
        out
    }

    /// Claims every listed epoch that is individually claimable, in one transfer.
    ///
    /// Invalid epochs are skipped; duplicates are claimed once.
    #[instrument(skip_all, fields(user = %caller.short(), epochs = epochs.len()))]
    pub fn batch_claim(
        &mut self,
        rt: &mut dyn Runtime,
        caller: AccountId,
        epochs: &[EpochId],
    ) -> Result<BatchClaimReport> {
        if epochs.len() > MAX_BATCH_CLAIM {
            return Err(IssuanceError::BoundedValueExceeded(format!(
                "batch of {} epochs exceeds {MAX_BATCH_CLAIM}",
                epochs.len()
            )));
        }
        self.guarded("batch_claim", |eng| {
            let now = rt.now();
            let mut report = BatchClaimReport::default();
            let mut seen = BTreeSet::new();
            let mut available = eng.store.reward_pool;
            for &epoch in epochs {
                if !seen.insert(epoch) {
                    continue;
                }
                match eng.compute_claim(now, caller, epoch, available) {
                    Ok(amount) => {
                        available = sub_u128(available, amount)?;
                        report.total = add_u128(report.total, amount)?;
                        report.claimed.push((epoch, amount));
                    }
                    Err(err) => report.skipped.push((epoch, err)),
                }
            }
            if report.claimed.is_empty() {
                return Err(IssuanceError::InvalidState(
                    "no claimable epoch in batch".into(),
                ));
            }

            for &(epoch, amount) in &report.claimed {
                eng.apply_claim(caller, epoch, amount, true);
            }
            if !rt.transfer(eng.roles.engine, caller, report.total) {
                for &(epoch, amount) in &report.claimed {
                    eng.apply_claim(caller, epoch, amount, false);
                }
                return Err(IssuanceError::TransferFailed(format!(
                    "reward transfer of {} rejected",
                    report.total
                )));
            }
            eng.metrics.claims_total.inc_by(report.claimed.len() as u64);
            info!(
                claimed = report.claimed.len(),
                skipped = report.skipped.len(),
                total = report.total,
                "batch claimed"
            );
            Ok(report)
        })
    }

    /// Moves a closed epoch's collateral bank to the treasury once the sweep delay has passed.
    #[instrument(skip_all, fields(epoch = epoch.0))]
    pub fn sweep(&mut self, rt: &mut dyn Runtime, epoch: EpochId) -> Result<u128> {
        self.guarded("sweep", |eng| {
            let sweepable_at = eng
                .genesis
                .epoch_end(epoch)
                .saturating_add(eng.genesis.sweep_delay_secs());
            if rt.now() < sweepable_at {
                return Err(IssuanceError::InvalidState(format!(
                    "epoch {} sweepable at {sweepable_at}",
                    epoch.0
                )));
            }
            let amount = eng
                .store
                .ledger
                .epoch(epoch)
                .map(|s| s.collateral_bank)
                .unwrap_or(0);
            if amount == 0 {
                return Err(IssuanceError::InvalidState(format!(
                    "nothing to sweep for epoch {}",
                    epoch.0
                )));
            }

            let state = eng.store.ledger.epoch_mut(epoch);
            state.collateral_bank = 0;
            state.swept = true;
            if !rt.send_collateral(eng.roles.treasury, amount) {
                let state = eng.store.ledger.epoch_mut(epoch);
                state.collateral_bank = amount;
                state.swept = false;
                return Err(IssuanceError::TransferFailed(format!(
                    "treasury rejected sweep of {amount}"
                )));
            }
            eng.metrics.sweeps_total.inc();
            info!(amount, "epoch swept");
            Ok(amount)
        })
    }

    /// Returns an expired epoch's unclaimed emission to the treasury. At most once per epoch.
    #[instrument(skip_all, fields(epoch = epoch.0))]
    pub fn recover_expired(&mut self, rt: &mut dyn Runtime, epoch: EpochId) -> Result<u128> {
        self.guarded("recover_expired", |eng| {
            let current = eng.genesis.epoch_at(rt.now());
            let recoverable_from = epoch
                .0
                .saturating_add(eng.genesis.claim_window_epochs().saturating_mul(2));
            if current.0 < recoverable_from {
                return Err(IssuanceError::InvalidState(format!(
                    "epoch {} recoverable from epoch {recoverable_from}",
                    epoch.0
                )));
            }
            let state = eng.store.ledger.epoch(epoch).cloned().unwrap_or_default();
            if state.recovered {
                return Ok(0);
            }
            let amount = if state.initialized {
                let emission = eng.store.ledger.emission_for_epoch(epoch)?;
                emission
                    .saturating_sub(state.claimed_total)
                    .min(eng.store.reward_pool)
            } else {
                0
            };

            let next_pool = sub_u128(eng.store.reward_pool, amount)?;

            let entry = eng.store.ledger.epoch_mut(epoch);
            entry.recovered = true;
            entry.recovered_amount = amount;
            if amount == 0 {
                info!("epoch marked recovered with nothing to reclaim");
                return Ok(0);
            }
            let prev_pool = eng.store.reward_pool;
            eng.store.reward_pool = next_pool;
            if !rt.transfer(eng.roles.engine, eng.roles.treasury, amount) {
                eng.store.reward_pool = prev_pool;
                let entry = eng.store.ledger.epoch_mut(epoch);
                entry.recovered = false;
                entry.recovered_amount = 0;
                warn!(amount, "recovery transfer rejected");
                return Err(IssuanceError::TransferFailed(format!(
                    "treasury rejected recovery of {amount}"
                )));
            }
            eng.metrics.recoveries_total.inc();
            info!(amount, "unclaimed emission recovered");
            Ok(amount)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::SimulatedChain;
    use crate::config::EngineConfig;
    use crate::issuance::ledger::{Contribution, ContributionRules};
    use crate::issuance::types::{Bps, Roles};

    const DAY: u64 = 86_400;
    const GENESIS: u64 = 1_000_000;

    fn id(b: u8) -> AccountId {
        AccountId([b; 32])
    }

    fn roles() -> Roles {
        Roles {
            admin: id(0xA0),
            treasury: id(0xA1),
            engine: id(0xA2),
            asset_ledger: id(0xA3),
        }
    }

    /// Engine with epoch 0 holding positions weighted 300 (user 1) and 700 (user 2).
    fn seeded() -> (IssuanceEngine, SimulatedChain) {
        let config = EngineConfig::builder()
            .genesis_time(GENESIS)
            .claim_window_epochs(2)
            .base_emission(1_000_000_000_000_000_000)
            .surge_tiers(Vec::new())
            .linear_threshold(1_000_000)
            .build()
            .unwrap();
        let mut engine = IssuanceEngine::new(&config, roles()).unwrap();
        open_epoch(&mut engine, EpochId(0));
        engine.store.reward_pool = 5_000_000_000_000_000_000;
        let mut chain = SimulatedChain::new(GENESIS, 1);
        chain.assets.mint(roles().engine, 5_000_000_000_000_000_000);
        (engine, chain)
    }

    fn open_epoch(engine: &mut IssuanceEngine, epoch: EpochId) {
        let rules = ContributionRules {
            linear_threshold: 1_000_000,
            epoch_ticket_cap: 1_000_000,
            jackpot_share: Bps::new(1_000).unwrap(),
            base_emission: 1_000_000_000_000_000_000,
            surge_tiers: &[],
        };
        for (user, tickets) in [(1u8, 300u64), (2, 700)] {
            engine
                .store
                .ledger
                .record_contribution(
                    &Contribution {
                        epoch,
                        user: id(user),
                        tickets,
                        collateral: tickets as u128 * 10,
                        multiplier_bps: 10_000,
                    },
                    &rules,
                )
                .unwrap();
        }
    }

    #[test]
    fn claims_split_pro_rata() {
        let (mut engine, mut chain) = seeded();
        assert!(matches!(
            engine.claim(&mut chain, id(1), EpochId(0)),
            Err(IssuanceError::InvalidState(_))
        ));
        chain.advance_time(DAY);
        let a = engine.claim(&mut chain, id(1), EpochId(0)).unwrap();
        let b = engine.claim(&mut chain, id(2), EpochId(0)).unwrap();
        assert_eq!(a, 300_000_000_000_000_000);
        assert_eq!(b, 700_000_000_000_000_000);
        assert_eq!(a + b, 1_000_000_000_000_000_000);
        assert_eq!(chain.assets.balance(id(1)), a);
        assert_eq!(
            engine.store.ledger.epoch(EpochId(0)).unwrap().claimed_total,
            a + b
        );
    }

    #[test]
    fn failed_transfer_reverts_claim() {
        let (mut engine, mut chain) = seeded();
        chain.advance_time(DAY);
        chain.assets.reject_incoming(id(1));
        assert!(matches!(
            engine.claim(&mut chain, id(1), EpochId(0)),
            Err(IssuanceError::TransferFailed(_))
        ));
        assert_eq!(engine.store.reward_pool, 5_000_000_000_000_000_000);
        assert!(!engine.store.ledger.position(EpochId(0), id(1)).unwrap().claimed);

        chain.assets.accept_incoming(id(1));
        assert!(engine.claim(&mut chain, id(1), EpochId(0)).is_ok());
    }

    #[test]
    fn failed_batch_transfer_reverts_every_epoch() {
        let epochs = [EpochId(0), EpochId(1)];
        let (mut engine, mut chain) = seeded();
        open_epoch(&mut engine, EpochId(1));
        chain.advance_time(2 * DAY);

        chain.assets.reject_incoming(id(1));
        assert!(matches!(
            engine.batch_claim(&mut chain, id(1), &epochs),
            Err(IssuanceError::TransferFailed(_))
        ));
        assert_eq!(engine.store.reward_pool, 5_000_000_000_000_000_000);
        for epoch in epochs {
            assert_eq!(engine.store.ledger.epoch(epoch).unwrap().claimed_total, 0);
            assert!(!engine.store.ledger.position(epoch, id(1)).unwrap().claimed);
        }
        assert_eq!(engine.metrics.claims_total.get(), 0);

        let (mut solo, mut solo_chain) = seeded();
        open_epoch(&mut solo, EpochId(1));
        solo_chain.advance_time(2 * DAY);
        let lone: Vec<(EpochId, u128)> = epochs
            .iter()
            .map(|&e| (e, solo.claim(&mut solo_chain, id(1), e).unwrap()))
            .collect();

        chain.assets.accept_incoming(id(1));
        let report = engine.batch_claim(&mut chain, id(1), &epochs).unwrap();
        assert_eq!(report.claimed, lone);
        assert_eq!(report.total, 600_000_000_000_000_000);
        assert!(report.skipped.is_empty());
        assert_eq!(chain.assets.balance(id(1)), report.total);
        assert_eq!(engine.store.reward_pool, solo.store.reward_pool);
        for epoch in epochs {
            assert_eq!(
                engine.store.ledger.epoch(epoch).unwrap().claimed_total,
                300_000_000_000_000_000
            );
            assert!(engine.store.ledger.position(epoch, id(1)).unwrap().claimed);
        }
    }

    #[test]
    fn claim_window_closes() {
        let (mut engine, mut chain) = seeded();
        chain.advance_time(3 * DAY);
        assert!(matches!(
            engine.claim(&mut chain, id(1), EpochId(0)),
            Err(IssuanceError::InvalidState(_))
        ));
    }

    #[test]
    fn non_participant_has_no_share() {
        let (mut engine, mut chain) = seeded();
        chain.advance_time(DAY);
        assert!(matches!(
            engine.claim(&mut chain, id(9), EpochId(0)),
            Err(IssuanceError::Insolvent(_))
        ));
    }

    #[test]
    fn sweep_waits_for_delay_and_runs_once() {
        let (mut engine, mut chain) = seeded();
        chain.advance_time(DAY);
        assert!(engine.sweep(&mut chain, EpochId(0)).is_err());
        chain.advance_time(3 * DAY);
        // 10_000 collateral, 10% to the jackpot pool.
        assert_eq!(engine.sweep(&mut chain, EpochId(0)).unwrap(), 9_000);
        assert_eq!(chain.host.collateral_paid(roles().treasury), 9_000);
        assert!(matches!(
            engine.sweep(&mut chain, EpochId(0)),
            Err(IssuanceError::InvalidState(_))
        ));
    }

    #[test]
    fn recovery_reclaims_unclaimed_once() {
        let (mut engine, mut chain) = seeded();
        chain.advance_time(DAY);
        let claimed = engine.claim(&mut chain, id(1), EpochId(0)).unwrap();

        chain.advance_time(DAY);
        assert!(engine.recover_expired(&mut chain, EpochId(0)).is_err());
        chain.advance_time(2 * DAY);
        let recovered = engine.recover_expired(&mut chain, EpochId(0)).unwrap();
        assert_eq!(recovered, 1_000_000_000_000_000_000 - claimed);
        assert_eq!(engine.recover_expired(&mut chain, EpochId(0)).unwrap(), 0);
        assert_eq!(chain.assets.balance(roles().treasury), recovered);

        let state = engine.store.ledger.epoch(EpochId(0)).unwrap();
        assert!(state.claimed_total + state.recovered_amount <= 1_000_000_000_000_000_000);
    }

    #[test]
    fn recovery_of_empty_epoch_marks_it() {
        let (mut engine, mut chain) = seeded();
        chain.advance_time(10 * DAY);
        assert_eq!(engine.recover_expired(&mut chain, EpochId(5)).unwrap(), 0);
        assert!(engine.store.ledger.epoch(EpochId(5)).unwrap().recovered);
        assert_eq!(engine.store.reward_pool, 5_000_000_000_000_000_000);
    }
}
