//! Issuance engine state and the commit/reveal mining path.
//!
//! Every mutating entry point runs inside [`IssuanceEngine::guarded`]: a single flag rejects any
//! nested mutating call for the duration of the operation. Bookkeeping is committed before any
//! outward transfer is attempted.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::metrics::EngineMetrics;
use crate::{AccountId, Hash32, IssuanceError, Result};

use super::collaborators::{FeeNotificationHandler, Runtime};
use super::jackpot::{DrawInput, JackpotPayout, JackpotPools};
use super::ledger::{Contribution, ContributionRules, EpochLedger};
use super::math::{add_u128, mul_div_floor_u128, sub_u128};
use super::multiplier::{advance_streak, resolve_multiplier, StreakRecord, StreakTransition};
use super::requests::{
    classify, NewRequest, PendingRequest, RefundReason, RequestOutcome, RequestQueue,
    RequestStatus,
};
use super::types::{EngineParams, EpochId, GenesisParams, RequestId, Roles};

/// Upper bound on requests processed by one finalize call.
pub const MAX_FINALIZE_BATCH: u32 = 64;

/// Explicit store owned by the engine; every operation reaches state through it.
#[derive(Clone, Debug, Default)]
pub struct LedgerStore {
    pub(crate) ledger: EpochLedger,
    pub(crate) requests: RequestQueue,
    pub(crate) streaks: BTreeMap<AccountId, StreakRecord>,
    pub(crate) jackpot: JackpotPools,
    pub(crate) refunds: BTreeMap<AccountId, u128>,
    pub(crate) reward_pool: u128,
}

impl LedgerStore {
    pub fn ledger(&self) -> &EpochLedger {
        &self.ledger
    }

    pub fn requests(&self) -> &RequestQueue {
        &self.requests
    }

    pub fn jackpot(&self) -> &JackpotPools {
        &self.jackpot
    }

    pub fn reward_pool(&self) -> u128 {
        self.reward_pool
    }

    pub fn refund_balance(&self, who: AccountId) -> u128 {
        self.refunds.get(&who).copied().unwrap_or(0)
    }

    pub(crate) fn credit_refund(&mut self, who: AccountId, amount: u128) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let next = add_u128(self.refund_balance(who), amount)?;
        self.refunds.insert(who, next);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RequestReceipt {
    pub id: RequestId,
    pub user: AccountId,
    pub locked: u128,
    /// Overpayment credited to the payer's refund balance.
    pub refunded: u128,
    pub creation_height: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FinalizedItem {
    pub id: RequestId,
    pub outcome: RequestOutcome,
    pub epoch: Option<EpochId>,
    pub streak: Option<StreakTransition>,
    pub jackpot: Option<JackpotPayout>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FinalizeReport {
    pub items: Vec<FinalizedItem>,
    /// The batch stopped at a request whose seed height has not been reached yet.
    pub blocked: bool,
    /// Request that could not be settled; it stays pending and the batch stopped before it.
    pub failed: Option<RequestId>,
}

impl FinalizeReport {
    pub fn mined_tickets(&self) -> u64 {
        self.items
            .iter()
            .map(|i| match i.outcome {
                RequestOutcome::Mined { tickets, .. } => tickets,
                RequestOutcome::Refunded { .. } => 0,
            })
            .sum()
    }

    pub fn refunded(&self) -> u128 {
        self.items
            .iter()
            .map(|i| match i.outcome {
                RequestOutcome::Mined { refunded, .. } => refunded,
                RequestOutcome::Refunded { amount, .. } => amount,
            })
            .fold(0u128, u128::saturating_add)
    }
}

pub struct IssuanceEngine {
    pub(crate) roles: Roles,
    pub(crate) genesis: GenesisParams,
    pub(crate) params: EngineParams,
    pub(crate) automation: Option<AccountId>,
    pub(crate) locked: bool,
    pub(crate) initial_distribution_done: bool,
    pub(crate) store: LedgerStore,
    pub(crate) metrics: EngineMetrics,
    entered: Option<&'static str>,
}

impl IssuanceEngine {
    pub fn new(config: &EngineConfig, roles: Roles) -> Result<IssuanceEngine> {
        config.validate()?;
        let genesis = GenesisParams::try_from(config)?;
        let params = EngineParams::try_from(config)?;
        info!(
            genesis_time = genesis.genesis_time(),
            epoch_length_secs = genesis.epoch_length_secs(),
            claim_window_epochs = genesis.claim_window_epochs(),
            engine = %roles.engine.short(),
            "issuance engine initialized"
        );
        Ok(IssuanceEngine {
            roles,
            genesis,
            params,
            automation: None,
            locked: false,
            initial_distribution_done: false,
            store: LedgerStore::default(),
            metrics: EngineMetrics::new(),
            entered: None,
        })
    }

    /// Runs `f` holding the engine-wide mutual-exclusion guard.
    pub(crate) fn guarded<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        if let Some(active) = self.entered {
            self.metrics.reentrancy_rejections.inc();
            warn!(op, active, "reentrant call rejected");
            return Err(IssuanceError::Reentrancy(active));
        }
        self.entered = Some(op);
        let out = f(self);
        self.entered = None;
        out
    }

    pub(crate) fn ensure_automation(&self, caller: AccountId) -> Result<()> {
        match self.automation {
            Some(automation) if automation == caller => Ok(()),
            _ => Err(IssuanceError::Unauthorized(format!(
                "{} is not the registered automation caller",
                caller.short()
            ))),
        }
    }

    /// Locks `collateral` for `ticket_count` tickets, mined exactly at finalize.
    #[instrument(skip_all, fields(user = %caller.short(), ticket_count = ticket_count))]
    pub fn request(
        &mut self,
        rt: &mut dyn Runtime,
        caller: AccountId,
        ticket_count: u64,
        collateral: u128,
    ) -> Result<RequestReceipt> {
        self.submit(rt, caller, caller, ticket_count, collateral, true)
    }

    /// Like [`request`](Self::request), but finalize mines whatever still fits the epoch cap and
    /// refunds the rest.
    #[instrument(skip_all, fields(user = %caller.short(), ticket_count = ticket_count))]
    pub fn request_partial(
        &mut self,
        rt: &mut dyn Runtime,
        caller: AccountId,
        ticket_count: u64,
        collateral: u128,
    ) -> Result<RequestReceipt> {
        self.submit(rt, caller, caller, ticket_count, collateral, false)
    }

    /// Automation variant: `caller` pays and receives refunds, `user` receives the tickets.
    #[instrument(skip_all, fields(automation = %caller.short(), user = %user.short()))]
    pub fn request_for(
        &mut self,
        rt: &mut dyn Runtime,
        caller: AccountId,
        user: AccountId,
        ticket_count: u64,
        collateral: u128,
    ) -> Result<RequestReceipt> {
        self.ensure_automation(caller)?;
        self.submit(rt, user, caller, ticket_count, collateral, true)
    }

    fn submit(
        &mut self,
        rt: &mut dyn Runtime,
        user: AccountId,
        payer: AccountId,
        ticket_count: u64,
        collateral: u128,
        strict: bool,
    ) -> Result<RequestReceipt> {
        let out = self.guarded("request", |eng| {
            eng.enqueue(rt, user, payer, ticket_count, collateral, strict)
        });
        if out.is_err() {
            self.metrics.requests_rejected.inc();
        }
        out
    }

    fn enqueue(
        &mut self,
        rt: &mut dyn Runtime,
        user: AccountId,
        payer: AccountId,
        ticket_count: u64,
        collateral: u128,
        strict: bool,
    ) -> Result<RequestReceipt> {
        // Preconditions:
        // - `user` is eligible on the asset ledger
        // - `0 < ticket_count <= epoch_ticket_cap`
        // - `collateral >= ticket_count * unit_price`
        if !rt.is_eligible(user) {
            return Err(IssuanceError::Ineligible(format!(
                "{} does not meet the holding requirement",
                user.short()
            )));
        }
        if ticket_count == 0 {
            return Err(IssuanceError::InvalidInput(
                "ticket_count must be > 0".into(),
            ));
        }
        if ticket_count > self.params.epoch_ticket_cap {
            return Err(IssuanceError::CapacityExceeded(format!(
                "ticket_count {ticket_count} exceeds epoch cap {}",
                self.params.epoch_ticket_cap
            )));
        }
        let required = self
            .params
            .unit_price
            .checked_mul(ticket_count as u128)
            .ok_or_else(|| IssuanceError::BoundedValueExceeded("required collateral".into()))?;
        if collateral < required {
            return Err(IssuanceError::InvalidInput(format!(
                "collateral {collateral} below required {required}"
            )));
        }
        let excess = sub_u128(collateral, required)?;
        let next_refund = add_u128(self.store.refund_balance(payer), excess)?;

        // Commit after all fallible computations.
        if excess > 0 {
            self.store.refunds.insert(payer, next_refund);
        }
        let creation_height = rt.height();
        let id = self.store.requests.push(NewRequest {
            user,
            payer,
            creation_height,
            locked_collateral: required,
            ticket_count,
            strict,
        });
        self.metrics.requests_total.inc();
        self.metrics
            .pending_requests
            .set(self.store.requests.open_total() as u64);
        debug!(
            request_id = id.0,
            creation_height,
            locked = required,
            refunded = excess,
            strict,
            "request queued"
        );
        Ok(RequestReceipt {
            id,
            user,
            locked: required,
            refunded: excess,
            creation_height,
        })
    }

    /// Finalizes up to `max_count` of the caller's oldest requests.
    #[instrument(skip_all, fields(user = %caller.short(), max_count = max_count))]
    pub fn finalize(
        &mut self,
        rt: &mut dyn Runtime,
        caller: AccountId,
        max_count: u32,
    ) -> Result<FinalizeReport> {
        self.guarded("finalize", |eng| eng.process_queue(rt, caller, max_count))
    }

    /// Automation variant of [`finalize`](Self::finalize) on behalf of `user`.
    #[instrument(skip_all, fields(automation = %caller.short(), user = %user.short()))]
    pub fn finalize_for(
        &mut self,
        rt: &mut dyn Runtime,
        caller: AccountId,
        user: AccountId,
        max_count: u32,
    ) -> Result<FinalizeReport> {
        self.ensure_automation(caller)?;
        self.guarded("finalize", |eng| eng.process_queue(rt, user, max_count))
    }

    fn process_queue(
        &mut self,
        rt: &mut dyn Runtime,
        user: AccountId,
        max_count: u32,
    ) -> Result<FinalizeReport> {
        if max_count == 0 {
            return Err(IssuanceError::InvalidInput("max_count must be > 0".into()));
        }
        if max_count > MAX_FINALIZE_BATCH {
            return Err(IssuanceError::BoundedValueExceeded(format!(
                "max_count {max_count} > {MAX_FINALIZE_BATCH}"
            )));
        }
        let head = self
            .store
            .requests
            .front(user)
            .cloned()
            .ok_or_else(|| IssuanceError::InvalidState("no pending requests".into()))?;

        let height = rt.height();
        let epoch = self.genesis.epoch_at(rt.now());
        let holding_bonus = rt.holding_bonus_bps(user);
        // Resolved once per call; only a streak-triggering contribution recomputes it.
        let call_days = self.store.streaks.get(&user).map(|s| s.days).unwrap_or(0);
        let call_multiplier = resolve_multiplier(holding_bonus, call_days)?.total_bps;

        let mut report = FinalizeReport::default();
        for _ in 0..max_count {
            let Some(req) = self.store.requests.front(user).cloned() else {
                break;
            };
            let settled = match classify(&req, height, self.genesis.expiry_horizon()) {
                RequestStatus::Created => {
                    report.blocked = true;
                    break;
                }
                RequestStatus::Expired => self.refund_request(&req, RefundReason::Expired),
                RequestStatus::Ready if !rt.is_eligible(user) => {
                    self.refund_request(&req, RefundReason::EligibilityLost)
                }
                RequestStatus::Ready => match rt.seed_at(req.creation_height) {
                    None => self.refund_request(&req, RefundReason::SeedUnavailable),
                    Some(seed) => {
                        match self.mine_request(rt, &req, epoch, seed, holding_bonus, call_multiplier)
                        {
                            Ok(item) => Ok(item),
                            Err(err) => {
                                warn!(request_id = req.id.0, error = %err, "contribution rejected");
                                let reason = match err {
                                    IssuanceError::CapacityExceeded(_) => {
                                        RefundReason::CapacityExhausted
                                    }
                                    _ => RefundReason::Rejected,
                                };
                                self.refund_request(&req, reason)
                            }
                        }
                    }
                },
            };
            match settled {
                Ok(item) => report.items.push(item),
                // Nothing committed yet: the call fails as a whole.
                Err(err) if report.items.is_empty() => return Err(err),
                Err(err) => {
                    warn!(request_id = req.id.0, error = %err, "batch stopped at unsettled request");
                    report.failed = Some(req.id);
                    break;
                }
            }
        }

        self.metrics
            .pending_requests
            .set(self.store.requests.open_total() as u64);
        if report.items.is_empty() {
            return Err(IssuanceError::InvalidState(format!(
                "request {} not ready before height {}",
                head.id.0,
                head.creation_height.saturating_add(1)
            )));
        }
        Ok(report)
    }

    fn refund_request(
        &mut self,
        req: &PendingRequest,
        reason: RefundReason,
    ) -> Result<FinalizedItem> {
        let next_refund = add_u128(self.store.refund_balance(req.payer), req.locked_collateral)?;
        let outcome = RequestOutcome::Refunded {
            reason,
            amount: req.locked_collateral,
        };
        self.store.requests.settle_front(req.user, outcome)?;
        self.store.refunds.insert(req.payer, next_refund);

        self.metrics.finalized_total.inc();
        self.metrics.refunded_total.inc();
        if reason == RefundReason::Expired {
            self.metrics.expired_total.inc();
        }
        debug!(request_id = req.id.0, ?reason, amount = req.locked_collateral, "request refunded");
        Ok(FinalizedItem {
            id: req.id,
            outcome,
            epoch: None,
            streak: None,
            jackpot: None,
        })
    }

    fn mine_request(
        &mut self,
        rt: &mut dyn Runtime,
        req: &PendingRequest,
        epoch: EpochId,
        seed: Hash32,
        holding_bonus: u32,
        call_multiplier: u32,
    ) -> Result<FinalizedItem> {
        let now = rt.now();
        let user = req.user;

        let streak_update = if self.store.ledger.is_first_contribution(epoch, user) {
            let (min, max) = self.params.streak_windows();
            let (record, transition) =
                advance_streak(self.store.streaks.get(&user).copied(), now, min, max);
            let multiplier = resolve_multiplier(holding_bonus, record.days)?;
            Some((record, transition, multiplier.total_bps))
        } else {
            None
        };
        let multiplier_bps = streak_update.map(|(_, _, m)| m).unwrap_or(call_multiplier);

        let (tickets, collateral, unfilled) = if req.strict {
            (req.ticket_count, req.locked_collateral, 0)
        } else {
            let remaining = self
                .store
                .ledger
                .remaining_capacity(epoch, self.params.epoch_ticket_cap);
            let fill = req.ticket_count.min(remaining);
            if fill == 0 {
                return Err(IssuanceError::CapacityExceeded(format!(
                    "epoch {} is full",
                    epoch.0
                )));
            }
            let used =
                mul_div_floor_u128(req.locked_collateral, fill as u128, req.ticket_count as u128)?;
            (fill, used, sub_u128(req.locked_collateral, used)?)
        };

        let plan = self.store.ledger.plan(
            &Contribution {
                epoch,
                user,
                tickets,
                collateral,
                multiplier_bps,
            },
            &ContributionRules {
                linear_threshold: self.genesis.linear_threshold(),
                epoch_ticket_cap: self.params.epoch_ticket_cap,
                jackpot_share: self.params.jackpot_share_bps,
                base_emission: self.params.base_emission,
                surge_tiers: &self.params.surge_tiers,
            },
        )?;
        let next_refund = add_u128(self.store.refund_balance(req.payer), unfilled)?;

        // Commit after all fallible computations.
        self.store.jackpot.fund(user, collateral, plan.jackpot_cut)?;
        self.store.ledger.commit(&plan);
        if let Some((record, _, _)) = streak_update {
            self.store.streaks.insert(user, record);
        }
        if unfilled > 0 {
            self.store.refunds.insert(req.payer, next_refund);
        }
        let outcome = RequestOutcome::Mined {
            tickets,
            weighted: plan.weighted_delta,
            refunded: unfilled,
        };
        self.store.requests.settle_front(user, outcome)?;

        self.metrics.finalized_total.inc();
        self.metrics.mined_total.inc();
        self.metrics.tickets_mined_total.inc_by(tickets);
        info!(
            request_id = req.id.0,
            epoch = epoch.0,
            tickets,
            weighted = plan.weighted_delta,
            multiplier_bps,
            first_in_epoch = plan.first_in_epoch,
            "request mined"
        );

        let draw = DrawInput {
            seed,
            user,
            tickets,
            engine: self.roles.engine,
            timestamp: now,
            entropy: rt.entropy(),
        };
        let jackpot = self.run_jackpot(rt, draw);

        Ok(FinalizedItem {
            id: req.id,
            outcome,
            epoch: Some(epoch),
            streak: streak_update.map(|(_, t, _)| t),
            jackpot,
        })
    }

    /// Single jackpot draw for an accepted contribution. Never fails the contribution.
    fn run_jackpot(&mut self, rt: &mut dyn Runtime, input: DrawInput) -> Option<JackpotPayout> {
        let payout = match self.store.jackpot.try_trigger(
            &input,
            self.params.jackpot_chance_bps,
            self.params.jackpot_payout_bps,
        ) {
            Ok(Some(payout)) => payout,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "jackpot draw skipped");
                return None;
            }
        };
        self.metrics.jackpot_hits_total.inc();
        info!(
            user = %input.user.short(),
            collateral = payout.collateral,
            tokens = payout.tokens,
            "jackpot hit"
        );

        if payout.collateral > 0 && !rt.send_collateral(input.user, payout.collateral) {
            self.metrics.jackpot_transfer_failures.inc();
            match self.store.credit_refund(input.user, payout.collateral) {
                Ok(()) => warn!(amount = payout.collateral, "jackpot collateral moved to refunds"),
                Err(err) => warn!(error = %err, "jackpot collateral could not be credited"),
            }
        }
        if payout.tokens > 0 && !rt.transfer(self.roles.engine, input.user, payout.tokens) {
            self.metrics.jackpot_transfer_failures.inc();
            match self.store.jackpot.restore_tokens(input.user, payout.tokens) {
                Ok(()) => warn!(amount = payout.tokens, "jackpot tokens returned to pool"),
                Err(err) => warn!(error = %err, "jackpot tokens could not be restored"),
            }
        }
        Some(payout)
    }

    /// Pays out the caller's whole refund balance.
    #[instrument(skip_all, fields(user = %caller.short()))]
    pub fn withdraw_refund(&mut self, rt: &mut dyn Runtime, caller: AccountId) -> Result<u128> {
        self.guarded("withdraw_refund", |eng| {
            let amount = eng.store.refund_balance(caller);
            if amount == 0 {
                return Err(IssuanceError::InvalidState("no refund balance".into()));
            }
            let _ = eng.store.refunds.remove(&caller);
            if !rt.send_collateral(caller, amount) {
                eng.store.refunds.insert(caller, amount);
                return Err(IssuanceError::TransferFailed(format!(
                    "refund of {amount} rejected by recipient"
                )));
            }
            eng.metrics.refunds_withdrawn_total.inc();
            info!(amount, "refund withdrawn");
            Ok(amount)
        })
    }
}

impl FeeNotificationHandler for IssuanceEngine {
    fn on_jackpot_fee(&mut self, from: AccountId, amount: u128) -> Result<()> {
        self.guarded("on_jackpot_fee", |eng| {
            if from != eng.roles.asset_ledger {
                return Err(IssuanceError::Unauthorized(format!(
                    "fee notification from {}",
                    from.short()
                )));
            }
            eng.store.jackpot.credit_tokens(amount)?;
            debug!(amount, token_pool = eng.store.jackpot.token_pool(), "jackpot fee credited");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::SimulatedChain;
    use crate::issuance::types::Bps;

    const PRICE: u128 = 20_000_000_000_000;

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

    fn setup() -> (IssuanceEngine, SimulatedChain) {
        let config = EngineConfig::builder()
            .genesis_time(1_000_000)
            .unit_price(PRICE)
            .linear_threshold(1_000)
            .jackpot(0, 5_000)
            .build()
            .unwrap();
        let engine = IssuanceEngine::new(&config, roles()).unwrap();
        let mut chain = SimulatedChain::new(1_000_000, 100);
        chain.assets.set_eligible(id(1), true);
        (engine, chain)
    }

    #[test]
    fn overpayment_is_credited_immediately() {
        let (mut engine, mut chain) = setup();
        let receipt = engine
            .request(&mut chain, id(1), 5, 150_000_000_000_000)
            .unwrap();
        assert_eq!(receipt.locked, 100_000_000_000_000);
        assert_eq!(receipt.refunded, 50_000_000_000_000);
        assert_eq!(engine.store.refund_balance(id(1)), 50_000_000_000_000);
        assert_eq!(receipt.creation_height, 100);
    }

    #[test]
    fn request_validation_is_atomic() {
        let (mut engine, mut chain) = setup();
        assert!(matches!(
            engine.request(&mut chain, id(2), 1, PRICE),
            Err(IssuanceError::Ineligible(_))
        ));
        assert!(matches!(
            engine.request(&mut chain, id(1), 0, PRICE),
            Err(IssuanceError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.request(&mut chain, id(1), 2, PRICE * 2 - 1),
            Err(IssuanceError::InvalidInput(_))
        ));
        assert_eq!(engine.store.requests.pending_count(id(1)), 0);
        assert_eq!(engine.store.refund_balance(id(1)), 0);
        assert_eq!(engine.metrics.requests_rejected.get(), 3);
    }

    #[test]
    fn finalize_in_same_height_is_not_ready() {
        let (mut engine, mut chain) = setup();
        engine.request(&mut chain, id(1), 1, PRICE).unwrap();
        let err = engine.finalize(&mut chain, id(1), 4).unwrap_err();
        assert!(matches!(err, IssuanceError::InvalidState(_)));
        assert_eq!(engine.store.requests.pending_count(id(1)), 1);
    }

    #[test]
    fn missing_seed_refunds() {
        let (mut engine, mut chain) = setup();
        chain.host.set_seed_retention(2);
        engine.request(&mut chain, id(1), 1, PRICE).unwrap();
        chain.advance_blocks(3);
        let report = engine.finalize(&mut chain, id(1), 1).unwrap();
        assert_eq!(
            report.items[0].outcome,
            RequestOutcome::Refunded {
                reason: RefundReason::SeedUnavailable,
                amount: PRICE
            }
        );
    }

    #[test]
    fn unsettled_request_stops_batch_after_committed_items() {
        let config = EngineConfig::builder()
            .genesis_time(1_000_000)
            .unit_price(PRICE)
            .epoch_ticket_cap(1)
            .jackpot(0, 5_000)
            .build()
            .unwrap();
        let mut engine = IssuanceEngine::new(&config, roles()).unwrap();
        let mut chain = SimulatedChain::new(1_000_000, 100);
        chain.assets.set_eligible(id(1), true);

        engine.request(&mut chain, id(1), 1, PRICE).unwrap();
        engine.request(&mut chain, id(1), 1, PRICE).unwrap();
        // The second request no longer fits the cap and its refund cannot be credited.
        engine.store.refunds.insert(id(1), u128::MAX);
        chain.advance_blocks(1);

        let report = engine.finalize(&mut chain, id(1), 2).unwrap();
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.mined_tickets(), 1);
        assert_eq!(report.failed, Some(RequestId(1)));
        assert!(!report.blocked);
        assert_eq!(engine.store.requests.pending_count(id(1)), 1);
        assert_eq!(engine.store.ledger.epoch(EpochId(0)).unwrap().raw_ticket_total, 1);
        assert_eq!(engine.store.refund_balance(id(1)), u128::MAX);
        assert_eq!(engine.metrics.pending_requests.get(), 1);

        assert!(matches!(
            engine.finalize(&mut chain, id(1), 2),
            Err(IssuanceError::BoundedValueExceeded(_))
        ));
        assert_eq!(engine.store.requests.pending_count(id(1)), 1);

        engine.store.refunds.remove(&id(1));
        let report = engine.finalize(&mut chain, id(1), 2).unwrap();
        assert_eq!(
            report.items[0].outcome,
            RequestOutcome::Refunded {
                reason: RefundReason::CapacityExhausted,
                amount: PRICE
            }
        );
        assert_eq!(report.failed, None);
    }

    #[test]
    fn guard_rejects_nested_operations() {
        let (mut engine, mut chain) = setup();
        engine.entered = Some("claim");
        assert_eq!(
            engine.request(&mut chain, id(1), 1, PRICE),
            Err(IssuanceError::Reentrancy("claim"))
        );
        assert_eq!(
            engine.on_jackpot_fee(roles().asset_ledger, 10),
            Err(IssuanceError::Reentrancy("claim"))
        );
        assert_eq!(engine.metrics.reentrancy_rejections.get(), 2);

        engine.entered = None;
        engine.on_jackpot_fee(roles().asset_ledger, 10).unwrap();
        assert_eq!(engine.store.jackpot.token_pool(), 10);
    }

    #[test]
    fn fee_notification_only_from_asset_ledger() {
        let (mut engine, _) = setup();
        assert!(matches!(
            engine.on_jackpot_fee(id(7), 10),
            Err(IssuanceError::Unauthorized(_))
        ));
        assert_eq!(engine.store.jackpot.token_pool(), 0);
    }

    #[test]
    fn failed_collateral_jackpot_is_credited_to_refunds() {
        let (mut engine, mut chain) = setup();
        engine.params.jackpot_chance_bps = Bps::MAX;
        chain.host.reject_collateral(id(1));

        engine.request(&mut chain, id(1), 10, PRICE * 10).unwrap();
        chain.advance_blocks(1);
        let report = engine.finalize(&mut chain, id(1), 1).unwrap();
        let payout = report.items[0].jackpot.expect("certain hit");

        // 10% of 10 tickets' collateral funds the pool; half of it pays out.
        assert_eq!(payout.collateral, PRICE / 2);
        assert_eq!(engine.store.refund_balance(id(1)), PRICE / 2);
        assert_eq!(engine.store.jackpot.collateral_pool(), PRICE / 2);
        assert_eq!(engine.metrics.jackpot_transfer_failures.get(), 1);
    }

    #[test]
    fn withdraw_refund_restores_on_failure() {
        let (mut engine, mut chain) = setup();
        engine.request(&mut chain, id(1), 1, PRICE + 5).unwrap();
        chain.host.reject_collateral(id(1));
        assert!(matches!(
            engine.withdraw_refund(&mut chain, id(1)),
            Err(IssuanceError::TransferFailed(_))
        ));
        assert_eq!(engine.store.refund_balance(id(1)), 5);

        chain.host.accept_collateral(id(1));
        assert_eq!(engine.withdraw_refund(&mut chain, id(1)).unwrap(), 5);
        assert_eq!(chain.host.collateral_paid(id(1)), 5);
        assert!(engine.withdraw_refund(&mut chain, id(1)).is_err());
    }
}
