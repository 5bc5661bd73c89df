//! In-memory implementations of the engine's collaborator traits.
//!
//! Useful for testing, simulation, and single-process integration scenarios.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::hash::height_seed_v1;
use crate::issuance::math::floor_bps;
use crate::issuance::{AssetLedger, Bps, FeeNotificationHandler, Host};
use crate::{AccountId, Hash32};

/// Seconds the simulated host advances per block.
pub const SIMULATED_BLOCK_SECS: u64 = 12;

/// Default number of past heights whose seed stays retrievable.
pub const DEFAULT_SEED_RETENTION: u64 = 256;

// =============================================================================
// InMemoryAssetLedger
// =============================================================================

/// Balance map with configurable eligibility, holding bonuses and refusing recipients.
#[derive(Clone, Debug, Default)]
pub struct InMemoryAssetLedger {
    id: AccountId,
    balances: BTreeMap<AccountId, u128>,
    eligible: BTreeSet<AccountId>,
    bonuses: BTreeMap<AccountId, u32>,
    refusing: BTreeSet<AccountId>,
}

impl InMemoryAssetLedger {
    pub fn new(id: AccountId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Identity used as the sender of fee notifications.
    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn mint(&mut self, who: AccountId, amount: u128) {
        let balance = self.balances.entry(who).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    pub fn balance(&self, who: AccountId) -> u128 {
        self.balances.get(&who).copied().unwrap_or(0)
    }

    pub fn set_eligible(&mut self, who: AccountId, eligible: bool) {
        if eligible {
            self.eligible.insert(who);
        } else {
            self.eligible.remove(&who);
        }
    }

    pub fn set_holding_bonus(&mut self, who: AccountId, bonus_bps: u32) {
        self.bonuses.insert(who, bonus_bps);
    }

    /// Makes every transfer to `who` fail.
    pub fn reject_incoming(&mut self, who: AccountId) {
        self.refusing.insert(who);
    }

    pub fn accept_incoming(&mut self, who: AccountId) {
        self.refusing.remove(&who);
    }

    /// Transfers `amount`, routing `fee_bps` of it to the engine's account and notifying the
    /// engine. A rejected notification is discarded; the transfer still succeeds.
    pub fn transfer_with_jackpot_fee(
        &mut self,
        handler: &mut dyn FeeNotificationHandler,
        engine: AccountId,
        from: AccountId,
        to: AccountId,
        amount: u128,
        fee_bps: Bps,
    ) -> bool {
        let fee = floor_bps(amount, fee_bps).unwrap_or(0);
        if !self.transfer(from, to, amount - fee) {
            return false;
        }
        if fee > 0 && self.transfer(from, engine, fee) {
            if let Err(err) = handler.on_jackpot_fee(self.id, fee) {
                debug!(error = %err, fee, "jackpot fee notification discarded");
            }
        }
        true
    }
}

impl AssetLedger for InMemoryAssetLedger {
    fn balance_of(&self, who: AccountId) -> u128 {
        self.balance(who)
    }

    fn transfer(&mut self, from: AccountId, to: AccountId, amount: u128) -> bool {
        if self.refusing.contains(&to) {
            return false;
        }
        if amount == 0 {
            return true;
        }
        let from_balance = self.balance(from);
        if from_balance < amount {
            return false;
        }
        self.balances.insert(from, from_balance - amount);
        self.mint(to, amount);
        true
    }

    fn is_eligible(&self, who: AccountId) -> bool {
        self.eligible.contains(&who)
    }

    fn holding_bonus_bps(&self, who: AccountId) -> u32 {
        self.bonuses.get(&who).copied().unwrap_or(0)
    }
}

// =============================================================================
// SimulatedHost
// =============================================================================

/// Block-height / clock simulator with deterministic per-height seeds.
#[derive(Clone, Debug)]
pub struct SimulatedHost {
    height: u64,
    now: u64,
    salt: Hash32,
    seed_retention: u64,
    refusing: BTreeSet<AccountId>,
    paid: BTreeMap<AccountId, u128>,
}

impl SimulatedHost {
    pub fn new(now: u64, height: u64) -> Self {
        Self {
            height,
            now,
            salt: Hash32([0x5A; 32]),
            seed_retention: DEFAULT_SEED_RETENTION,
            refusing: BTreeSet::new(),
            paid: BTreeMap::new(),
        }
    }

    pub fn set_seed_retention(&mut self, heights: u64) {
        self.seed_retention = heights;
    }

    /// Advances `blocks` heights and the clock by `SIMULATED_BLOCK_SECS` per block.
    pub fn advance_blocks(&mut self, blocks: u64) {
        self.height = self.height.saturating_add(blocks);
        self.now = self
            .now
            .saturating_add(blocks.saturating_mul(SIMULATED_BLOCK_SECS));
    }

    /// Advances the clock only.
    pub fn advance_time(&mut self, secs: u64) {
        self.now = self.now.saturating_add(secs);
    }

    pub fn reject_collateral(&mut self, who: AccountId) {
        self.refusing.insert(who);
    }

    pub fn accept_collateral(&mut self, who: AccountId) {
        self.refusing.remove(&who);
    }

    /// Total collateral paid out to `who`.
    pub fn collateral_paid(&self, who: AccountId) -> u128 {
        self.paid.get(&who).copied().unwrap_or(0)
    }
}

impl Host for SimulatedHost {
    fn height(&self) -> u64 {
        self.height
    }

    fn now(&self) -> u64 {
        self.now
    }

    fn seed_at(&self, height: u64) -> Option<Hash32> {
        if height < self.height && self.height - height <= self.seed_retention {
            Some(height_seed_v1(self.salt, height))
        } else {
            None
        }
    }

    fn entropy(&self) -> Hash32 {
        height_seed_v1(self.salt, self.now)
    }

    fn send_collateral(&mut self, to: AccountId, amount: u128) -> bool {
        if self.refusing.contains(&to) {
            return false;
        }
        let paid = self.paid.entry(to).or_insert(0);
        *paid = paid.saturating_add(amount);
        true
    }
}

// =============================================================================
// SimulatedChain
// =============================================================================

/// Host and asset ledger bundled into one [`Runtime`](crate::issuance::Runtime).
#[derive(Clone, Debug)]
pub struct SimulatedChain {
    pub host: SimulatedHost,
    pub assets: InMemoryAssetLedger,
}

impl SimulatedChain {
    pub fn new(now: u64, height: u64) -> Self {
        Self {
            host: SimulatedHost::new(now, height),
            assets: InMemoryAssetLedger::default(),
        }
    }

    pub fn with_asset_ledger_id(mut self, id: AccountId) -> Self {
        self.assets.id = id;
        self
    }

    pub fn advance_blocks(&mut self, blocks: u64) {
        self.host.advance_blocks(blocks);
    }

    pub fn advance_time(&mut self, secs: u64) {
        self.host.advance_time(secs);
    }
}

impl Host for SimulatedChain {
    fn height(&self) -> u64 {
        self.host.height()
    }

    fn now(&self) -> u64 {
        self.host.now()
    }

    fn seed_at(&self, height: u64) -> Option<Hash32> {
        self.host.seed_at(height)
    }

    fn entropy(&self) -> Hash32 {
        self.host.entropy()
    }

    fn send_collateral(&mut self, to: AccountId, amount: u128) -> bool {
        self.host.send_collateral(to, amount)
    }
}

impl AssetLedger for SimulatedChain {
    fn balance_of(&self, who: AccountId) -> u128 {
        self.assets.balance_of(who)
    }

    fn transfer(&mut self, from: AccountId, to: AccountId, amount: u128) -> bool {
        self.assets.transfer(from, to, amount)
    }

    fn is_eligible(&self, who: AccountId) -> bool {
        self.assets.is_eligible(who)
    }

    fn holding_bonus_bps(&self, who: AccountId) -> u32 {
        self.assets.holding_bonus_bps(who)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IssuanceError, Result};

    fn id(b: u8) -> AccountId {
        AccountId([b; 32])
    }

    #[test]
    fn seeds_exist_only_for_past_retained_heights() {
        let mut host = SimulatedHost::new(0, 10);
        host.set_seed_retention(3);
        assert!(host.seed_at(10).is_none());
        assert!(host.seed_at(11).is_none());
        assert!(host.seed_at(9).is_some());
        assert!(host.seed_at(7).is_some());
        assert!(host.seed_at(6).is_none());
        assert_eq!(host.seed_at(9), host.seed_at(9));
        assert_ne!(host.seed_at(9), host.seed_at(8));
    }

    #[test]
    fn transfers_respect_balances_and_refusals() {
        let mut ledger = InMemoryAssetLedger::new(id(0xAA));
        ledger.mint(id(1), 100);
        assert!(!ledger.transfer(id(1), id(2), 101));
        assert!(ledger.transfer(id(1), id(2), 60));
        ledger.reject_incoming(id(3));
        assert!(!ledger.transfer(id(1), id(3), 10));
        assert_eq!(ledger.balance(id(1)), 40);
        assert_eq!(ledger.balance(id(2)), 60);
    }

    struct Refusing(u32);

    impl FeeNotificationHandler for Refusing {
        fn on_jackpot_fee(&mut self, _from: AccountId, _amount: u128) -> Result<()> {
            self.0 += 1;
            Err(IssuanceError::Reentrancy("claim"))
        }
    }

    #[test]
    fn failing_fee_handler_never_blocks_transfer() {
        let mut ledger = InMemoryAssetLedger::new(id(0xAA));
        ledger.mint(id(1), 1_000);
        let mut handler = Refusing(0);
        assert!(ledger.transfer_with_jackpot_fee(
            &mut handler,
            id(9),
            id(1),
            id(2),
            1_000,
            Bps::new(100).unwrap()
        ));
        assert_eq!(handler.0, 1);
        assert_eq!(ledger.balance(id(2)), 990);
        assert_eq!(ledger.balance(id(9)), 10);
    }
}
