//! Interfaces the engine consumes from (and exposes to) its host environment.

use crate::{AccountId, Hash32, Result};

/// Balance, transfer, eligibility and holding-tier lookups for the reward asset.
pub trait AssetLedger {
    fn balance_of(&self, who: AccountId) -> u128;

    /// Moves `amount` from `from` to `to`. Returns `false` if the ledger rejected the transfer.
    fn transfer(&mut self, from: AccountId, to: AccountId, amount: u128) -> bool;

    /// Minimum tier balance held continuously for the minimum duration.
    fn is_eligible(&self, who: AccountId) -> bool;

    /// Holding-tier bonus in bps (added on top of the 10_000 base multiplier).
    fn holding_bonus_bps(&self, who: AccountId) -> u32;
}

/// Execution environment: block counter, clock, seeds and collateral payouts.
pub trait Host {
    /// Monotonically increasing counter (block height).
    fn height(&self) -> u64;

    /// Current Unix timestamp in seconds.
    fn now(&self) -> u64;

    /// Seed committed at `height`. `None` until the host has moved past `height`, and again once
    /// the host no longer retains it.
    fn seed_at(&self, height: u64) -> Option<Hash32>;

    /// Per-call entropy mixed into jackpot draws.
    fn entropy(&self) -> Hash32;

    /// Pays `amount` of collateral out of the engine. Returns `false` if the recipient refused it.
    fn send_collateral(&mut self, to: AccountId, amount: u128) -> bool;
}

/// Everything an engine operation can touch.
pub trait Runtime: Host + AssetLedger {}

impl<T: Host + AssetLedger + ?Sized> Runtime for T {}

/// Inbound fee notification from the asset ledger.
///
/// Callers discard the result: a rejected notification must never block the transfer that
/// produced the fee.
pub trait FeeNotificationHandler {
    fn on_jackpot_fee(&mut self, from: AccountId, amount: u128) -> Result<()>;
}
