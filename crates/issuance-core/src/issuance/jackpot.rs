//! Jackpot side pools and the per-contribution draw.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::hash::jackpot_draw_hash_v1;
use crate::{AccountId, Hash32, Result};

use super::math::{add_u128, floor_bps, sub_u128};
use super::types::{Bps, BPS_U128};

/// Lifetime jackpot totals for one user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct JackpotStats {
    /// Collateral contributed through mined requests.
    pub contributed: u128,
    /// Portion of that collateral routed into the collateral pool.
    pub sent_to_jackpot: u128,
    pub won_collateral: u128,
    pub won_tokens: u128,
    pub hits: u64,
}

/// Preimage fields of one draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawInput {
    /// Host seed at the request's creation height.
    pub seed: Hash32,
    pub user: AccountId,
    pub tickets: u64,
    pub engine: AccountId,
    pub timestamp: u64,
    pub entropy: Hash32,
}

/// Draw reduced to `[0, 10_000)`.
pub fn draw_value(input: &DrawInput) -> u16 {
    let digest = jackpot_draw_hash_v1(
        input.seed,
        input.user,
        input.tickets,
        input.engine,
        input.timestamp,
        input.entropy,
    );
    let mut head = [0u8; 16];
    head.copy_from_slice(&digest.0[..16]);
    (u128::from_be_bytes(head) % BPS_U128) as u16
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct JackpotPayout {
    pub collateral: u128,
    pub tokens: u128,
}

#[derive(Clone, Debug, Default)]
pub struct JackpotPools {
    collateral_pool: u128,
    token_pool: u128,
    stats: BTreeMap<AccountId, JackpotStats>,
}

impl JackpotPools {
    pub fn new() -> JackpotPools {
        JackpotPools::default()
    }

    pub fn collateral_pool(&self) -> u128 {
        self.collateral_pool
    }

    pub fn token_pool(&self) -> u128 {
        self.token_pool
    }

    pub fn stats(&self, user: AccountId) -> JackpotStats {
        self.stats.get(&user).copied().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.collateral_pool == 0 && self.token_pool == 0
    }

    /// Routes a contribution's jackpot cut into the collateral pool.
    pub fn fund(&mut self, user: AccountId, contributed: u128, cut: u128) -> Result<()> {
        let prev = self.stats(user);
        let next_pool = add_u128(self.collateral_pool, cut)?;
        let next = JackpotStats {
            contributed: add_u128(prev.contributed, contributed)?,
            sent_to_jackpot: add_u128(prev.sent_to_jackpot, cut)?,
            ..prev
        };
        self.collateral_pool = next_pool;
        self.stats.insert(user, next);
        Ok(())
    }

    /// Runs the single draw for one contribution.
    ///
    /// Returns `None` when the draw is skipped (no tickets, zero chance, empty pools) or misses.
    /// On a hit, pools and stats are debited before the caller moves any funds.
    pub fn try_trigger(
        &mut self,
        input: &DrawInput,
        chance: Bps,
        payout_share: Bps,
    ) -> Result<Option<JackpotPayout>> {
        if input.tickets == 0 || chance.get() == 0 || self.is_empty() {
            return Ok(None);
        }
        if draw_value(input) >= chance.get() {
            return Ok(None);
        }
        let payout = JackpotPayout {
            collateral: floor_bps(self.collateral_pool, payout_share)?,
            tokens: floor_bps(self.token_pool, payout_share)?,
        };
        self.take_payout(input.user, payout)?;
        Ok(Some(payout))
    }

    fn take_payout(&mut self, user: AccountId, payout: JackpotPayout) -> Result<()> {
        let prev = self.stats(user);
        let next_collateral = sub_u128(self.collateral_pool, payout.collateral)?;
        let next_tokens = sub_u128(self.token_pool, payout.tokens)?;
        let next = JackpotStats {
            won_collateral: add_u128(prev.won_collateral, payout.collateral)?,
            won_tokens: add_u128(prev.won_tokens, payout.tokens)?,
            hits: prev.hits.saturating_add(1),
            ..prev
        };
        self.collateral_pool = next_collateral;
        self.token_pool = next_tokens;
        self.stats.insert(user, next);
        Ok(())
    }

    /// Returns tokens whose transfer to the winner failed.
    pub fn restore_tokens(&mut self, user: AccountId, amount: u128) -> Result<()> {
        let prev = self.stats(user);
        let next_pool = add_u128(self.token_pool, amount)?;
        let won_tokens = sub_u128(prev.won_tokens, amount)?;
        self.token_pool = next_pool;
        self.stats.insert(
            user,
            JackpotStats {
                won_tokens,
                ..prev
            },
        );
        Ok(())
    }

    /// Fee inflow from the asset ledger.
    pub fn credit_tokens(&mut self, amount: u128) -> Result<()> {
        self.token_pool = add_u128(self.token_pool, amount)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn input(seed: [u8; 32], tickets: u64) -> DrawInput {
        DrawInput {
            seed: Hash32(seed),
            user: AccountId([1; 32]),
            tickets,
            engine: AccountId([9; 32]),
            timestamp: 1_700_000_000,
            entropy: Hash32([7; 32]),
        }
    }

    fn bps(v: u16) -> Bps {
        Bps::new(v).unwrap()
    }

    #[test]
    fn certain_hit_pays_share_of_each_pool() {
        let mut pools = JackpotPools::new();
        pools.fund(AccountId([1; 32]), 1_000, 101).unwrap();
        pools.credit_tokens(50).unwrap();

        let payout = pools
            .try_trigger(&input([3; 32], 4), Bps::MAX, bps(5_000))
            .unwrap()
            .expect("chance 10000 always hits");
        assert_eq!(payout, JackpotPayout { collateral: 50, tokens: 25 });
        assert_eq!(pools.collateral_pool(), 51);
        assert_eq!(pools.token_pool(), 25);

        let stats = pools.stats(AccountId([1; 32]));
        assert_eq!(stats.contributed, 1_000);
        assert_eq!(stats.sent_to_jackpot, 101);
        assert_eq!(stats.won_collateral, 50);
        assert_eq!(stats.won_tokens, 25);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn draw_is_skipped_without_tickets_chance_or_funds() {
        let mut pools = JackpotPools::new();
        assert_eq!(
            pools.try_trigger(&input([3; 32], 4), Bps::MAX, bps(5_000)).unwrap(),
            None
        );
        pools.credit_tokens(10).unwrap();
        assert_eq!(
            pools.try_trigger(&input([3; 32], 0), Bps::MAX, bps(5_000)).unwrap(),
            None
        );
        assert_eq!(
            pools.try_trigger(&input([3; 32], 4), Bps::ZERO, bps(5_000)).unwrap(),
            None
        );
        assert_eq!(pools.token_pool(), 10);
    }

    #[test]
    fn failed_token_transfer_is_restored() {
        let user = AccountId([1; 32]);
        let mut pools = JackpotPools::new();
        pools.credit_tokens(100).unwrap();
        let payout = pools
            .try_trigger(&input([5; 32], 1), Bps::MAX, bps(2_000))
            .unwrap()
            .unwrap();
        assert_eq!(payout.tokens, 20);
        pools.restore_tokens(user, payout.tokens).unwrap();
        assert_eq!(pools.token_pool(), 100);
        assert_eq!(pools.stats(user).won_tokens, 0);
    }

    #[test]
    fn hit_frequency_converges_to_chance() {
        let mut rng = StdRng::seed_from_u64(0x15_5AE);
        let draws = 200_000u32;
        let mut hits = 0u32;
        for _ in 0..draws {
            let seed: [u8; 32] = rng.gen();
            if draw_value(&input(seed, rng.gen_range(1..100))) < 25 {
                hits += 1;
            }
        }
        // Expected 500 hits (0.25%), standard deviation ~22.
        assert!((400..=600).contains(&hits), "hits = {hits}");
    }

    #[test]
    fn payout_never_exceeds_share_of_pool() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let mut pools = JackpotPools::new();
            let collateral: u64 = rng.gen();
            let tokens: u64 = rng.gen();
            pools.fund(AccountId([1; 32]), collateral as u128, collateral as u128).unwrap();
            pools.credit_tokens(tokens as u128).unwrap();
            let share = rng.gen_range(0..=10_000u16);
            let payout = pools
                .try_trigger(&input(rng.gen(), 1), Bps::MAX, bps(share))
                .unwrap()
                .unwrap();
            assert!(payout.collateral * 10_000 <= collateral as u128 * share as u128);
            assert!(payout.tokens * 10_000 <= tokens as u128 * share as u128);
        }
    }
}
