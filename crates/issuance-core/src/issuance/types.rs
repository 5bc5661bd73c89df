use crate::{config::EngineConfig, AccountId, IssuanceError, Result};
use serde::{Deserialize, Serialize};

pub const BPS_U16: u16 = 10_000;
pub const BPS_U32: u32 = 10_000;
pub const BPS_U128: u128 = 10_000;

/// Basis points in `[0, 10_000]` (correct-by-construction).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Bps(u16);

impl Bps {
    pub const ZERO: Bps = Bps(0);
    pub const MAX: Bps = Bps(BPS_U16);

    /// Constructs a bounded bps value.
    ///
    /// Preconditions:
    /// - `v <= 10_000` (else returns an error; fail-closed).
    pub fn new(v: u16) -> Result<Bps> {
        if v <= BPS_U16 {
            Ok(Bps(v))
        } else {
            Err(IssuanceError::InvalidInput(format!(
                "bps out of range: {v} > {BPS_U16}"
            )))
        }
    }

    pub fn get(self) -> u16 {
        self.0
    }

    pub fn as_u128(self) -> u128 {
        self.0 as u128
    }
}

impl TryFrom<u16> for Bps {
    type Error = IssuanceError;
    fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
        Bps::new(value)
    }
}

impl<'de> Deserialize<'de> for Bps {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let raw = u16::deserialize(d)?;
        Bps::new(raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EpochId(pub u64);

/// Sequential per-user request identifier (starts at 0).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// Fixed identities the engine operates with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Roles {
    /// Administrative identity for parameter setters and seeding.
    pub admin: AccountId,
    /// Destination of sweeps and recoveries.
    pub treasury: AccountId,
    /// The engine's own account on the asset ledger (custody of reward + jackpot tokens).
    pub engine: AccountId,
    /// The only sender accepted for jackpot fee notifications.
    pub asset_ledger: AccountId,
}

/// One surge tier: once an epoch's bonus base reaches `threshold`, `bonus` is added to its
/// emission. Tiers accumulate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurgeTier {
    pub threshold: u128,
    pub bonus: u128,
}

/// Genesis-fixed timing and shape constants (never admin-mutable).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GenesisParams {
    genesis_time: u64,
    epoch_length_secs: u64,
    claim_window_epochs: u64,
    sweep_delay_secs: u64,
    expiry_horizon: u64,
    linear_threshold: u64,
}

impl GenesisParams {
    /// Preconditions (enforced):
    /// - `epoch_length_secs > 0`, `claim_window_epochs > 0`, `expiry_horizon > 0`.
    pub fn new(
        genesis_time: u64,
        epoch_length_secs: u64,
        claim_window_epochs: u64,
        sweep_delay_secs: u64,
        expiry_horizon: u64,
        linear_threshold: u64,
    ) -> Result<GenesisParams> {
        if epoch_length_secs == 0 {
            return Err(IssuanceError::InvalidInput(
                "epoch_length_secs must be > 0".into(),
            ));
        }
        if claim_window_epochs == 0 {
            return Err(IssuanceError::InvalidInput(
                "claim_window_epochs must be > 0".into(),
            ));
        }
        if expiry_horizon == 0 {
            return Err(IssuanceError::InvalidInput(
                "expiry_horizon must be > 0".into(),
            ));
        }
        Ok(GenesisParams {
            genesis_time,
            epoch_length_secs,
            claim_window_epochs,
            sweep_delay_secs,
            expiry_horizon,
            linear_threshold,
        })
    }

    pub fn genesis_time(&self) -> u64 {
        self.genesis_time
    }

    pub fn epoch_length_secs(&self) -> u64 {
        self.epoch_length_secs
    }

    pub fn claim_window_epochs(&self) -> u64 {
        self.claim_window_epochs
    }

    pub fn sweep_delay_secs(&self) -> u64 {
        self.sweep_delay_secs
    }

    pub fn expiry_horizon(&self) -> u64 {
        self.expiry_horizon
    }

    pub fn linear_threshold(&self) -> u64 {
        self.linear_threshold
    }

    /// Epoch index at timestamp `now` (timestamps before genesis map to epoch 0).
    pub fn epoch_at(&self, now: u64) -> EpochId {
        EpochId(now.saturating_sub(self.genesis_time) / self.epoch_length_secs)
    }

    pub fn epoch_start(&self, epoch: EpochId) -> u64 {
        self.genesis_time
            .saturating_add(epoch.0.saturating_mul(self.epoch_length_secs))
    }

    pub fn epoch_end(&self, epoch: EpochId) -> u64 {
        self.epoch_start(EpochId(epoch.0.saturating_add(1)))
    }
}

/// Admin-mutable economic parameters (frozen once the engine is locked).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineParams {
    pub(crate) unit_price: u128,
    pub(crate) epoch_ticket_cap: u64,
    pub(crate) base_emission: u128,
    pub(crate) streak_min_window_secs: u64,
    pub(crate) streak_max_window_secs: u64,
    pub(crate) jackpot_chance_bps: Bps,
    pub(crate) jackpot_payout_bps: Bps,
    pub(crate) jackpot_share_bps: Bps,
    pub(crate) surge_tiers: Vec<SurgeTier>,
}

impl EngineParams {
    pub fn unit_price(&self) -> u128 {
        self.unit_price
    }

    pub fn epoch_ticket_cap(&self) -> u64 {
        self.epoch_ticket_cap
    }

    pub fn base_emission(&self) -> u128 {
        self.base_emission
    }

    pub fn streak_windows(&self) -> (u64, u64) {
        (self.streak_min_window_secs, self.streak_max_window_secs)
    }

    pub fn jackpot_chance_bps(&self) -> Bps {
        self.jackpot_chance_bps
    }

    pub fn jackpot_payout_bps(&self) -> Bps {
        self.jackpot_payout_bps
    }

    /// Share of every contribution's collateral routed into the collateral jackpot pool.
    pub fn jackpot_share_bps(&self) -> Bps {
        self.jackpot_share_bps
    }

    pub fn surge_tiers(&self) -> &[SurgeTier] {
        &self.surge_tiers
    }

    pub fn validate(&self) -> Result<()> {
        if self.unit_price == 0 {
            return Err(IssuanceError::InvalidInput("unit_price must be > 0".into()));
        }
        if self.epoch_ticket_cap == 0 {
            return Err(IssuanceError::InvalidInput(
                "epoch_ticket_cap must be > 0".into(),
            ));
        }
        validate_streak_windows(self.streak_min_window_secs, self.streak_max_window_secs)?;
        validate_surge_tiers(&self.surge_tiers)?;
        Ok(())
    }
}

pub(crate) fn validate_streak_windows(min: u64, max: u64) -> Result<()> {
    if min == 0 || min >= max {
        return Err(IssuanceError::InvalidInput(format!(
            "streak windows must satisfy 0 < min < max (got {min}, {max})"
        )));
    }
    Ok(())
}

/// Surge thresholds must be nonzero and strictly increasing.
pub(crate) fn validate_surge_tiers(tiers: &[SurgeTier]) -> Result<()> {
    let mut prev = 0u128;
    for (idx, tier) in tiers.iter().enumerate() {
        if tier.threshold <= prev {
            return Err(IssuanceError::InvalidInput(format!(
                "surge tier {idx} threshold must be nonzero and strictly increasing"
            )));
        }
        prev = tier.threshold;
    }
    Ok(())
}

impl TryFrom<&EngineConfig> for GenesisParams {
    type Error = IssuanceError;

    fn try_from(cfg: &EngineConfig) -> Result<GenesisParams> {
        GenesisParams::new(
            cfg.epoch.genesis_time,
            cfg.epoch.epoch_length_secs,
            cfg.epoch.claim_window_epochs,
            cfg.epoch.sweep_delay_secs,
            cfg.epoch.expiry_horizon,
            cfg.economics.linear_threshold,
        )
    }
}

impl TryFrom<&EngineConfig> for EngineParams {
    type Error = IssuanceError;

    fn try_from(cfg: &EngineConfig) -> Result<EngineParams> {
        let params = EngineParams {
            unit_price: cfg.economics.unit_price,
            epoch_ticket_cap: cfg.economics.epoch_ticket_cap,
            base_emission: cfg.economics.base_emission,
            streak_min_window_secs: cfg.streak.min_window_secs,
            streak_max_window_secs: cfg.streak.max_window_secs,
            jackpot_chance_bps: Bps::new(cfg.jackpot.chance_bps)?,
            jackpot_payout_bps: Bps::new(cfg.jackpot.payout_share_bps)?,
            jackpot_share_bps: Bps::new(cfg.jackpot.collateral_share_bps)?,
            surge_tiers: cfg.economics.surge_tiers.clone(),
        };
        params.validate()?;
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bps_rejects_out_of_range() {
        assert!(Bps::new(10_000).is_ok());
        assert!(Bps::new(10_001).is_err());
        assert!(serde_json::from_str::<Bps>("10001").is_err());
        assert_eq!(serde_json::from_str::<Bps>("25").unwrap().get(), 25);
    }

    #[test]
    fn epoch_arithmetic() {
        let g = GenesisParams::new(1_000, 100, 3, 50, 256, 10).unwrap();
        assert_eq!(g.epoch_at(999), EpochId(0));
        assert_eq!(g.epoch_at(1_000), EpochId(0));
        assert_eq!(g.epoch_at(1_099), EpochId(0));
        assert_eq!(g.epoch_at(1_100), EpochId(1));
        assert_eq!(g.epoch_start(EpochId(2)), 1_200);
        assert_eq!(g.epoch_end(EpochId(2)), 1_300);
    }

    #[test]
    fn genesis_rejects_zero_lengths() {
        assert!(GenesisParams::new(0, 0, 3, 0, 256, 0).is_err());
        assert!(GenesisParams::new(0, 10, 0, 0, 256, 0).is_err());
        assert!(GenesisParams::new(0, 10, 1, 0, 0, 0).is_err());
    }

    #[test]
    fn surge_tiers_must_increase() {
        let ok = [
            SurgeTier { threshold: 10, bonus: 1 },
            SurgeTier { threshold: 20, bonus: 1 },
        ];
        assert!(validate_surge_tiers(&ok).is_ok());
        let dup = [
            SurgeTier { threshold: 10, bonus: 1 },
            SurgeTier { threshold: 10, bonus: 1 },
        ];
        assert!(validate_surge_tiers(&dup).is_err());
        assert!(validate_surge_tiers(&[SurgeTier { threshold: 0, bonus: 1 }]).is_err());
    }
}
