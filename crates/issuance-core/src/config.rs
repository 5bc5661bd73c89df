//! Configuration management for the issuance engine.
//!
//! Provides structured configuration with validation for every engine component.
//!
//! # Configuration Sources
//!
//! Configuration can be loaded from:
//! - Environment variables (prefixed with `ISSUANCE_`)
//! - Serialized documents (any serde format; JSON in tests)
//! - Programmatic defaults
//!
//! Genesis values (epoch length, claim window, sweep delay, expiry horizon, linear threshold)
//! are fixed for the lifetime of an engine. Economic values seed the admin-mutable parameter
//! set and can be changed until the engine is locked.
//!
//! # Example
//!
//! ```rust,ignore
//! use issuance_core::config::EngineConfig;
//!
//! let config = EngineConfig::builder()
//!     .epoch_length_secs(86_400)
//!     .unit_price(20_000_000_000_000)
//!     .build()?;
//! ```

use crate::issuance::types::{
    validate_streak_windows, validate_surge_tiers, SurgeTier, BPS_U16,
};
use crate::{IssuanceError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Complete engine configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Epoch timing and grace windows.
    pub epoch: EpochConfig,

    /// Ticket pricing, capacity and emission.
    pub economics: EconomicsConfig,

    /// Participation streak windows.
    pub streak: StreakConfig,

    /// Jackpot side pool.
    pub jackpot: JackpotConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Create a new configuration builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Load configuration from environment variables on top of the defaults.
    ///
    /// Looks for variables prefixed with `ISSUANCE_`:
    /// - `ISSUANCE_GENESIS_TIME` - Unix timestamp of epoch 0
    /// - `ISSUANCE_EPOCH_LENGTH_SECS` - Epoch length in seconds
    /// - `ISSUANCE_CLAIM_WINDOW_EPOCHS` - Claim window in epochs
    /// - `ISSUANCE_UNIT_PRICE` - Collateral per ticket
    /// - `ISSUANCE_EPOCH_TICKET_CAP` - Max raw tickets per epoch
    /// - `ISSUANCE_BASE_EMISSION` - Reward units emitted per epoch
    /// - `ISSUANCE_JACKPOT_CHANCE_BPS` - Jackpot odds per contribution
    /// - `ISSUANCE_LOG_LEVEL` - Logging level (trace, debug, info, warn, error)
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse("ISSUANCE_GENESIS_TIME")? {
            config.epoch.genesis_time = v;
        }
        if let Some(v) = env_parse("ISSUANCE_EPOCH_LENGTH_SECS")? {
            config.epoch.epoch_length_secs = v;
        }
        if let Some(v) = env_parse("ISSUANCE_CLAIM_WINDOW_EPOCHS")? {
            config.epoch.claim_window_epochs = v;
        }
        if let Some(v) = env_parse("ISSUANCE_UNIT_PRICE")? {
            config.economics.unit_price = v;
        }
        if let Some(v) = env_parse("ISSUANCE_EPOCH_TICKET_CAP")? {
            config.economics.epoch_ticket_cap = v;
        }
        if let Some(v) = env_parse("ISSUANCE_BASE_EMISSION")? {
            config.economics.base_emission = v;
        }
        if let Some(v) = env_parse("ISSUANCE_JACKPOT_CHANCE_BPS")? {
            config.jackpot.chance_bps = v;
        }
        if let Ok(level) = std::env::var("ISSUANCE_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.epoch.epoch_length_secs == 0 {
            return Err(IssuanceError::ConfigError(
                "epoch_length_secs must be greater than 0".into(),
            ));
        }
        if self.epoch.claim_window_epochs == 0 {
            return Err(IssuanceError::ConfigError(
                "claim_window_epochs must be greater than 0".into(),
            ));
        }
        if self.epoch.expiry_horizon == 0 {
            return Err(IssuanceError::ConfigError(
                "expiry_horizon must be greater than 0".into(),
            ));
        }

        if self.economics.unit_price == 0 {
            return Err(IssuanceError::ConfigError(
                "unit_price must be greater than 0".into(),
            ));
        }
        if self.economics.epoch_ticket_cap == 0 {
            return Err(IssuanceError::ConfigError(
                "epoch_ticket_cap must be greater than 0".into(),
            ));
        }
        validate_surge_tiers(&self.economics.surge_tiers)
            .map_err(|e| IssuanceError::ConfigError(e.to_string()))?;

        validate_streak_windows(self.streak.min_window_secs, self.streak.max_window_secs)
            .map_err(|e| IssuanceError::ConfigError(e.to_string()))?;

        for (name, v) in [
            ("chance_bps", self.jackpot.chance_bps),
            ("payout_share_bps", self.jackpot.payout_share_bps),
            ("collateral_share_bps", self.jackpot.collateral_share_bps),
        ] {
            if v > BPS_U16 {
                return Err(IssuanceError::ConfigError(format!(
                    "jackpot.{name} must be at most {BPS_U16}"
                )));
            }
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(IssuanceError::ConfigError(format!(
                    "unknown log level: {other}"
                )))
            }
        }

        Ok(())
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| IssuanceError::ConfigError(format!("Invalid {name}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Epoch timing configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochConfig {
    /// Unix timestamp at which epoch 0 starts.
    pub genesis_time: u64,

    /// Length of one epoch in seconds.
    pub epoch_length_secs: u64,

    /// Number of epochs after close during which claims are accepted.
    pub claim_window_epochs: u64,

    /// Delay after epoch close before its collateral bank can be swept.
    pub sweep_delay_secs: u64,

    /// Host-height window after which an unfinalized request expires.
    pub expiry_horizon: u64,
}

impl Default for EpochConfig {
    fn default() -> Self {
        Self {
            genesis_time: 0,
            epoch_length_secs: 86_400,
            claim_window_epochs: 30,
            sweep_delay_secs: 3 * 86_400,
            expiry_horizon: 256,
        }
    }
}

/// Ticket pricing and emission configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EconomicsConfig {
    /// Collateral required per ticket (smallest collateral units).
    pub unit_price: u128,

    /// Maximum raw tickets accepted per epoch.
    pub epoch_ticket_cap: u64,

    /// Reward units emitted by every epoch before surge bonuses.
    pub base_emission: u128,

    /// Raw ticket count below which the effective transform is linear.
    pub linear_threshold: u64,

    /// Cumulative surge tiers keyed on per-epoch collateral volume.
    pub surge_tiers: Vec<SurgeTier>,
}

impl Default for EconomicsConfig {
    fn default() -> Self {
        Self {
            unit_price: 20_000_000_000_000,
            epoch_ticket_cap: 1_000_000,
            base_emission: 1_000 * 1_000_000_000_000_000_000,
            linear_threshold: 100,
            surge_tiers: vec![
                SurgeTier {
                    threshold: 10 * 1_000_000_000_000_000_000,
                    bonus: 100 * 1_000_000_000_000_000_000,
                },
                SurgeTier {
                    threshold: 100 * 1_000_000_000_000_000_000,
                    bonus: 250 * 1_000_000_000_000_000_000,
                },
            ],
        }
    }
}

/// Participation streak configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakConfig {
    /// Gaps shorter than this keep the streak without incrementing it.
    pub min_window_secs: u64,

    /// Gaps longer than this reset the streak.
    pub max_window_secs: u64,
}

impl Default for StreakConfig {
    fn default() -> Self {
        Self {
            min_window_secs: 20 * 3_600,
            max_window_secs: 48 * 3_600,
        }
    }
}

/// Jackpot side-pool configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JackpotConfig {
    /// Odds per accepted contribution, in bps.
    pub chance_bps: u16,

    /// Fraction of each pool paid out on a hit, in bps.
    pub payout_share_bps: u16,

    /// Fraction of every contribution's collateral routed to the collateral pool, in bps.
    pub collateral_share_bps: u16,
}

impl Default for JackpotConfig {
    fn default() -> Self {
        Self {
            chance_bps: 25,
            payout_share_bps: 5_000,
            collateral_share_bps: 1_000,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// JSON output format.
    pub json_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json_output: false,
        }
    }
}

/// Builder for EngineConfig.
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn genesis_time(mut self, ts: u64) -> Self {
        self.config.epoch.genesis_time = ts;
        self
    }

    pub fn epoch_length_secs(mut self, secs: u64) -> Self {
        self.config.epoch.epoch_length_secs = secs;
        self
    }

    pub fn claim_window_epochs(mut self, epochs: u64) -> Self {
        self.config.epoch.claim_window_epochs = epochs;
        self
    }

    pub fn sweep_delay_secs(mut self, secs: u64) -> Self {
        self.config.epoch.sweep_delay_secs = secs;
        self
    }

    pub fn expiry_horizon(mut self, heights: u64) -> Self {
        self.config.epoch.expiry_horizon = heights;
        self
    }

    pub fn unit_price(mut self, price: u128) -> Self {
        self.config.economics.unit_price = price;
        self
    }

    pub fn epoch_ticket_cap(mut self, cap: u64) -> Self {
        self.config.economics.epoch_ticket_cap = cap;
        self
    }

    pub fn base_emission(mut self, emission: u128) -> Self {
        self.config.economics.base_emission = emission;
        self
    }

    pub fn linear_threshold(mut self, threshold: u64) -> Self {
        self.config.economics.linear_threshold = threshold;
        self
    }

    pub fn surge_tiers(mut self, tiers: Vec<SurgeTier>) -> Self {
        self.config.economics.surge_tiers = tiers;
        self
    }

    pub fn streak_windows(mut self, min_secs: u64, max_secs: u64) -> Self {
        self.config.streak.min_window_secs = min_secs;
        self.config.streak.max_window_secs = max_secs;
        self
    }

    pub fn jackpot(mut self, chance_bps: u16, payout_share_bps: u16) -> Self {
        self.config.jackpot.chance_bps = chance_bps;
        self.config.jackpot.payout_share_bps = payout_share_bps;
        self
    }

    pub fn jackpot_collateral_share_bps(mut self, bps: u16) -> Self {
        self.config.jackpot.collateral_share_bps = bps;
        self
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Enable JSON log output.
    pub fn json_logs(mut self, enabled: bool) -> Self {
        self.config.logging.json_output = enabled;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_creates_valid_config() {
        let config = EngineConfig::builder()
            .epoch_length_secs(3_600)
            .claim_window_epochs(4)
            .unit_price(5)
            .jackpot(100, 2_500)
            .log_level("debug")
            .build()
            .expect("should build");

        assert_eq!(config.epoch.epoch_length_secs, 3_600);
        assert_eq!(config.epoch.claim_window_epochs, 4);
        assert_eq!(config.economics.unit_price, 5);
        assert_eq!(config.jackpot.chance_bps, 100);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn zero_epoch_length_rejected() {
        let result = EngineConfig::builder().epoch_length_secs(0).build();
        assert!(matches!(result, Err(IssuanceError::ConfigError(_))));
    }

    #[test]
    fn inverted_streak_windows_rejected() {
        let result = EngineConfig::builder().streak_windows(100, 50).build();
        assert!(result.is_err());
    }

    #[test]
    fn jackpot_bps_bounded() {
        let result = EngineConfig::builder().jackpot(10_001, 0).build();
        assert!(result.is_err());
    }

    #[test]
    fn unknown_log_level_rejected() {
        let result = EngineConfig::builder().log_level("loud").build();
        assert!(result.is_err());
    }

    #[test]
    fn config_survives_json() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).expect("serialize");
        let back: EngineConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(config, back);
    }

    #[test]
    fn env_parse_reports_bad_values() {
        std::env::set_var("ISSUANCE_TEST_ONLY_BAD_U64", "not-a-number");
        let parsed: Result<Option<u64>> = env_parse("ISSUANCE_TEST_ONLY_BAD_U64");
        assert!(matches!(parsed, Err(IssuanceError::ConfigError(_))));

        let missing: Option<u64> = env_parse("ISSUANCE_TEST_ONLY_MISSING").unwrap();
        assert!(missing.is_none());
    }
}
