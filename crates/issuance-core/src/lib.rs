//! Issuance Core
//!
//! Epoch-based issuance engine: participants commit collateral for tickets, reveal them a block
//! later, and claim pro-rata shares of each closed epoch's capped emission.
//!
//! # Modules
//!
//! - `issuance`: the engine, its ledger, request queue, jackpot and claim paths
//! - `config`: `EngineConfig` with env loading and validation
//! - `metrics`: atomic counters and gauges exported as JSON
//! - `components`: in-memory host and asset ledger for tests and simulation
//! - `hash`: domain-separated SHA-256 helpers

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod components;
pub mod config;
pub mod hash;
pub mod issuance;
pub mod metrics;

pub use config::EngineConfig;
pub use issuance::{
    AssetLedger, EpochId, FeeNotificationHandler, Host, IssuanceEngine, RequestId, Roles, Runtime,
};

/// 32-byte hash newtype used for seeds, entropy and draw commitments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Hash32(pub [u8; 32]);

/// Opaque participant / contract identity as supplied by the host environment.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    /// Short hex form for log fields.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Coarse error taxonomy shared by every engine operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Eligibility,
    Input,
    Capacity,
    State,
    Solvency,
    Transfer,
    Access,
    Config,
}

/// Unified error type for issuance engine operations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum IssuanceError {
    #[error("Not eligible: {0}")]
    Ineligible(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Bounded value exceeded: {0}")]
    BoundedValueExceeded(String),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Insolvent: {0}")]
    Insolvent(String),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Reentrant call rejected while `{0}` is in progress")]
    Reentrancy(&'static str),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl IssuanceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IssuanceError::Ineligible(_) => ErrorKind::Eligibility,
            IssuanceError::InvalidInput(_) | IssuanceError::BoundedValueExceeded(_) => {
                ErrorKind::Input
            }
            IssuanceError::CapacityExceeded(_) => ErrorKind::Capacity,
            IssuanceError::InvalidState(_) | IssuanceError::Reentrancy(_) => ErrorKind::State,
            IssuanceError::Insolvent(_) => ErrorKind::Solvency,
            IssuanceError::TransferFailed(_) => ErrorKind::Transfer,
            IssuanceError::Unauthorized(_) => ErrorKind::Access,
            IssuanceError::ConfigError(_) => ErrorKind::Config,
        }
    }
}

pub type Result<T> = std::result::Result<T, IssuanceError>;
