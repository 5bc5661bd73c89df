//! Epoch issuance engine.
//!
//! Participants lock collateral during fixed-length epochs and earn pro-rata shares of a capped
//! reward emission. Shares are weighted by a concave ticket transform and a holding/streak
//! multiplier; every accepted contribution also takes one draw at a side jackpot.
//!
//! Design goals:
//! - Deterministic, bounded arithmetic (u128 intermediates, floor division, checked ops)
//! - Fail-closed: every single-item operation either fully applies or returns `Err` unchanged
//! - Bookkeeping before outward transfers; failed payouts only affect the payee's own funds
//! - IO-free core: balances, seeds, clock and payouts come from a [`Runtime`]

pub mod admin;
pub mod claims;
pub mod collaborators;
pub mod engine;
pub mod invariants;
pub mod jackpot;
pub mod ledger;
pub mod math;
pub mod multiplier;
pub mod requests;
pub mod types;
pub mod views;

pub use claims::{BatchClaimReport, MAX_BATCH_CLAIM};
pub use collaborators::{AssetLedger, FeeNotificationHandler, Host, Runtime};
pub use engine::{
    FinalizeReport, FinalizedItem, IssuanceEngine, LedgerStore, RequestReceipt,
    MAX_FINALIZE_BATCH,
};
pub use invariants::{check_invariants, InvariantId, InvariantViolation};
pub use jackpot::{JackpotPayout, JackpotStats};
pub use ledger::{EpochState, UserEpochPosition};
pub use multiplier::{MultiplierBreakdown, StreakRecord, StreakTransition};
pub use requests::{PendingRequest, RefundReason, RequestOutcome};
pub use types::{Bps, EngineParams, EpochId, GenesisParams, RequestId, Roles, SurgeTier};
pub use views::{EpochParamsSnapshot, UserDashboard, MAX_CLAIM_SCAN};
