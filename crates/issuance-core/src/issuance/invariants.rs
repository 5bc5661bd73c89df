use crate::IssuanceError;

use super::collaborators::AssetLedger;
use super::engine::IssuanceEngine;

/// Stable identifiers for engine invariants (used by tests and diagnostics).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvariantId {
    /// Epoch raw ticket total disagreed with the sum of its positions.
    RawSumMatches,

    /// Epoch weighted total disagreed with the sum of weighted contributions.
    WeightedSumMatches,

    /// Claimed plus recovered emission exceeded the epoch's total emission.
    ClaimedWithinEmission,

    /// Reward pool plus token jackpot pool exceeded the engine's custodial balance.
    RewardPoolBacked,

    /// A user's open queue disagreed with their unfinalized requests.
    QueueHeadConsistent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvariantViolation {
    pub id: InvariantId,
    pub details: String,
}

impl InvariantViolation {
    pub fn new(id: InvariantId, details: impl Into<String>) -> Self {
        Self {
            id,
            details: details.into(),
        }
    }
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.id, self.details)
    }
}

impl std::error::Error for InvariantViolation {}

impl From<InvariantViolation> for IssuanceError {
    fn from(v: InvariantViolation) -> Self {
        IssuanceError::InvalidState(format!("invariant violated: {v}"))
    }
}

/// Checks every ledger-wide invariant against the current state.
pub fn check_invariants(
    engine: &IssuanceEngine,
    assets: &dyn AssetLedger,
) -> std::result::Result<(), InvariantViolation> {
    let store = engine.store();
    let ledger = store.ledger();

    for (epoch, state) in ledger.epochs() {
        let mut raw = 0u64;
        let mut weighted = 0u128;
        for (_, pos) in ledger.positions_in(*epoch) {
            raw = raw.saturating_add(pos.raw_tickets);
            weighted = weighted.saturating_add(pos.weighted_contribution);
        }
        if raw != state.raw_ticket_total {
            return Err(InvariantViolation::new(
                InvariantId::RawSumMatches,
                format!("epoch {}: {} != {}", epoch.0, raw, state.raw_ticket_total),
            ));
        }
        if weighted != state.weighted_ticket_total {
            return Err(InvariantViolation::new(
                InvariantId::WeightedSumMatches,
                format!(
                    "epoch {}: {} != {}",
                    epoch.0, weighted, state.weighted_ticket_total
                ),
            ));
        }
        let emission = ledger
            .emission_for_epoch(*epoch)
            .map_err(|e| InvariantViolation::new(InvariantId::ClaimedWithinEmission, e.to_string()))?;
        let paid = state.claimed_total.saturating_add(state.recovered_amount);
        if paid > emission {
            return Err(InvariantViolation::new(
                InvariantId::ClaimedWithinEmission,
                format!("epoch {}: paid {} > emission {}", epoch.0, paid, emission),
            ));
        }
    }

    let committed = store
        .reward_pool()
        .saturating_add(store.jackpot().token_pool());
    let custody = assets.balance_of(engine.roles().engine);
    if committed > custody {
        return Err(InvariantViolation::new(
            InvariantId::RewardPoolBacked,
            format!("committed {committed} > custody {custody}"),
        ));
    }

    for user in store.requests().users() {
        if !store.requests().head_consistent(*user) {
            return Err(InvariantViolation::new(
                InvariantId::QueueHeadConsistent,
                format!("user {}", user.short()),
            ));
        }
    }
    Ok(())
}
