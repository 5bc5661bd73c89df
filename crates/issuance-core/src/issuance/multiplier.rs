//! Multiplier resolution: holding-tier bonus (delegated) plus participation streak.

use serde::Serialize;

use crate::{IssuanceError, Result};

use super::types::BPS_U32;

/// Per-user participation streak.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StreakRecord {
    pub last_active: u64,
    pub days: u32,
}

/// How a streak moved on a user's first contribution of an epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum StreakTransition {
    /// No prior record.
    New,
    /// Gap below the minimum window: count kept, timestamp refreshed.
    Maintain,
    /// Gap inside `[min, max]`: count incremented.
    Increment,
    /// Gap above the maximum window: count back to 1.
    Reset,
}

/// Advances a streak to `now`.
///
/// Callers run this at most once per user per epoch (on the first contribution).
pub fn advance_streak(
    prev: Option<StreakRecord>,
    now: u64,
    min_window_secs: u64,
    max_window_secs: u64,
) -> (StreakRecord, StreakTransition) {
    let Some(prev) = prev else {
        return (
            StreakRecord {
                last_active: now,
                days: 1,
            },
            StreakTransition::New,
        );
    };
    let gap = now.saturating_sub(prev.last_active);
    let (days, transition) = if gap < min_window_secs {
        (prev.days, StreakTransition::Maintain)
    } else if gap <= max_window_secs {
        (prev.days.saturating_add(1), StreakTransition::Increment)
    } else {
        (1, StreakTransition::Reset)
    };
    (
        StreakRecord {
            last_active: now,
            days,
        },
        transition,
    )
}

/// Streak bonus table in bps.
pub fn streak_bonus_bps(days: u32) -> u32 {
    match days {
        0..=2 => 0,
        3..=6 => 1_000,
        7..=29 => 2_500,
        _ => 5_000,
    }
}

/// Multiplier components for views and logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MultiplierBreakdown {
    pub base_bps: u32,
    pub holding_bonus_bps: u32,
    pub streak_days: u32,
    pub streak_bonus_bps: u32,
    pub total_bps: u32,
}

/// `10_000 + holding_bonus + streak_bonus(days)`.
pub fn resolve_multiplier(holding_bonus_bps: u32, streak_days: u32) -> Result<MultiplierBreakdown> {
    let streak_bonus = streak_bonus_bps(streak_days);
    let total_bps = BPS_U32
        .checked_add(holding_bonus_bps)
        .and_then(|v| v.checked_add(streak_bonus))
        .ok_or_else(|| IssuanceError::BoundedValueExceeded("multiplier overflow".into()))?;
    Ok(MultiplierBreakdown {
        base_bps: BPS_U32,
        holding_bonus_bps,
        streak_days,
        streak_bonus_bps: streak_bonus,
        total_bps,
    })
}
