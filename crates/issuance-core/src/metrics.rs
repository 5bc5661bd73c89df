//! Operational counters for the issuance engine.
//!
//! ```rust,ignore
//! let json = engine.metrics().to_json();
//! assert_eq!(json["counters"]["claims_total"], 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// A simple counter that can only increase.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge that can go up or down.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub requests_total: Counter,
    pub requests_rejected: Counter,
    pub finalized_total: Counter,
    pub mined_total: Counter,
    pub tickets_mined_total: Counter,
    pub expired_total: Counter,
    pub refunded_total: Counter,
    pub jackpot_hits_total: Counter,
    pub jackpot_transfer_failures: Counter,
    pub claims_total: Counter,
    pub claim_failures: Counter,
    pub sweeps_total: Counter,
    pub recoveries_total: Counter,
    pub refunds_withdrawn_total: Counter,
    pub reentrancy_rejections: Counter,

    /// Unfinalized requests across all users.
    pub pending_requests: Gauge,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "counters": {
                "requests_total": self.requests_total.get(),
                "requests_rejected": self.requests_rejected.get(),
                "finalized_total": self.finalized_total.get(),
                "mined_total": self.mined_total.get(),
                "tickets_mined_total": self.tickets_mined_total.get(),
                "expired_total": self.expired_total.get(),
                "refunded_total": self.refunded_total.get(),
                "jackpot_hits_total": self.jackpot_hits_total.get(),
                "jackpot_transfer_failures": self.jackpot_transfer_failures.get(),
                "claims_total": self.claims_total.get(),
                "claim_failures": self.claim_failures.get(),
                "sweeps_total": self.sweeps_total.get(),
                "recoveries_total": self.recoveries_total.get(),
                "refunds_withdrawn_total": self.refunds_withdrawn_total.get(),
                "reentrancy_rejections": self.reentrancy_rejections.get(),
            },
            "gauges": {
                "pending_requests": self.pending_requests.get(),
            },
        })
    }
}
