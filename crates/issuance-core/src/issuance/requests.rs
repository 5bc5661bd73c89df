//! Commit/reveal request queue.
//!
//! A request locks collateral at host height `h`. It only becomes minable once the host has
//! moved past `h` (the seed for `h` did not exist when the request was made), and it expires
//! once more than `expiry_horizon` heights have elapsed.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use crate::{AccountId, IssuanceError, Result};

use super::types::RequestId;

/// Why a request was finalized without mining.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RefundReason {
    /// More than the expiry horizon elapsed before finalization.
    Expired,
    /// The user lost eligibility between request and finalization.
    EligibilityLost,
    /// The host no longer exposes the seed for the creation height.
    SeedUnavailable,
    /// The epoch could not accept the tickets.
    CapacityExhausted,
    /// Bookkeeping for the contribution could not be computed.
    Rejected,
}

/// Terminal disposition of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RequestOutcome {
    Mined {
        tickets: u64,
        weighted: u128,
        /// Collateral returned for the unfilled part of a partial request.
        refunded: u128,
    },
    Refunded {
        reason: RefundReason,
        amount: u128,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PendingRequest {
    pub id: RequestId,
    pub user: AccountId,
    /// Account credited with refunds for this request.
    pub payer: AccountId,
    pub creation_height: u64,
    pub locked_collateral: u128,
    pub ticket_count: u64,
    /// Strict requests need the exact ticket count at finalize; partial ones take what fits.
    pub strict: bool,
    pub finalized: bool,
    pub outcome: Option<RequestOutcome>,
}

/// Readiness of an unfinalized request at a given host height.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    Created,
    Ready,
    Expired,
}

pub fn classify(req: &PendingRequest, height: u64, expiry_horizon: u64) -> RequestStatus {
    if height <= req.creation_height {
        RequestStatus::Created
    } else if height - req.creation_height > expiry_horizon {
        RequestStatus::Expired
    } else {
        RequestStatus::Ready
    }
}

#[derive(Clone, Debug, Default)]
struct UserQueue {
    next_id: u64,
    /// Unfinalized request ids in FIFO order.
    open: VecDeque<RequestId>,
}

/// Per-user FIFO of pending requests. Entries are never deleted.
#[derive(Clone, Debug, Default)]
pub struct RequestQueue {
    queues: BTreeMap<AccountId, UserQueue>,
    entries: BTreeMap<(AccountId, RequestId), PendingRequest>,
}

/// Fields of a new request.
#[derive(Clone, Copy, Debug)]
pub struct NewRequest {
    pub user: AccountId,
    pub payer: AccountId,
    pub creation_height: u64,
    pub locked_collateral: u128,
    pub ticket_count: u64,
    pub strict: bool,
}

impl RequestQueue {
    pub fn new() -> RequestQueue {
        RequestQueue::default()
    }

    /// The id the next request for `user` will receive.
    pub fn next_id(&self, user: AccountId) -> RequestId {
        RequestId(self.queues.get(&user).map(|q| q.next_id).unwrap_or(0))
    }

    pub fn push(&mut self, req: NewRequest) -> RequestId {
        let queue = self.queues.entry(req.user).or_default();
        let id = RequestId(queue.next_id);
        queue.next_id += 1;
        queue.open.push_back(id);
        self.entries.insert(
            (req.user, id),
            PendingRequest {
                id,
                user: req.user,
                payer: req.payer,
                creation_height: req.creation_height,
                locked_collateral: req.locked_collateral,
                ticket_count: req.ticket_count,
                strict: req.strict,
                finalized: false,
                outcome: None,
            },
        );
        id
    }

    /// Oldest unfinalized request of `user`.
    pub fn front(&self, user: AccountId) -> Option<&PendingRequest> {
        let id = self.queues.get(&user)?.open.front()?;
        self.entries.get(&(user, *id))
    }

    /// Marks the oldest unfinalized request as finalized with `outcome`.
    ///
    /// Finalizing is one-way: a settled request leaves the open queue and keeps its outcome.
    pub fn settle_front(&mut self, user: AccountId, outcome: RequestOutcome) -> Result<RequestId> {
        let queue = self
            .queues
            .get_mut(&user)
            .ok_or_else(|| IssuanceError::InvalidState("no pending requests".into()))?;
        let id = *queue
            .open
            .front()
            .ok_or_else(|| IssuanceError::InvalidState("no pending requests".into()))?;
        let entry = self
            .entries
            .get_mut(&(user, id))
            .ok_or_else(|| IssuanceError::InvalidState("queue entry missing".into()))?;
        if entry.finalized {
            return Err(IssuanceError::InvalidState(format!(
                "request {} already finalized",
                id.0
            )));
        }
        entry.finalized = true;
        entry.outcome = Some(outcome);
        let _ = queue.open.pop_front();
        Ok(id)
    }

    pub fn get(&self, user: AccountId, id: RequestId) -> Option<&PendingRequest> {
        self.entries.get(&(user, id))
    }

    pub fn pending_count(&self, user: AccountId) -> usize {
        self.queues.get(&user).map(|q| q.open.len()).unwrap_or(0)
    }

    pub fn open_total(&self) -> usize {
        self.queues.values().map(|q| q.open.len()).sum()
    }

    /// Unfinalized requests of `user`, oldest first.
    pub fn pending(&self, user: AccountId) -> impl Iterator<Item = &PendingRequest> {
        self.queues
            .get(&user)
            .into_iter()
            .flat_map(|q| q.open.iter())
            .filter_map(move |id| self.entries.get(&(user, *id)))
    }

    /// Total collateral locked in unfinalized requests across all users.
    pub fn locked_total(&self) -> u128 {
        self.entries
            .values()
            .filter(|r| !r.finalized)
            .fold(0u128, |acc, r| acc.saturating_add(r.locked_collateral))
    }

    pub(crate) fn users(&self) -> impl Iterator<Item = &AccountId> {
        self.queues.keys()
    }

    /// The open queue holds exactly the unfinalized entries of `user`, in id order.
    pub(crate) fn head_consistent(&self, user: AccountId) -> bool {
        let Some(queue) = self.queues.get(&user) else {
            return true;
        };
        let open: Vec<RequestId> = queue.open.iter().copied().collect();
        let unfinalized: Vec<RequestId> = self
            .entries
            .range((user, RequestId(0))..=(user, RequestId(u64::MAX)))
            .filter(|(_, r)| !r.finalized)
            .map(|(_, r)| r.id)
            .collect();
        open == unfinalized
    }
}
