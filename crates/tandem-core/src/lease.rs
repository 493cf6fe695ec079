//! Leadership leases and epochs.
//!
//! A lease is a time-bounded, epoch-versioned grant of exclusive
//! leadership. Epochs strictly increase with every election; a lease
//! from an older epoch is never honored over a newer one, even when its
//! expiry lies further in the future.

use crate::identifiers::TabId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonically increasing election counter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct Epoch(pub u64);

impl Epoch {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// The epoch a fresh claim proposes.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch-{}", self.0)
    }
}

/// A candidate's bid for leadership at a proposed epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseClaim {
    pub candidate: TabId,
    pub epoch: Epoch,
}

impl LeaseClaim {
    pub fn new(candidate: TabId, epoch: Epoch) -> Self {
        Self { candidate, epoch }
    }

    /// Deterministic contest between two concurrent claims: the higher
    /// epoch wins; at equal epochs the smaller tab id wins. Requires
    /// globally unique tab ids, needs no coordinator.
    pub fn beats(&self, other: &LeaseClaim) -> bool {
        match self.epoch.cmp(&other.epoch) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.candidate < other.candidate,
        }
    }
}

/// A granted leadership lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder: TabId,
    pub epoch: Epoch,
    pub expires_at_ms: u64,
}

impl Lease {
    pub fn new(holder: TabId, epoch: Epoch, expires_at_ms: u64) -> Self {
        Self {
            holder,
            epoch,
            expires_at_ms,
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }

    /// Whether this lease replaces `other`. Epoch dominates: an older
    /// epoch never wins on a later expiry. Within one epoch a renewal
    /// (same holder, later expiry) supersedes.
    pub fn supersedes(&self, other: &Lease) -> bool {
        match self.epoch.cmp(&other.epoch) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => {
                self.holder == other.holder && self.expires_at_ms > other.expires_at_ms
            }
        }
    }
}

impl fmt::Display for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lease[{} {} until {}ms]",
            self.holder, self.epoch, self.expires_at_ms
        )
    }
}
