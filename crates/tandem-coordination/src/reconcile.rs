//! Snapshot reconciliation.
//!
//! Peers exchange full snapshots, not diffs, so reconciliation is a
//! pure version comparison: discard anything not newer, adopt the
//! direct successor, and treat a gap of more than one version as proof
//! of missed traffic that only an explicit resync can repair.

use tandem_core::Version;

/// What to do with an incoming snapshot at `incoming` when the local
/// store sits at `local`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileDecision {
    /// Not newer than what we hold; drop it.
    Discard,
    /// The direct successor (or a jump we asked for); install it.
    Adopt,
    /// Versions were skipped; request a full resync before adopting
    /// anything further.
    NeedResync { have: Version },
}

/// Classify an incoming snapshot version against the local one.
pub fn decide(local: Version, incoming: Version) -> ReconcileDecision {
    if incoming <= local {
        ReconcileDecision::Discard
    } else if incoming == local.next() {
        ReconcileDecision::Adopt
    } else {
        ReconcileDecision::NeedResync { have: local }
    }
}

/// Result of advancing the resync clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncTick {
    /// Nothing outstanding, or still inside the timeout.
    Idle,
    /// The first request went unanswered; send one more.
    Retry,
    /// The retry also timed out; the local snapshot is stale.
    Failed,
}

#[derive(Debug)]
struct Pending {
    requested_at_ms: u64,
    retried: bool,
}

/// Tracks one in-flight resync and whether the local snapshot is known
/// stale.
#[derive(Debug)]
pub struct Reconciler {
    timeout_ms: u64,
    pending: Option<Pending>,
    stale: bool,
}

impl Reconciler {
    pub fn new(resync_timeout_ms: u64) -> Self {
        Self {
            timeout_ms: resync_timeout_ms,
            pending: None,
            stale: false,
        }
    }

    /// Record that a resync request is going out. A second call while
    /// one is outstanding is absorbed; the timeout keeps running.
    pub fn begin(&mut self, now_ms: u64) {
        if self.pending.is_none() {
            self.pending = Some(Pending {
                requested_at_ms: now_ms,
                retried: false,
            });
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// The snapshot failed to resync; reads may be serving stale data
    /// until a newer snapshot or a later resync lands.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// A snapshot answering the resync arrived.
    pub fn resolve(&mut self) {
        self.pending = None;
        self.stale = false;
    }

    /// Advance the timeout. One retry is granted before giving up.
    pub fn tick(&mut self, now_ms: u64) -> ResyncTick {
        let Some(pending) = self.pending.as_mut() else {
            return ResyncTick::Idle;
        };
        if now_ms.saturating_sub(pending.requested_at_ms) < self.timeout_ms {
            return ResyncTick::Idle;
        }
        if !pending.retried {
            pending.retried = true;
            pending.requested_at_ms = now_ms;
            tracing::debug!("resync unanswered, retrying once");
            return ResyncTick::Retry;
        }
        tracing::warn!("resync failed after retry; snapshot is stale");
        self.pending = None;
        self.stale = true;
        ResyncTick::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_table() {
        assert_eq!(decide(Version(5), Version(4)), ReconcileDecision::Discard);
        assert_eq!(decide(Version(5), Version(5)), ReconcileDecision::Discard);
        assert_eq!(decide(Version(5), Version(6)), ReconcileDecision::Adopt);
        assert_eq!(
            decide(Version(5), Version(10)),
            ReconcileDecision::NeedResync { have: Version(5) }
        );
    }

    #[test]
    fn resync_retries_once_then_fails() {
        let mut reconciler = Reconciler::new(3_000);
        reconciler.begin(0);
        assert_eq!(reconciler.tick(2_999), ResyncTick::Idle);
        assert_eq!(reconciler.tick(3_000), ResyncTick::Retry);
        assert_eq!(reconciler.tick(5_000), ResyncTick::Idle);
        assert_eq!(reconciler.tick(6_000), ResyncTick::Failed);
        assert!(reconciler.is_stale());
        assert!(!reconciler.is_pending());
    }

    #[test]
    fn resolve_clears_pending_and_stale() {
        let mut reconciler = Reconciler::new(3_000);
        reconciler.begin(0);
        reconciler.tick(3_000);
        reconciler.tick(6_000);
        assert!(reconciler.is_stale());

        reconciler.begin(7_000);
        reconciler.resolve();
        assert!(!reconciler.is_pending());
        assert!(!reconciler.is_stale());
    }

    #[test]
    fn duplicate_begin_keeps_original_deadline() {
        let mut reconciler = Reconciler::new(3_000);
        reconciler.begin(0);
        reconciler.begin(2_500);
        assert_eq!(reconciler.tick(3_000), ResyncTick::Retry);
    }
}
