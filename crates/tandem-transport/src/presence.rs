//! Peer presence tracking.
//!
//! Every tab heartbeats periodically; a peer silent for the timeout
//! (3x the heartbeat interval by default) is declared dead. Presence
//! feeds leader-death detection: losing the lease holder's heartbeats
//! accelerates failover ahead of the lease TTL.

use std::collections::HashMap;
use tandem_core::TabId;

/// Heartbeat ledger for the peers of one tab.
#[derive(Debug, Clone)]
pub struct Presence {
    last_seen_ms: HashMap<TabId, u64>,
    timeout_ms: u64,
}

impl Presence {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            last_seen_ms: HashMap::new(),
            timeout_ms,
        }
    }

    /// Record any sign of life from a peer (heartbeat or payload
    /// frame; both prove liveness).
    pub fn record(&mut self, peer: TabId, now_ms: u64) {
        let entry = self.last_seen_ms.entry(peer).or_insert(now_ms);
        *entry = (*entry).max(now_ms);
    }

    /// Remove peers that have been silent past the timeout and return
    /// them.
    pub fn sweep(&mut self, now_ms: u64) -> Vec<TabId> {
        let timeout = self.timeout_ms;
        let dead: Vec<TabId> = self
            .last_seen_ms
            .iter()
            .filter(|(_, seen)| now_ms.saturating_sub(**seen) >= timeout)
            .map(|(tab, _)| *tab)
            .collect();
        for tab in &dead {
            tracing::debug!(peer = %tab, "peer heartbeat timed out");
            self.last_seen_ms.remove(tab);
        }
        dead
    }

    pub fn is_alive(&self, peer: &TabId) -> bool {
        self.last_seen_ms.contains_key(peer)
    }

    pub fn forget(&mut self, peer: &TabId) {
        self.last_seen_ms.remove(peer);
    }

    pub fn alive_count(&self) -> usize {
        self.last_seen_ms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tab(b: u8) -> TabId {
        TabId::new_from_entropy([b; 16])
    }

    #[test]
    fn silent_peer_is_swept_after_timeout() {
        let mut presence = Presence::new(3_000);
        presence.record(tab(1), 0);
        presence.record(tab(2), 2_000);

        assert!(presence.sweep(2_999).is_empty());
        let dead = presence.sweep(3_000);
        assert_eq!(dead, vec![tab(1)]);
        assert!(presence.is_alive(&tab(2)));
    }

    #[test]
    fn record_never_moves_backwards() {
        let mut presence = Presence::new(3_000);
        presence.record(tab(1), 5_000);
        presence.record(tab(1), 1_000);
        assert!(presence.sweep(7_999).is_empty());
    }

    #[test]
    fn forget_removes_immediately() {
        let mut presence = Presence::new(3_000);
        presence.record(tab(1), 0);
        presence.forget(&tab(1));
        assert_eq!(presence.alive_count(), 0);
    }
}
