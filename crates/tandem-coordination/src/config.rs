//! Coordination runtime configuration.
//!
//! The exact values are tunable, not load-bearing for correctness; the
//! protocol only relies on `lease_renew_interval_ms < lease_ttl_ms` and
//! on the heartbeat timeout being a small multiple of the interval.

#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    /// How often every tab emits a heartbeat.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a peer is declared dead (3x the interval).
    pub heartbeat_timeout_ms: u64,
    /// Lifetime of a leadership lease; followers promote to candidate
    /// when no renewal lands within this window.
    pub lease_ttl_ms: u64,
    /// How often the leader re-asserts its lease. Must stay well under
    /// the TTL.
    pub lease_renew_interval_ms: u64,
    /// How long a candidate waits for a rival claim before treating
    /// its own claim as uncontested. Must exceed one broadcast
    /// round-trip.
    pub claim_settle_ms: u64,
    /// Bounded queue for leader-only actions dispatched while no
    /// leader is known; the oldest entry is dropped on overflow.
    pub action_queue_capacity: usize,
    /// Queued actions fail with `NoLeaderAvailable` after this long.
    pub action_queue_timeout_ms: u64,
    /// How many action ids the dedup ledger retains.
    pub dedup_retention: usize,
    /// An unanswered resync is retried once (against the leader), then
    /// reported failed after this long.
    pub resync_timeout_ms: u64,
    /// Forward attempts per leader-only action across leadership
    /// changes: the initial send plus one resend.
    pub max_forward_attempts: u8,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 1_000,
            heartbeat_timeout_ms: 3_000,
            lease_ttl_ms: 6_000,
            lease_renew_interval_ms: 2_000,
            claim_settle_ms: 500,
            action_queue_capacity: 64,
            action_queue_timeout_ms: 5_000,
            dedup_retention: 1_024,
            resync_timeout_ms: 3_000,
            max_forward_attempts: 2,
        }
    }
}
