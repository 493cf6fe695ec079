//! Leader election over epoch-monotonic leases.
//!
//! One state machine instance runs per tab. It is pure with respect to
//! time and IO: every entry point takes the current clock reading and
//! returns [`ElectionEffect`]s for the session to act on, so the whole
//! protocol is testable without real timers or a transport.
//!
//! Roles: `Candidate -> Leader | Follower`, `Leader -> Follower` on
//! lease loss (hard cutover), `Follower -> Candidate` on leader-death
//! detection. There is no terminal state; the machine runs for the tab
//! lifetime.

use crate::config::CoordinationConfig;
use tandem_core::{Epoch, Lease, LeaseClaim, TabId};

/// Current role of this tab in the election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Candidate,
    Follower,
    Leader,
}

/// Instructions for the session loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionEffect {
    /// Broadcast our bid for leadership.
    BroadcastClaim(LeaseClaim),
    /// Broadcast the (renewed) lease we hold.
    BroadcastRenewal(Lease),
    /// We won: leader-only side effects may start.
    BecameLeader { epoch: Epoch },
    /// We lost the lease: leader-only side effects must stop within
    /// this event-loop tick.
    SteppedDown { epoch: Epoch },
    /// Another tab is (provisionally or confirmedly) the leader now.
    LeaderChanged { leader: TabId, epoch: Epoch },
}

/// Per-tab election state machine.
#[derive(Debug)]
pub struct Election {
    tab: TabId,
    lease_ttl_ms: u64,
    renew_interval_ms: u64,
    settle_ms: u64,
    role: Role,
    last_known_epoch: Epoch,
    lease: Option<Lease>,
    /// Whether the current lease was confirmed by an actual
    /// [`Lease`] value (a renewal, or our own settle) rather than
    /// adopted provisionally from a bare claim.
    lease_confirmed: bool,
    own_claim: Option<(LeaseClaim, u64)>,
    last_renewal_sent_ms: u64,
    suspended: bool,
}

impl Election {
    pub fn new(tab: TabId, epoch_floor: Epoch, config: &CoordinationConfig) -> Self {
        Self {
            tab,
            lease_ttl_ms: config.lease_ttl_ms,
            renew_interval_ms: config.lease_renew_interval_ms,
            settle_ms: config.claim_settle_ms,
            role: Role::Candidate,
            last_known_epoch: epoch_floor,
            lease: None,
            lease_confirmed: false,
            own_claim: None,
            last_renewal_sent_ms: 0,
            suspended: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn last_known_epoch(&self) -> Epoch {
        self.last_known_epoch
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    /// The leader we currently believe in, if its lease is still
    /// valid.
    pub fn leader(&self, now_ms: u64) -> Option<(TabId, Epoch)> {
        self.lease
            .filter(|l| !l.is_expired(now_ms))
            .map(|l| (l.holder, l.epoch))
    }

    /// The leader actions may be forwarded to. A lease adopted
    /// provisionally from a bare claim does not count: the claimant is
    /// still inside its settle window and leads nothing yet, so
    /// forwarding waits until a renewal confirms the lease.
    pub fn confirmed_leader(&self, now_ms: u64) -> Option<(TabId, Epoch)> {
        if self.lease_confirmed {
            self.leader(now_ms)
        } else {
            None
        }
    }

    /// Never start below an epoch we have durably observed (reload
    /// safety).
    pub fn raise_epoch_floor(&mut self, epoch: Epoch) {
        self.last_known_epoch = self.last_known_epoch.max(epoch);
    }

    /// Stop participating (transport lost). Returns the step-down
    /// effect when we were leader so the exclusive resource closes.
    pub fn suspend(&mut self) -> Vec<ElectionEffect> {
        let mut effects = Vec::new();
        if self.role == Role::Leader {
            if let Some(lease) = self.lease {
                effects.push(ElectionEffect::SteppedDown { epoch: lease.epoch });
            }
        }
        self.role = Role::Follower;
        self.lease = None;
        self.lease_confirmed = false;
        self.own_claim = None;
        self.suspended = true;
        effects
    }

    /// Advance the protocol against the clock.
    pub fn tick(&mut self, now_ms: u64) -> Vec<ElectionEffect> {
        if self.suspended {
            return Vec::new();
        }
        match self.role {
            Role::Candidate => self.tick_candidate(now_ms),
            Role::Leader => self.tick_leader(now_ms),
            Role::Follower => self.tick_follower(now_ms),
        }
    }

    fn tick_candidate(&mut self, now_ms: u64) -> Vec<ElectionEffect> {
        match self.own_claim {
            None => self.begin_claim(now_ms),
            Some((claim, claimed_at)) => {
                if now_ms.saturating_sub(claimed_at) >= self.settle_ms {
                    // Uncontested within the settle window: take the
                    // lease.
                    let lease = Lease::new(self.tab, claim.epoch, now_ms + self.lease_ttl_ms);
                    self.role = Role::Leader;
                    self.lease = Some(lease);
                    self.lease_confirmed = true;
                    self.own_claim = None;
                    self.last_renewal_sent_ms = now_ms;
                    tracing::info!(tab = %self.tab, epoch = %claim.epoch, "claim settled, assuming leadership");
                    vec![
                        ElectionEffect::BecameLeader { epoch: claim.epoch },
                        ElectionEffect::BroadcastRenewal(lease),
                    ]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn tick_leader(&mut self, now_ms: u64) -> Vec<ElectionEffect> {
        let Some(lease) = self.lease else {
            // Leader without a lease cannot exist; repair by stepping
            // down.
            self.role = Role::Candidate;
            return Vec::new();
        };
        if lease.is_expired(now_ms) {
            // Failed to renew in time: hard cutover, no exception.
            tracing::warn!(tab = %self.tab, epoch = %lease.epoch, "lease expired, stepping down");
            self.role = Role::Follower;
            self.lease = None;
            self.lease_confirmed = false;
            return vec![ElectionEffect::SteppedDown { epoch: lease.epoch }];
        }
        if now_ms.saturating_sub(self.last_renewal_sent_ms) >= self.renew_interval_ms {
            let renewed = Lease::new(self.tab, lease.epoch, now_ms + self.lease_ttl_ms);
            self.lease = Some(renewed);
            self.last_renewal_sent_ms = now_ms;
            return vec![ElectionEffect::BroadcastRenewal(renewed)];
        }
        Vec::new()
    }

    fn tick_follower(&mut self, now_ms: u64) -> Vec<ElectionEffect> {
        match self.lease {
            Some(lease) if !lease.is_expired(now_ms) => Vec::new(),
            _ => {
                // No renewal within the TTL: promote and re-claim with
                // an incremented epoch.
                self.role = Role::Candidate;
                self.lease = None;
                self.lease_confirmed = false;
                self.begin_claim(now_ms)
            }
        }
    }

    fn begin_claim(&mut self, now_ms: u64) -> Vec<ElectionEffect> {
        let epoch = self.last_known_epoch.next();
        self.last_known_epoch = epoch;
        let claim = LeaseClaim::new(self.tab, epoch);
        self.own_claim = Some((claim, now_ms));
        tracing::debug!(tab = %self.tab, epoch = %epoch, "claiming leadership");
        vec![ElectionEffect::BroadcastClaim(claim)]
    }

    /// A rival's bid arrived.
    pub fn on_claim(&mut self, claim: LeaseClaim, now_ms: u64) -> Vec<ElectionEffect> {
        if self.suspended || claim.candidate == self.tab {
            return Vec::new();
        }
        self.last_known_epoch = self.last_known_epoch.max(claim.epoch);
        match self.role {
            Role::Leader => self.on_claim_as_leader(claim, now_ms),
            Role::Candidate => self.on_claim_as_candidate(claim, now_ms),
            Role::Follower => self.on_claim_as_follower(claim, now_ms),
        }
    }

    fn on_claim_as_leader(&mut self, claim: LeaseClaim, now_ms: u64) -> Vec<ElectionEffect> {
        let Some(ours) = self.lease else {
            self.role = Role::Candidate;
            return Vec::new();
        };
        let rival_wins = claim.epoch > ours.epoch
            || (claim.epoch == ours.epoch && claim.candidate < self.tab);
        if rival_wins {
            self.adopt_provisional(claim.candidate, claim.epoch, now_ms);
            vec![
                ElectionEffect::SteppedDown { epoch: ours.epoch },
                ElectionEffect::LeaderChanged {
                    leader: claim.candidate,
                    epoch: claim.epoch,
                },
            ]
        } else {
            // Stale or losing claim: squash it by re-asserting the
            // lease.
            vec![ElectionEffect::BroadcastRenewal(ours)]
        }
    }

    fn on_claim_as_candidate(&mut self, claim: LeaseClaim, now_ms: u64) -> Vec<ElectionEffect> {
        match self.own_claim {
            Some((ours, _)) if ours.beats(&claim) => {
                // We win the contest; re-assert so the loser backs
                // down.
                vec![ElectionEffect::BroadcastClaim(ours)]
            }
            _ => {
                // Lost the tie-break (or never claimed): adopt the
                // winner's epoch and await its renewal.
                self.own_claim = None;
                self.adopt_provisional(claim.candidate, claim.epoch, now_ms);
                vec![ElectionEffect::LeaderChanged {
                    leader: claim.candidate,
                    epoch: claim.epoch,
                }]
            }
        }
    }

    fn on_claim_as_follower(&mut self, claim: LeaseClaim, now_ms: u64) -> Vec<ElectionEffect> {
        match self.lease {
            Some(lease) if !lease.is_expired(now_ms) && lease.epoch >= claim.epoch => {
                // We already follow a valid lease the claim does not
                // beat.
                Vec::new()
            }
            _ => {
                let changed = self
                    .lease
                    .map_or(true, |l| l.holder != claim.candidate || l.epoch != claim.epoch);
                self.adopt_provisional(claim.candidate, claim.epoch, now_ms);
                if changed {
                    vec![ElectionEffect::LeaderChanged {
                        leader: claim.candidate,
                        epoch: claim.epoch,
                    }]
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// A lease renewal arrived.
    pub fn on_renewal(&mut self, lease: Lease, now_ms: u64) -> Vec<ElectionEffect> {
        if self.suspended || lease.holder == self.tab {
            return Vec::new();
        }
        self.last_known_epoch = self.last_known_epoch.max(lease.epoch);
        if self.role == Role::Leader {
            let Some(ours) = self.lease else {
                self.role = Role::Candidate;
                return Vec::new();
            };
            let rival_wins = lease.epoch > ours.epoch
                || (lease.epoch == ours.epoch && lease.holder < self.tab);
            if rival_wins {
                self.role = Role::Follower;
                self.lease = Some(lease);
                self.lease_confirmed = true;
                return vec![
                    ElectionEffect::SteppedDown { epoch: ours.epoch },
                    ElectionEffect::LeaderChanged {
                        leader: lease.holder,
                        epoch: lease.epoch,
                    },
                ];
            }
            return vec![ElectionEffect::BroadcastRenewal(ours)];
        }

        let adopt = match self.lease {
            None => true,
            Some(current) => {
                lease.supersedes(&current)
                    || current.is_expired(now_ms)
                    // Same-epoch re-assertions keep the holder fresh.
                    || (current.holder == lease.holder && current.epoch == lease.epoch)
                    // A provisionally adopted claimant loses to the
                    // real holder by the same tie-break claims use.
                    || (lease.epoch == current.epoch && lease.holder < current.holder)
            }
        };
        if !adopt {
            // A lease from an older epoch is never honored over a
            // newer one.
            return Vec::new();
        }
        let changed = self
            .lease
            .map_or(true, |l| l.holder != lease.holder || l.epoch != lease.epoch);
        self.lease = Some(lease);
        self.lease_confirmed = true;
        self.own_claim = None;
        self.role = Role::Follower;
        if changed {
            vec![ElectionEffect::LeaderChanged {
                leader: lease.holder,
                epoch: lease.epoch,
            }]
        } else {
            Vec::new()
        }
    }

    /// Presence declared a peer dead. If it held the lease we claim
    /// immediately instead of waiting out the TTL.
    pub fn on_leader_silent(&mut self, peer: TabId, now_ms: u64) -> Vec<ElectionEffect> {
        if self.suspended || self.role == Role::Leader {
            return Vec::new();
        }
        match self.lease {
            Some(lease) if lease.holder == peer => {
                tracing::info!(tab = %self.tab, leader = %peer, "leader heartbeats stopped, claiming");
                self.lease = None;
                self.lease_confirmed = false;
                self.role = Role::Candidate;
                self.begin_claim(now_ms)
            }
            _ => Vec::new(),
        }
    }

    fn adopt_provisional(&mut self, holder: TabId, epoch: Epoch, now_ms: u64) {
        // Trust the winner for one TTL; its renewals keep it alive.
        self.role = Role::Follower;
        self.lease = Some(Lease::new(holder, epoch, now_ms + self.lease_ttl_ms));
        self.lease_confirmed = false;
    }
}
