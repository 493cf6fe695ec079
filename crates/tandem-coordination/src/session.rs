//! The per-tab session event loop.
//!
//! [`TabSession`] wires the election, store, router, reconciler,
//! presence ledger and connection guard together behind a single
//! step-driven `pump`. Nothing in here spawns tasks or arms timers:
//! the embedding runtime calls `pump` on its own cadence and the
//! injected [`Clock`] decides what is due, so the full protocol runs
//! under a simulated clock in tests.
//!
//! Pump order within one tick: heartbeat out, inbound frames, presence
//! sweep, election tick, queued-action flush, queue expiry, resync
//! timeout. Election effects are applied where they arise, so a
//! `SteppedDown` closes the backend connection before any later step
//! of the same tick can do leader-only work.

use std::sync::Arc;
use std::time::Duration;
use tandem_core::{
    Action, ActionId, Clock, CoordError, Epoch, GlobalState, ReducerRegistry, RoutingClass, TabId,
    Version,
};
use tandem_transport::{Envelope, Presence, Transport, TransportError, WireFrame};

use crate::config::CoordinationConfig;
use crate::connection::{ConnectionGuard, ExclusiveResource};
use crate::durable::{LeaseRecord, LeaseStore, LeaseStoreError};
use crate::election::{Election, ElectionEffect, Role};
use crate::reconcile::{decide, ReconcileDecision, Reconciler, ResyncTick};
use crate::router::{ActionRouter, DispatchHandle};
use crate::store::{Applied, StateStore, Subscription};
use crate::tab_state::TabState;

/// Whether the tab is coordinating with peers or running alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Normal operation: elections, forwarding, snapshot exchange.
    Coordinated,
    /// The inter-tab medium failed. Local actions still apply; anything
    /// needing peers or a leader fails fast with
    /// [`CoordError::TransportUnavailable`].
    Standalone,
}

/// Point-in-time view of a session, for status surfaces and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub mode: SessionMode,
    pub role: Role,
    pub leader: Option<(TabId, Epoch)>,
    pub version: Version,
    pub stale: bool,
    pub queued_actions: usize,
    pub in_flight_actions: usize,
    pub live_peers: usize,
}

/// One browser tab's coordination engine.
pub struct TabSession {
    tab: TabId,
    config: CoordinationConfig,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn Transport>,
    election: Election,
    store: StateStore,
    router: ActionRouter,
    reconciler: Reconciler,
    presence: Presence,
    guard: ConnectionGuard,
    lease_store: Box<dyn LeaseStore>,
    tab_state: TabState,
    mode: SessionMode,
    last_heartbeat_ms: Option<u64>,
    /// Applied ids announced by a snapshot we could not adopt yet;
    /// recorded only once the resync that covers them lands.
    deferred_applied: Vec<ActionId>,
}

impl TabSession {
    /// Build a session for the tab the transport endpoint belongs to.
    /// The durable lease record, if any, seeds the election's epoch
    /// floor so a reloaded tab can never claim below what this profile
    /// has already observed.
    pub fn new(
        clock: Arc<dyn Clock>,
        transport: Arc<dyn Transport>,
        registry: Arc<ReducerRegistry>,
        resource: Box<dyn ExclusiveResource>,
        lease_store: Box<dyn LeaseStore>,
        config: CoordinationConfig,
    ) -> Result<Self, LeaseStoreError> {
        let tab = transport.local_id();
        let mut election = Election::new(tab, Epoch::default(), &config);
        if let Some(record) = lease_store.load()? {
            election.raise_epoch_floor(record.epoch);
        }
        Ok(Self {
            tab,
            election,
            store: StateStore::new(registry, config.dedup_retention),
            router: ActionRouter::new(&config),
            reconciler: Reconciler::new(config.resync_timeout_ms),
            presence: Presence::new(config.heartbeat_timeout_ms),
            guard: ConnectionGuard::new(resource),
            lease_store,
            tab_state: TabState::new(tab),
            mode: SessionMode::Coordinated,
            last_heartbeat_ms: None,
            deferred_applied: Vec::new(),
            clock,
            transport,
            config,
        })
    }

    pub fn tab(&self) -> TabId {
        self.tab
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn role(&self) -> Role {
        self.election.role()
    }

    pub fn is_leader(&self) -> bool {
        self.election.is_leader()
    }

    pub fn leader(&self) -> Option<(TabId, Epoch)> {
        self.election.leader(self.clock.now_ms())
    }

    pub fn state(&self) -> &GlobalState {
        self.store.current()
    }

    pub fn version(&self) -> Version {
        self.store.version()
    }

    pub fn is_stale(&self) -> bool {
        self.reconciler.is_stale()
    }

    pub fn tab_state(&self) -> &TabState {
        &self.tab_state
    }

    pub fn tab_state_mut(&mut self) -> &mut TabState {
        &mut self.tab_state
    }

    pub fn connection_open(&self) -> bool {
        self.guard.is_open()
    }

    /// Subscribe to every snapshot this session installs.
    pub fn subscribe(&mut self) -> Subscription {
        self.store.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            mode: self.mode,
            role: self.election.role(),
            leader: self.election.leader(self.clock.now_ms()),
            version: self.store.version(),
            stale: self.reconciler.is_stale(),
            queued_actions: self.router.queued_len(),
            in_flight_actions: self.router.in_flight_len(),
            live_peers: self.presence.alive_count(),
        }
    }

    /// Run one step of the event loop.
    pub async fn pump(&mut self) {
        if self.mode == SessionMode::Standalone {
            return;
        }
        let now = self.clock.now_ms();

        if self
            .last_heartbeat_ms
            .map_or(true, |t| now.saturating_sub(t) >= self.config.heartbeat_interval_ms)
        {
            let beat = WireFrame::Heartbeat {
                from: self.tab,
                at_ms: now,
            };
            if self.send_broadcast(beat).await {
                self.last_heartbeat_ms = Some(now);
            }
            if self.mode == SessionMode::Standalone {
                return;
            }
        }

        while let Some(envelope) = self.transport.try_recv() {
            self.on_envelope(envelope, now).await;
            if self.mode == SessionMode::Standalone {
                return;
            }
        }

        for dead in self.presence.sweep(now) {
            let effects = self.election.on_leader_silent(dead, now);
            self.apply_effects(effects, now).await;
        }

        let effects = self.election.tick(now);
        self.apply_effects(effects, now).await;
        if self.mode == SessionMode::Standalone {
            return;
        }

        self.flush_queue(now).await;
        self.router.expire(now);

        match self.reconciler.tick(now) {
            ResyncTick::Idle => {}
            ResyncTick::Retry => self.send_resync_request(now).await,
            ResyncTick::Failed => {
                // The snapshot stays marked stale; dispatches whose
                // confirmation was lost with the resync settle now.
                for id in std::mem::take(&mut self.deferred_applied) {
                    self.router.fail(&id, CoordError::ResyncFailed);
                }
            }
        }
    }

    /// Drive the loop off the wall clock: wait for the next frame (or
    /// a fraction of the heartbeat interval) and pump once. For
    /// production embeddings; tests call [`TabSession::pump`] directly.
    pub async fn run_once(&mut self) {
        if self.mode == SessionMode::Coordinated {
            let wait = Duration::from_millis(self.config.heartbeat_interval_ms / 4);
            match self.transport.recv(wait).await {
                Ok(Some(envelope)) => {
                    let now = self.clock.now_ms();
                    self.on_envelope(envelope, now).await;
                }
                Ok(None) => {}
                Err(e) => self.on_transport_error(e),
            }
        }
        self.pump().await;
    }

    /// Dispatch an action according to its routing class. The returned
    /// handle settles exactly once.
    pub async fn dispatch(&mut self, action: Action) -> DispatchHandle {
        let now = self.clock.now_ms();
        let id = action.id;
        match action.routing {
            RoutingClass::Local => DispatchHandle::settled(id, self.apply_here(&action)),
            RoutingClass::Broadcast => {
                let result = self.apply_here(&action);
                if result.is_ok() && self.mode == SessionMode::Coordinated {
                    self.send_broadcast(WireFrame::ActionGossip { action }).await;
                }
                DispatchHandle::settled(id, result)
            }
            RoutingClass::LeaderOnly => {
                if self.mode == SessionMode::Standalone {
                    return DispatchHandle::settled(id, Err(CoordError::TransportUnavailable));
                }
                if self.election.is_leader() {
                    return DispatchHandle::settled(id, self.leader_apply(&action).await);
                }
                let handle = self.router.enqueue(action, now);
                self.flush_queue(now).await;
                handle
            }
        }
    }

    fn apply_here(&mut self, action: &Action) -> Result<GlobalState, CoordError> {
        match self.store.apply(action)? {
            Applied::Advanced(state) => Ok(state),
            Applied::Duplicate => Ok(self.store.current().clone()),
        }
    }

    /// Apply an action as the leader and publish the resulting
    /// snapshot. A stale `based_on` is re-run against the current
    /// snapshot once; the pin protected the originator's read, the
    /// leader's apply is authoritative.
    async fn leader_apply(&mut self, action: &Action) -> Result<GlobalState, CoordError> {
        let mut attempt = action.clone();
        let state = loop {
            match self.store.apply(&attempt) {
                Ok(Applied::Advanced(state)) => break state,
                Ok(Applied::Duplicate) => break self.store.current().clone(),
                Err(e) if e.is_recoverable() && attempt.based_on.is_some() => {
                    tracing::debug!(action = %attempt.id, error = %e, "re-running against current snapshot");
                    attempt.based_on = None;
                }
                Err(e) => {
                    tracing::warn!(action = %attempt.id, kind = %attempt.kind, error = %e, "leader apply failed");
                    self.router.fail(&attempt.id, e.clone());
                    return Err(e);
                }
            }
        };
        self.router.resolve_applied(&action.id, &state);
        let frame = WireFrame::Snapshot {
            state: state.clone(),
            applied: vec![action.id],
            from: self.tab,
        };
        self.send_broadcast(frame).await;
        Ok(state)
    }

    async fn on_envelope(&mut self, envelope: Envelope, now: u64) {
        // Any frame proves the sender is alive.
        self.presence.record(envelope.from, now);
        match envelope.frame {
            WireFrame::Heartbeat { .. } => {}
            WireFrame::ClaimLease { claim } => {
                let effects = self.election.on_claim(claim, now);
                self.apply_effects(effects, now).await;
            }
            WireFrame::LeaseRenewal { lease } => {
                self.persist_epoch(lease.epoch, lease.holder, now);
                let effects = self.election.on_renewal(lease, now);
                self.apply_effects(effects, now).await;
            }
            WireFrame::ForwardAction { action, epoch } => {
                let current = self.election.lease().map(|l| l.epoch);
                if self.election.is_leader() && current == Some(epoch) {
                    let _ = self.leader_apply(&action).await;
                } else {
                    tracing::debug!(
                        action = %action.id,
                        forwarded_epoch = %epoch,
                        "dropping forward for an epoch we do not lead"
                    );
                }
            }
            WireFrame::ActionGossip { action } => {
                if let Err(e) = self.store.apply(&action) {
                    tracing::debug!(action = %action.id, error = %e, "gossiped action not applied");
                }
            }
            WireFrame::Snapshot { state, applied, from } => {
                match decide(self.store.version(), state.version()) {
                    // A stale snapshot must leave the dedup ledger
                    // alone: its ids name effects our state never
                    // absorbed, and marking them seen would drop the
                    // gossip that still has to deliver them.
                    ReconcileDecision::Discard => {}
                    ReconcileDecision::Adopt => {
                        for id in &applied {
                            self.store.remember(*id);
                            self.router.resolve_applied(id, &state);
                        }
                        self.store.adopt(state);
                    }
                    ReconcileDecision::NeedResync { have } => {
                        tracing::info!(
                            have = %have,
                            offered = %state.version(),
                            "version gap, requesting resync"
                        );
                        self.deferred_applied.extend(applied);
                        self.reconciler.begin(now);
                        let frame = WireFrame::ResyncRequest {
                            from: self.tab,
                            have,
                        };
                        self.send_to(from, frame).await;
                    }
                }
            }
            WireFrame::ResyncRequest { from, have } => {
                if self.store.version() > have {
                    let frame = WireFrame::ResyncResponse {
                        state: self.store.current().clone(),
                    };
                    self.send_to(from, frame).await;
                }
            }
            WireFrame::ResyncResponse { state } => {
                if self.store.adopt(state.clone()) {
                    // The gap is closed, so the announced ids are now
                    // part of our state; record and settle them.
                    for id in std::mem::take(&mut self.deferred_applied) {
                        self.store.remember(id);
                        self.router.resolve_applied(&id, &state);
                    }
                } else {
                    self.deferred_applied.clear();
                }
                self.reconciler.resolve();
            }
        }
    }

    async fn apply_effects(&mut self, effects: Vec<ElectionEffect>, now: u64) {
        for effect in effects {
            if self.mode == SessionMode::Standalone {
                return;
            }
            match effect {
                ElectionEffect::BroadcastClaim(claim) => {
                    self.send_broadcast(WireFrame::ClaimLease { claim }).await;
                }
                ElectionEffect::BroadcastRenewal(lease) => {
                    self.persist_epoch(lease.epoch, lease.holder, now);
                    self.send_broadcast(WireFrame::LeaseRenewal { lease }).await;
                }
                ElectionEffect::BecameLeader { epoch } => {
                    self.persist_epoch(epoch, self.tab, now);
                    self.guard.on_became_leader(epoch);
                    // Publish our snapshot so followers converge on the
                    // new leader's state immediately.
                    let frame = WireFrame::Snapshot {
                        state: self.store.current().clone(),
                        applied: self.store.applied_ids(),
                        from: self.tab,
                    };
                    self.send_broadcast(frame).await;
                }
                ElectionEffect::SteppedDown { epoch } => {
                    tracing::info!(epoch = %epoch, "lost leadership");
                    self.guard.on_stepped_down();
                }
                ElectionEffect::LeaderChanged { leader, epoch } => {
                    self.persist_epoch(epoch, leader, now);
                    let resend = self.router.on_leader_changed(epoch);
                    for action in resend {
                        let frame = WireFrame::ForwardAction { action, epoch };
                        self.send_to(leader, frame).await;
                    }
                }
            }
        }
    }

    /// Forward everything waiting in the queue once a leader is
    /// reachable. A session that just became leader applies its own
    /// backlog directly.
    async fn flush_queue(&mut self, now: u64) {
        if self.router.queued_len() == 0 {
            return;
        }
        if self.election.is_leader() {
            if let Some(lease) = self.election.lease().copied() {
                for action in self.router.take_ready(lease.epoch) {
                    let _ = self.leader_apply(&action).await;
                }
            }
        } else if let Some((leader, epoch)) = self.election.confirmed_leader(now) {
            for action in self.router.take_ready(epoch) {
                let frame = WireFrame::ForwardAction { action, epoch };
                if !self.send_to(leader, frame).await {
                    if self.mode == SessionMode::Standalone {
                        return;
                    }
                    // The leader's endpoint is gone; treat it as
                    // silent instead of waiting out the lease TTL.
                    let effects = self.election.on_leader_silent(leader, now);
                    self.apply_effects(effects, now).await;
                    break;
                }
            }
        }
    }

    async fn send_resync_request(&mut self, now: u64) {
        let frame = WireFrame::ResyncRequest {
            from: self.tab,
            have: self.store.version(),
        };
        match self.election.confirmed_leader(now) {
            Some((leader, _)) if leader != self.tab => {
                self.send_to(leader, frame).await;
            }
            _ => {
                self.send_broadcast(frame).await;
            }
        }
    }

    fn persist_epoch(&mut self, epoch: Epoch, holder: TabId, now: u64) {
        let record = LeaseRecord {
            epoch,
            holder,
            recorded_at_ms: now,
        };
        if let Err(e) = self.lease_store.save(record) {
            // Losing durability weakens reload safety but must not
            // stall the live protocol.
            tracing::warn!(error = %e, "failed to persist lease record");
        }
    }

    async fn send_broadcast(&mut self, frame: WireFrame) -> bool {
        match self.transport.broadcast(frame).await {
            Ok(()) => true,
            Err(e) => {
                self.on_transport_error(e);
                false
            }
        }
    }

    async fn send_to(&mut self, peer: TabId, frame: WireFrame) -> bool {
        match self.transport.send_to(peer, frame).await {
            Ok(()) => true,
            Err(TransportError::PeerUnreachable { peer }) => {
                tracing::debug!(peer = %peer, "send to unreachable peer dropped");
                false
            }
            Err(e) => {
                self.on_transport_error(e);
                false
            }
        }
    }

    fn on_transport_error(&mut self, error: TransportError) {
        match error {
            TransportError::Unavailable | TransportError::ChannelClosed => self.degrade(),
            TransportError::Codec { reason } => {
                tracing::warn!(reason = %reason, "wire codec failure");
            }
            TransportError::PeerUnreachable { peer } => {
                tracing::debug!(peer = %peer, "peer unreachable");
            }
        }
    }

    /// The inter-tab medium is gone: stop electing, close the backend
    /// connection, fail everything that needs peers, and keep serving
    /// local reads and Local-class actions.
    fn degrade(&mut self) {
        if self.mode == SessionMode::Standalone {
            return;
        }
        tracing::warn!(tab = %self.tab, "transport unavailable, degrading to standalone");
        self.mode = SessionMode::Standalone;
        self.election.suspend();
        self.guard.on_stepped_down();
        self.router.drain_all(CoordError::TransportUnavailable);
        self.deferred_applied.clear();
        self.reconciler.mark_stale();
        self.presence = Presence::new(self.config.heartbeat_timeout_ms);
    }
}

impl std::fmt::Debug for TabSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabSession")
            .field("tab", &self.tab)
            .field("mode", &self.mode)
            .field("role", &self.election.role())
            .field("version", &self.store.version())
            .finish()
    }
}
