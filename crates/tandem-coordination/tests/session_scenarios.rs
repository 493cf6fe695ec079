//! End-to-end multi-tab scenarios over the in-memory hub, driven by a
//! simulated clock. No real timers: every timeout is crossed by
//! advancing the clock and pumping the sessions involved.

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tandem_coordination::{
    CoordinationConfig, NoopResource, MemoryLeaseStore, Role, SessionMode, TabSession,
};
use tandem_core::{
    Action, CoordError, Epoch, GlobalState, ManualClock, ReducerRegistry, RoutingClass, TabId,
    Version,
};
use tandem_transport::{MemoryHub, MemoryTransport, Transport, WireFrame};

fn registry() -> Arc<ReducerRegistry> {
    ReducerRegistry::builder()
        .register("counter/increment", |state, _action| {
            let current = state
                .get("count")
                .and_then(|v| v.as_u64())
                .unwrap_or_default();
            Ok(state.advanced_with("count", json!(current + 1)))
        })
        .register("note/set", |state, action| {
            let text = action
                .payload
                .get("text")
                .cloned()
                .ok_or(tandem_core::ReducerError::MissingField { key: "text" })?;
            Ok(state.advanced_with("note", text))
        })
        .build()
}

fn tab(seed: u8) -> TabId {
    TabId::new_from_entropy([seed; 16])
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn build(
    hub: &MemoryHub,
    clock: &ManualClock,
    seed: u8,
    config: CoordinationConfig,
) -> (TabSession, MemoryTransport, NoopResource) {
    init_tracing();
    let transport = hub.attach(tab(seed)).await;
    let probe = NoopResource::new();
    let session = TabSession::new(
        Arc::new(clock.clone()),
        Arc::new(transport.clone()),
        registry(),
        Box::new(probe.clone()),
        Box::new(MemoryLeaseStore::new()),
        config,
    )
    .expect("session builds");
    (session, transport, probe)
}

fn increment(origin: TabId, routing: RoutingClass) -> Action {
    Action::new(origin, "counter/increment", routing, json!({}))
}

/// Elect a lone leader: claim at the current instant, settle after the
/// claim window.
async fn elect(session: &mut TabSession, clock: &ManualClock) {
    session.pump().await;
    clock.advance(500);
    session.pump().await;
    assert!(session.is_leader());
}

#[tokio::test]
async fn exactly_one_leader_among_three_tabs() {
    let hub = MemoryHub::new();
    let clock = ManualClock::new();
    let cfg = CoordinationConfig::default;
    let (mut a, _ta, probe_a) = build(&hub, &clock, 1, cfg()).await;
    let (mut b, _tb, probe_b) = build(&hub, &clock, 2, cfg()).await;
    let (mut c, _tc, probe_c) = build(&hub, &clock, 3, cfg()).await;

    for session in [&mut a, &mut b, &mut c] {
        session.pump().await;
    }
    clock.advance(10);
    for session in [&mut a, &mut b, &mut c] {
        session.pump().await;
    }
    clock.advance(500);
    for session in [&mut a, &mut b, &mut c] {
        session.pump().await;
    }
    clock.advance(10);
    for session in [&mut a, &mut b, &mut c] {
        session.pump().await;
    }

    let leaders = [a.is_leader(), b.is_leader(), c.is_leader()]
        .iter()
        .filter(|l| **l)
        .count();
    assert_eq!(leaders, 1);
    // Deterministic tie-break: the smallest tab id wins.
    assert!(a.is_leader());
    assert_eq!(b.leader(), Some((tab(1), Epoch(1))));
    assert_eq!(c.leader(), Some((tab(1), Epoch(1))));

    // The exclusive connection exists exactly once.
    assert_eq!(probe_a.open_count(), 1);
    assert_eq!(probe_b.open_count(), 0);
    assert_eq!(probe_c.open_count(), 0);
}

#[tokio::test]
async fn follower_forwards_leader_only_action_and_converges() {
    let hub = MemoryHub::new();
    let clock = ManualClock::new();
    let cfg = CoordinationConfig::default;
    let (mut a, _ta, _pa) = build(&hub, &clock, 1, cfg()).await;
    elect(&mut a, &clock).await;

    let (mut b, _tb, _pb) = build(&hub, &clock, 2, cfg()).await;
    b.pump().await; // b claims
    clock.advance(10);
    a.pump().await; // a squashes the claim with its lease
    clock.advance(10);
    b.pump().await; // b adopts a as leader
    assert_eq!(b.role(), Role::Follower);
    assert_eq!(b.leader(), Some((tab(1), Epoch(1))));

    // Leader racks up some history first.
    for _ in 0..5 {
        let mut handle = a.dispatch(increment(tab(1), RoutingClass::LeaderOnly)).await;
        handle.try_result().expect("settled").expect("applied");
    }
    assert_eq!(a.version(), Version(5));
    b.pump().await; // adopt v1..v5 in order
    assert_eq!(b.version(), Version(5));

    // Follower sends a message: forwarded, applied by the leader,
    // settled by the leader's snapshot.
    let mut handle = b.dispatch(increment(tab(2), RoutingClass::LeaderOnly)).await;
    assert!(handle.try_result().is_none());

    a.pump().await; // apply the forward, publish v6
    assert_eq!(a.version(), Version(6));
    b.pump().await; // snapshot v6 settles the dispatch

    let state = handle.try_result().expect("settled").expect("applied");
    assert_eq!(state.version(), Version(6));
    assert_eq!(b.version(), Version(6));
    assert_eq!(b.state().get("count"), Some(&json!(6)));
    assert_eq!(b.status().in_flight_actions, 0);
}

#[tokio::test]
async fn dispatch_during_settle_window_waits_for_confirmation() {
    let hub = MemoryHub::new();
    let clock = ManualClock::new();
    let cfg = CoordinationConfig::default;
    let (mut a, _ta, _pa) = build(&hub, &clock, 1, cfg()).await;
    let (mut b, _tb, _pb) = build(&hub, &clock, 2, cfg()).await;

    a.pump().await; // a claims epoch 1
    b.pump().await; // b believes the claimant, provisionally
    assert_eq!(b.leader(), Some((tab(1), Epoch(1))));

    // a is still inside its settle window and would drop a forward, so
    // the action has to stay queued rather than go in flight.
    let mut handle = b.dispatch(increment(tab(2), RoutingClass::LeaderOnly)).await;
    assert!(handle.try_result().is_none());
    assert_eq!(b.status().queued_actions, 1);
    assert_eq!(b.status().in_flight_actions, 0);

    clock.advance(500);
    a.pump().await; // settles; the renewal confirms the lease
    clock.advance(10);
    b.pump().await; // confirmed leader: forward goes out now
    assert_eq!(b.status().in_flight_actions, 1);
    clock.advance(10);
    a.pump().await; // applies the forward, publishes v1
    assert_eq!(a.version(), Version(1));
    b.pump().await;

    let state = handle.try_result().expect("settled").expect("applied");
    assert_eq!(state.version(), Version(1));
    assert_eq!(b.version(), Version(1));
    assert_eq!(b.status().in_flight_actions, 0);
}

#[tokio::test]
async fn version_gap_triggers_resync_and_catch_up() {
    let hub = MemoryHub::new();
    let clock = ManualClock::new();
    let cfg = CoordinationConfig::default;
    let (mut a, _ta, _pa) = build(&hub, &clock, 1, cfg()).await;
    elect(&mut a, &clock).await;

    let (mut b, tb, _pb) = build(&hub, &clock, 2, cfg()).await;
    b.pump().await;
    clock.advance(10);
    a.pump().await;
    clock.advance(10);
    b.pump().await;

    let mut handle = a.dispatch(increment(tab(1), RoutingClass::LeaderOnly)).await;
    handle.try_result().expect("settled").expect("applied");
    b.pump().await;
    assert_eq!(b.version(), Version(1));

    // b freezes: detached from the medium, not pumped.
    hub.detach(tab(2)).await;
    for _ in 0..4 {
        let mut handle = a.dispatch(increment(tab(1), RoutingClass::LeaderOnly)).await;
        handle.try_result().expect("settled").expect("applied");
    }
    assert_eq!(a.version(), Version(5));

    // b resumes with an empty mailbox and observes only the next
    // snapshot, which skips v2..v5.
    tb.rejoin().await;
    let mut handle = a.dispatch(increment(tab(1), RoutingClass::LeaderOnly)).await;
    handle.try_result().expect("settled").expect("applied");

    b.pump().await; // sees v6, detects the gap, asks the leader
    assert_eq!(b.version(), Version(1));
    a.pump().await; // answers with its full snapshot
    b.pump().await; // adopts v6

    assert_eq!(b.version(), Version(6));
    assert!(!b.is_stale());
    assert_eq!(b.state(), a.state());
}

#[tokio::test]
async fn leader_death_fails_over_to_exactly_one_new_leader() {
    let hub = MemoryHub::new();
    let clock = ManualClock::new();
    let cfg = CoordinationConfig::default;
    let (mut a, _ta, probe_a) = build(&hub, &clock, 1, cfg()).await;
    elect(&mut a, &clock).await;

    let (mut b, _tb, probe_b) = build(&hub, &clock, 2, cfg()).await;
    let (mut c, _tc, probe_c) = build(&hub, &clock, 3, cfg()).await;
    for session in [&mut b, &mut c] {
        session.pump().await;
    }
    clock.advance(10);
    a.pump().await;
    clock.advance(10);
    for session in [&mut b, &mut c] {
        session.pump().await;
    }
    assert_eq!(b.leader(), Some((tab(1), Epoch(1))));
    assert_eq!(c.leader(), Some((tab(1), Epoch(1))));

    // The leader tab dies silently.
    hub.detach(tab(1)).await;

    // Heartbeat silence crosses the 3x timeout; followers claim ahead
    // of the lease TTL.
    clock.advance(3_000);
    b.pump().await;
    c.pump().await;
    clock.advance(500);
    b.pump().await;
    clock.advance(10);
    c.pump().await;

    assert!(b.is_leader());
    assert!(!c.is_leader());
    assert_eq!(c.leader(), Some((tab(2), Epoch(2))));
    assert_eq!(probe_b.open_count(), 1);
    assert_eq!(probe_c.open_count(), 0);
    // The dead leader never saw a step-down; its connection closes
    // when the session drops.
    assert_eq!(probe_a.close_count(), 0);
    drop(a);
    assert_eq!(probe_a.close_count(), 1);
}

#[tokio::test]
async fn queued_action_times_out_without_a_leader() {
    let hub = MemoryHub::new();
    let clock = ManualClock::new();
    // A claim window that never settles keeps the tab leaderless.
    let config = CoordinationConfig {
        claim_settle_ms: u64::MAX,
        ..CoordinationConfig::default()
    };
    let (mut session, _t, _p) = build(&hub, &clock, 1, config).await;
    session.pump().await;

    let mut handle = session
        .dispatch(increment(tab(1), RoutingClass::LeaderOnly))
        .await;
    clock.advance(4_999);
    session.pump().await;
    assert!(handle.try_result().is_none());

    clock.advance(1);
    session.pump().await;
    assert_eq!(handle.try_result(), Some(Err(CoordError::NoLeaderAvailable)));
    assert_eq!(session.status().queued_actions, 0);
}

#[tokio::test]
async fn cancelled_dispatch_settles_without_forwarding() {
    let hub = MemoryHub::new();
    let clock = ManualClock::new();
    let config = CoordinationConfig {
        claim_settle_ms: u64::MAX,
        ..CoordinationConfig::default()
    };
    let (mut session, _t, _p) = build(&hub, &clock, 1, config).await;
    session.pump().await;

    let mut handle = session
        .dispatch(increment(tab(1), RoutingClass::LeaderOnly))
        .await;
    handle.cancel();
    clock.advance(100);
    session.pump().await;

    assert_eq!(handle.try_result(), Some(Err(CoordError::Cancelled)));
    assert_eq!(session.version(), Version(0));
}

#[tokio::test]
async fn leader_going_offline_degrades_and_closes_the_connection() {
    let hub = MemoryHub::new();
    let clock = ManualClock::new();
    let (mut a, ta, probe) = build(&hub, &clock, 1, CoordinationConfig::default()).await;
    elect(&mut a, &clock).await;
    assert_eq!(probe.open_count(), 1);

    ta.set_offline(true);
    clock.advance(1_000); // next heartbeat is due and fails
    a.pump().await;

    assert_eq!(a.mode(), SessionMode::Standalone);
    assert_eq!(probe.close_count(), 1);
    assert!(a.is_stale());
    assert!(!a.is_leader());

    // Local work continues.
    let mut handle = a.dispatch(increment(tab(1), RoutingClass::Local)).await;
    assert!(handle.try_result().expect("settled").is_ok());

    // Peer-dependent work fails fast.
    let mut handle = a.dispatch(increment(tab(1), RoutingClass::LeaderOnly)).await;
    assert_eq!(
        handle.try_result(),
        Some(Err(CoordError::TransportUnavailable))
    );
}

#[tokio::test]
async fn broadcast_gossip_converges_and_duplicates_are_idempotent() {
    let hub = MemoryHub::new();
    let clock = ManualClock::new();
    let cfg = CoordinationConfig::default;
    let (mut a, _ta, _pa) = build(&hub, &clock, 1, cfg()).await;
    let (mut b, _tb, _pb) = build(&hub, &clock, 2, cfg()).await;

    let action = increment(tab(1), RoutingClass::Broadcast);
    let mut handle = a.dispatch(action.clone()).await;
    handle.try_result().expect("settled").expect("applied");
    assert_eq!(a.version(), Version(1));

    // The same action value dispatched again is a local no-op but the
    // gossip still goes out; peers must stay idempotent.
    let mut handle = a.dispatch(action).await;
    let state = handle.try_result().expect("settled").expect("applied");
    assert_eq!(state.version(), Version(1));

    b.pump().await;
    assert_eq!(b.version(), Version(1));
    assert_eq!(b.state().get("count"), Some(&json!(1)));
}

#[tokio::test]
async fn discarded_snapshot_leaves_gossip_dedup_alone() {
    let hub = MemoryHub::new();
    let clock = ManualClock::new();
    let (mut b, _tb, _pb) = build(&hub, &clock, 2, CoordinationConfig::default()).await;
    let peer = hub.attach(tab(9)).await;

    // b advances on its own first.
    for _ in 0..2 {
        let mut handle = b.dispatch(increment(tab(2), RoutingClass::Broadcast)).await;
        handle.try_result().expect("settled").expect("applied");
    }
    assert_eq!(b.version(), Version(2));

    // A peer with an older view announces a snapshot listing an action
    // b has never applied. The snapshot is stale and gets discarded.
    let x = increment(tab(9), RoutingClass::Broadcast);
    let stale = GlobalState::from_parts(Version(1), BTreeMap::new());
    peer.send_to(
        tab(2),
        WireFrame::Snapshot {
            state: stale,
            applied: vec![x.id],
            from: tab(9),
        },
    )
    .await
    .expect("delivered");
    b.pump().await;
    assert_eq!(b.version(), Version(2));

    // The gossip carrying that action must still apply; had the
    // discarded snapshot marked it seen, b would silently diverge.
    peer.send_to(tab(2), WireFrame::ActionGossip { action: x })
        .await
        .expect("delivered");
    b.pump().await;
    assert_eq!(b.version(), Version(3));
    assert_eq!(b.state().get("count"), Some(&json!(3)));
}

#[tokio::test]
async fn unanswered_resync_fails_forwarded_confirmations() {
    let hub = MemoryHub::new();
    let clock = ManualClock::new();
    let cfg = CoordinationConfig::default;
    let (mut a, _ta, _pa) = build(&hub, &clock, 1, cfg()).await;
    elect(&mut a, &clock).await;
    let (mut b, tb, _pb) = build(&hub, &clock, 2, cfg()).await;
    b.pump().await;
    clock.advance(10);
    a.pump().await;
    clock.advance(10);
    b.pump().await;
    assert_eq!(b.leader(), Some((tab(1), Epoch(1))));

    // b misses one snapshot while detached.
    hub.detach(tab(2)).await;
    let mut missed = a.dispatch(increment(tab(1), RoutingClass::LeaderOnly)).await;
    missed.try_result().expect("settled").expect("applied");
    tb.rejoin().await;

    // b forwards an action; the leader applies it, but the snapshot
    // announcing it shows b a version gap.
    let mut handle = b.dispatch(increment(tab(2), RoutingClass::LeaderOnly)).await;
    assert!(handle.try_result().is_none());
    a.pump().await;
    assert_eq!(a.version(), Version(2));

    // The leader dies before it can answer the resync.
    hub.detach(tab(1)).await;
    b.pump().await; // gap detected, request goes nowhere
    assert_eq!(b.version(), Version(0));
    assert_eq!(b.status().in_flight_actions, 1);

    clock.advance(3_000);
    b.pump().await; // retry window, still nobody with the state
    assert!(handle.try_result().is_none());

    clock.advance(3_000);
    b.pump().await; // resync window closes

    assert!(b.is_stale());
    assert_eq!(handle.try_result(), Some(Err(CoordError::ResyncFailed)));
    assert_eq!(b.status().in_flight_actions, 0);
}

#[tokio::test]
async fn snapshots_converge_bit_identically() {
    let hub = MemoryHub::new();
    let clock = ManualClock::new();
    let cfg = CoordinationConfig::default;
    let (mut a, _ta, _pa) = build(&hub, &clock, 1, cfg()).await;
    elect(&mut a, &clock).await;
    let (mut b, _tb, _pb) = build(&hub, &clock, 2, cfg()).await;
    b.pump().await;
    clock.advance(10);
    a.pump().await;
    clock.advance(10);
    b.pump().await;

    let note = Action::new(
        tab(2),
        "note/set",
        RoutingClass::LeaderOnly,
        json!({"text": "release at five"}),
    );
    let mut handle = b.dispatch(note).await;
    a.pump().await;
    b.pump().await;
    handle.try_result().expect("settled").expect("applied");

    let a_bytes = serde_json::to_vec(a.state()).expect("serializes");
    let b_bytes = serde_json::to_vec(b.state()).expect("serializes");
    assert_eq!(a_bytes, b_bytes);
}
