//! Action routing bookkeeping.
//!
//! Leader-only actions dispatched on a follower travel through two
//! ledgers: a bounded wait queue while no leader is known, and an
//! in-flight table once forwarded. Each dispatched action hands its
//! caller a [`DispatchHandle`] that settles exactly once, with the
//! snapshot that folded the action in or with a typed failure.
//!
//! The router never talks to the transport; the session loop asks it
//! what to forward and tells it what happened.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tandem_core::{Action, ActionId, CoordError, Epoch, GlobalState};
use tokio::sync::oneshot;

use crate::config::CoordinationConfig;

/// What a dispatch settles to: the snapshot containing the action's
/// effect, or why it never will.
pub type DispatchResult = Result<GlobalState, CoordError>;

/// Caller-side handle for one dispatched action.
pub struct DispatchHandle {
    id: ActionId,
    rx: oneshot::Receiver<DispatchResult>,
    cancelled: Arc<AtomicBool>,
}

impl DispatchHandle {
    pub fn id(&self) -> ActionId {
        self.id
    }

    /// Withdraw the action. Takes effect only while it is still
    /// queued; once forwarded to a leader it will run there regardless.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Await settlement.
    pub async fn wait(self) -> DispatchResult {
        self.rx.await.unwrap_or(Err(CoordError::Cancelled))
    }

    /// Non-blocking probe, for step-driven callers.
    pub fn try_result(&mut self) -> Option<DispatchResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(CoordError::Cancelled)),
        }
    }

    /// A handle that settled at dispatch time (local applies, fast
    /// failures).
    pub(crate) fn settled(id: ActionId, result: DispatchResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self {
            id,
            rx,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }
}

struct Queued {
    action: Action,
    enqueued_at_ms: u64,
    tx: oneshot::Sender<DispatchResult>,
    cancelled: Arc<AtomicBool>,
}

struct InFlight {
    action: Action,
    epoch: Epoch,
    attempts: u8,
    tx: oneshot::Sender<DispatchResult>,
}

/// The two routing ledgers for one tab.
pub struct ActionRouter {
    capacity: usize,
    queue_timeout_ms: u64,
    max_attempts: u8,
    queue: VecDeque<Queued>,
    in_flight: HashMap<ActionId, InFlight>,
}

impl ActionRouter {
    pub fn new(config: &CoordinationConfig) -> Self {
        Self {
            capacity: config.action_queue_capacity.max(1),
            queue_timeout_ms: config.action_queue_timeout_ms,
            max_attempts: config.max_forward_attempts.max(1),
            queue: VecDeque::new(),
            in_flight: HashMap::new(),
        }
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Park a leader-only action until a leader is known. On overflow
    /// the oldest queued action fails so the newest can enter.
    pub fn enqueue(&mut self, action: Action, now_ms: u64) -> DispatchHandle {
        if self.queue.len() >= self.capacity {
            if let Some(evicted) = self.queue.pop_front() {
                tracing::warn!(action = %evicted.action.id, "action queue full, dropping oldest");
                let _ = evicted.tx.send(Err(CoordError::NoLeaderAvailable));
            }
        }
        let (tx, rx) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let id = action.id;
        self.queue.push_back(Queued {
            action,
            enqueued_at_ms: now_ms,
            tx,
            cancelled: Arc::clone(&cancelled),
        });
        DispatchHandle { id, rx, cancelled }
    }

    /// A leader at `epoch` is reachable: move every live queued action
    /// into the in-flight table and return what to forward, oldest
    /// first. Cancelled entries settle instead of travelling.
    pub fn take_ready(&mut self, epoch: Epoch) -> Vec<Action> {
        let mut ready = Vec::new();
        while let Some(entry) = self.queue.pop_front() {
            if entry.cancelled.load(Ordering::Acquire) {
                let _ = entry.tx.send(Err(CoordError::Cancelled));
                continue;
            }
            ready.push(entry.action.clone());
            self.in_flight.insert(
                entry.action.id,
                InFlight {
                    action: entry.action,
                    epoch,
                    attempts: 1,
                    tx: entry.tx,
                },
            );
        }
        ready
    }

    /// Fail queued actions that outlived the wait window, and settle
    /// cancelled ones.
    pub fn expire(&mut self, now_ms: u64) {
        let timeout = self.queue_timeout_ms;
        let mut kept = VecDeque::with_capacity(self.queue.len());
        for entry in self.queue.drain(..) {
            if entry.cancelled.load(Ordering::Acquire) {
                let _ = entry.tx.send(Err(CoordError::Cancelled));
            } else if now_ms.saturating_sub(entry.enqueued_at_ms) >= timeout {
                tracing::warn!(action = %entry.action.id, "no leader within wait window");
                let _ = entry.tx.send(Err(CoordError::NoLeaderAvailable));
            } else {
                kept.push_back(entry);
            }
        }
        self.queue = kept;
    }

    /// The action's effect arrived in a snapshot: settle its handle.
    pub fn resolve_applied(&mut self, id: &ActionId, snapshot: &GlobalState) -> bool {
        match self.in_flight.remove(id) {
            Some(entry) => {
                let _ = entry.tx.send(Ok(snapshot.clone()));
                true
            }
            None => false,
        }
    }

    /// Settle one in-flight action with a failure.
    pub fn fail(&mut self, id: &ActionId, err: CoordError) -> bool {
        match self.in_flight.remove(id) {
            Some(entry) => {
                let _ = entry.tx.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Leadership moved to a new epoch. In-flight actions with retry
    /// budget left are handed back for a resend; the rest settle with
    /// `LeaderChangedRetryExhausted`.
    pub fn on_leader_changed(&mut self, new_epoch: Epoch) -> Vec<Action> {
        let mut resend = Vec::new();
        let mut exhausted = Vec::new();
        for (id, entry) in self.in_flight.iter_mut() {
            if entry.epoch == new_epoch {
                continue;
            }
            if entry.attempts >= self.max_attempts {
                exhausted.push(*id);
            } else {
                entry.attempts += 1;
                entry.epoch = new_epoch;
                resend.push(entry.action.clone());
            }
        }
        for id in exhausted {
            if let Some(entry) = self.in_flight.remove(&id) {
                tracing::warn!(action = %id, "retry budget exhausted across leader change");
                let _ = entry.tx.send(Err(CoordError::LeaderChangedRetryExhausted));
            }
        }
        resend
    }

    /// Settle everything with the same failure (standalone
    /// degradation).
    pub fn drain_all(&mut self, err: CoordError) {
        for entry in self.queue.drain(..) {
            let _ = entry.tx.send(Err(err.clone()));
        }
        for (_, entry) in self.in_flight.drain() {
            let _ = entry.tx.send(Err(err.clone()));
        }
    }
}

impl std::fmt::Debug for ActionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRouter")
            .field("queued", &self.queue.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}
