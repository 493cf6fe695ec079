//! Versioned state store.
//!
//! Holds the tab's current [`GlobalState`] snapshot and owns every way
//! it can change: applying an action through a registered reducer, or
//! adopting a strictly newer snapshot from a peer. The version moves by
//! exactly +1 per applied action and never backwards; duplicate action
//! ids are absorbed as no-ops so replays and gossip echoes stay
//! idempotent.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use tandem_core::{Action, ActionId, CoordError, GlobalState, ReducerRegistry, Version};

/// Outcome of [`StateStore::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// The reducer ran and produced this successor snapshot.
    Advanced(GlobalState),
    /// The action id was already applied; the snapshot is unchanged.
    Duplicate,
}

type SubscriberTable = Mutex<HashMap<u64, Arc<Mutex<VecDeque<GlobalState>>>>>;

/// Handle to a snapshot feed. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    queue: Arc<Mutex<VecDeque<GlobalState>>>,
    table: Weak<SubscriberTable>,
}

impl Subscription {
    /// Take every snapshot published since the last drain, oldest
    /// first.
    pub fn drain(&self) -> Vec<GlobalState> {
        self.queue.lock().drain(..).collect()
    }

    /// The most recent published snapshot, discarding older ones.
    pub fn latest(&self) -> Option<GlobalState> {
        self.drain().pop()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.lock().remove(&self.id);
        }
    }
}

/// The per-tab snapshot store.
pub struct StateStore {
    registry: Arc<ReducerRegistry>,
    current: GlobalState,
    seen: HashSet<ActionId>,
    seen_order: VecDeque<ActionId>,
    retention: usize,
    subscribers: Arc<SubscriberTable>,
    next_subscriber: u64,
}

impl StateStore {
    pub fn new(registry: Arc<ReducerRegistry>, dedup_retention: usize) -> Self {
        Self {
            registry,
            current: GlobalState::initial(),
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            retention: dedup_retention.max(1),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_subscriber: 0,
        }
    }

    pub fn current(&self) -> &GlobalState {
        &self.current
    }

    pub fn version(&self) -> Version {
        self.current.version()
    }

    pub fn has_applied(&self, id: &ActionId) -> bool {
        self.seen.contains(id)
    }

    /// Ids we have applied, newest last. Shared with snapshot
    /// broadcasts so followers can mark forwarded actions as done.
    pub fn applied_ids(&self) -> Vec<ActionId> {
        self.seen_order.iter().copied().collect()
    }

    /// Run the registered reducer for the action against the current
    /// snapshot and install the successor.
    pub fn apply(&mut self, action: &Action) -> Result<Applied, CoordError> {
        if self.seen.contains(&action.id) {
            tracing::debug!(action = %action.id, kind = %action.kind, "duplicate action ignored");
            return Ok(Applied::Duplicate);
        }
        if let Some(targeted) = action.based_on {
            if targeted != self.current.version() {
                return Err(CoordError::VersionConflict {
                    current: self.current.version(),
                    targeted,
                });
            }
        }
        let reducer = self
            .registry
            .get(&action.kind)
            .ok_or_else(|| CoordError::ReducerNotFound {
                kind: action.kind.clone(),
            })?;
        let next = reducer(&self.current, action)?;
        self.remember(action.id);
        self.install(next.clone());
        tracing::debug!(
            action = %action.id,
            kind = %action.kind,
            version = %self.current.version(),
            "action applied"
        );
        Ok(Applied::Advanced(next))
    }

    /// Adopt a snapshot from a peer. Only strictly newer versions are
    /// taken; equal or older ones are discarded so the local version
    /// never moves backwards.
    pub fn adopt(&mut self, snapshot: GlobalState) -> bool {
        if snapshot.version() <= self.current.version() {
            return false;
        }
        tracing::debug!(
            from = %self.current.version(),
            to = %snapshot.version(),
            "adopting peer snapshot"
        );
        self.install(snapshot);
        true
    }

    /// Mark an action id as applied without running a reducer (it was
    /// folded into an adopted snapshot on the leader).
    pub fn remember(&mut self, id: ActionId) {
        if !self.seen.insert(id) {
            return;
        }
        self.seen_order.push_back(id);
        while self.seen_order.len() > self.retention {
            if let Some(evicted) = self.seen_order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
    }

    /// Subscribe to snapshot changes. Every installed snapshot is
    /// queued for each live subscription until drained.
    pub fn subscribe(&mut self) -> Subscription {
        let id = self.next_subscriber;
        self.next_subscriber += 1;
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        self.subscribers.lock().insert(id, Arc::clone(&queue));
        Subscription {
            id,
            queue,
            table: Arc::downgrade(&self.subscribers),
        }
    }

    fn install(&mut self, snapshot: GlobalState) {
        self.current = snapshot;
        for queue in self.subscribers.lock().values() {
            queue.lock().push_back(self.current.clone());
        }
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("version", &self.current.version())
            .field("seen", &self.seen.len())
            .finish()
    }
}
