//! Actions: state mutations as values.
//!
//! Every state change enters the system as an [`Action`] tagged with a
//! closed [`RoutingClass`], so routing is exhaustively checkable
//! instead of living in loosely-typed handler maps.

use crate::identifiers::TabId;
use crate::state::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Deduplication key: an action already seen by id is a no-op on
/// replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(pub Uuid);

impl ActionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn new_from_entropy(entropy: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(entropy))
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action-{}", self.0)
    }
}

/// Policy tag deciding where an action executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingClass {
    /// Applied immediately on the originating tab only; never
    /// broadcast.
    Local,
    /// Only the leader performs the side-effecting apply; followers
    /// forward the action to the leader and adopt its broadcast
    /// snapshot.
    LeaderOnly,
    /// Applied locally (optimistic) and gossiped to all peers, which
    /// reconcile via version comparison.
    Broadcast,
}

/// One state-mutating action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub origin: TabId,
    pub kind: String,
    pub routing: RoutingClass,
    pub payload: Value,
    /// Snapshot version this action was computed against, when the
    /// caller cares about conflicts. `None` means "apply to whatever
    /// is current".
    pub based_on: Option<Version>,
}

impl Action {
    pub fn new(origin: TabId, kind: impl Into<String>, routing: RoutingClass, payload: Value) -> Self {
        Self {
            id: ActionId::generate(),
            origin,
            kind: kind.into(),
            routing,
            payload,
            based_on: None,
        }
    }

    /// Pin the action to the snapshot version it was computed against.
    pub fn based_on(mut self, version: Version) -> Self {
        self.based_on = Some(version);
        self
    }
}
