//! # Tandem Coordination - Multi-Tab Session Engine
//!
//! The coordination core keeping N open tabs of one logical session
//! consistent:
//! - Leader election via epoch-monotonic leases with a deterministic
//!   tab-id tie-break
//! - A versioned state store applying pure reducers
//! - Routing of actions (local / leader-only / broadcast) so that only
//!   the leader performs side-effecting work
//! - Snapshot reconciliation with explicit resync on version gaps
//! - An exclusive-resource guard tying the single live backend
//!   connection to leadership
//!
//! Each tab runs a single-threaded, step-driven [`session::TabSession`]
//! event loop; cross-tab state is reached only through the immutable,
//! versioned snapshot and the action stream.

pub mod config;
pub mod connection;
pub mod durable;
pub mod election;
pub mod reconcile;
pub mod router;
pub mod session;
pub mod store;
pub mod tab_state;

pub use config::CoordinationConfig;
pub use connection::{ConnectionGuard, ExclusiveResource, NoopResource};
pub use durable::{FileLeaseStore, LeaseRecord, LeaseStore, LeaseStoreError, MemoryLeaseStore};
pub use election::{Election, ElectionEffect, Role};
pub use reconcile::{decide, ReconcileDecision, Reconciler, ResyncTick};
pub use router::{ActionRouter, DispatchHandle, DispatchResult};
pub use session::{SessionMode, SessionStatus, TabSession};
pub use store::{Applied, StateStore, Subscription};
pub use tab_state::TabState;
