//! # Tandem Core - Shared Coordination Types
//!
//! Foundation types for the multi-tab coordination engine:
//! - Tab identity and injectable clocks
//! - Leases and epochs for leader election
//! - Actions, routing classes, and the versioned global state snapshot
//! - The pure-reducer registry and the coordination error taxonomy
//!
//! Everything here is a plain value type or a trait seam; no transport
//! or runtime dependencies live at this layer.

pub mod action;
pub mod clock;
pub mod error;
pub mod identifiers;
pub mod lease;
pub mod reducer;
pub mod state;

pub use action::{Action, ActionId, RoutingClass};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoordError, ReducerError};
pub use identifiers::TabId;
pub use lease::{Epoch, Lease, LeaseClaim};
pub use reducer::{Reducer, ReducerRegistry, ReducerRegistryBuilder};
pub use state::{GlobalState, Version};
