//! # Tandem Transport - Inter-Tab Messaging
//!
//! Best-effort delivery of small coordination messages between tabs of
//! one logical session:
//! - Wire frames for every inter-tab message
//! - The [`Transport`] trait: broadcast, point-to-point forwarding,
//!   timeout-bounded receive
//! - An in-memory hub implementation (tests, single-process hosting)
//! - Peer presence tracking via heartbeats
//!
//! Delivery guarantees are at-least-once, per-sender FIFO, unordered
//! across senders. Send failures degrade to "not delivered"; leases
//! and periodic resync at the coordination layer compensate, so this
//! layer never retries.

pub mod error;
pub mod memory;
pub mod presence;
pub mod traits;
pub mod wire;

pub use error::TransportError;
pub use memory::{MemoryHub, MemoryTransport};
pub use presence::Presence;
pub use traits::{Envelope, Transport};
pub use wire::{decode_frame, encode_frame, WireFrame, WIRE_SCHEMA_VERSION};

/// Convenience alias used across the transport layer.
pub type TransportResult<T> = Result<T, TransportError>;
