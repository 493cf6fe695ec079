//! Core transport trait definition.

use crate::wire::WireFrame;
use crate::TransportResult;
use async_trait::async_trait;
use std::time::Duration;
use tandem_core::TabId;

/// A frame together with its sender.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub from: TabId,
    pub frame: WireFrame,
}

/// Best-effort inter-tab channel.
///
/// Implementations deliver at-least-once with per-sender FIFO order;
/// nothing is guaranteed across senders. Sends are fire-and-forget: a
/// failure means "not delivered" and is never retried at this layer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identity of the tab this endpoint belongs to.
    fn local_id(&self) -> TabId;

    /// Enqueue a frame for delivery to all other live tabs.
    async fn broadcast(&self, frame: WireFrame) -> TransportResult<()>;

    /// Deliver a frame to one specific tab (leader forwarding).
    async fn send_to(&self, peer: TabId, frame: WireFrame) -> TransportResult<()>;

    /// Receive the next envelope, waiting at most `timeout`.
    async fn recv(&self, timeout: Duration) -> TransportResult<Option<Envelope>>;

    /// Non-blocking receive for step-driven event loops.
    fn try_recv(&self) -> Option<Envelope>;
}
