//! In-memory transport hub.
//!
//! Models the browser-side broadcast medium inside one process: every
//! attached tab gets an unbounded mailbox, broadcasts fan out to all
//! other tabs, and frames cross the "wire" as encoded bytes so the
//! codec path is exercised end to end. Detaching a tab mid-flight
//! simulates a crash; flipping a transport offline simulates the
//! medium itself failing.

use crate::error::TransportError;
use crate::traits::{Envelope, Transport};
use crate::wire::{decode_frame, encode_frame, WireFrame};
use crate::TransportResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};

#[derive(Debug, Clone)]
struct Packet {
    from: tandem_core::TabId,
    bytes: Vec<u8>,
}

type Mailboxes = Arc<RwLock<HashMap<tandem_core::TabId, mpsc::UnboundedSender<Packet>>>>;

/// Registry connecting all tabs of one simulated session.
#[derive(Clone, Default)]
pub struct MemoryHub {
    mailboxes: Mailboxes,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new tab endpoint to the hub.
    pub async fn attach(&self, tab: tandem_core::TabId) -> MemoryTransport {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.mailboxes.write().await.insert(tab, sender);
        MemoryTransport {
            id: tab,
            mailboxes: self.mailboxes.clone(),
            receiver: Arc::new(Mutex::new(receiver)),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Remove a tab from the hub (simulated crash: peers stop
    /// reaching it, its mailbox drains nowhere).
    pub async fn detach(&self, tab: tandem_core::TabId) {
        self.mailboxes.write().await.remove(&tab);
    }

    /// Number of currently attached tabs.
    pub async fn attached(&self) -> usize {
        self.mailboxes.read().await.len()
    }
}

/// One tab's endpoint on the in-memory hub.
#[derive(Clone)]
pub struct MemoryTransport {
    id: tandem_core::TabId,
    mailboxes: Mailboxes,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Packet>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Simulate the medium failing (or recovering) for this tab.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Re-attach after a detach with a fresh, empty mailbox. Frames
    /// broadcast while detached are gone, which is exactly the version
    /// gap a frozen-then-resumed tab observes.
    pub async fn rejoin(&self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.mailboxes.write().await.insert(self.id, sender);
        *self.receiver.lock().await = receiver;
    }

    fn decode(packet: Packet) -> Option<Envelope> {
        match decode_frame(&packet.bytes) {
            Ok(frame) => Some(Envelope {
                from: packet.from,
                frame,
            }),
            Err(e) => {
                tracing::warn!(from = %packet.from, error = %e, "dropping undecodable frame");
                None
            }
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_id(&self) -> tandem_core::TabId {
        self.id
    }

    async fn broadcast(&self, frame: WireFrame) -> TransportResult<()> {
        if self.is_offline() {
            return Err(TransportError::Unavailable);
        }
        let bytes = encode_frame(&frame)?;
        let mailboxes = self.mailboxes.read().await;
        for (tab, sender) in mailboxes.iter() {
            if *tab == self.id {
                continue;
            }
            // A dead peer is "not delivered", never an error here.
            if sender
                .send(Packet {
                    from: self.id,
                    bytes: bytes.clone(),
                })
                .is_err()
            {
                tracing::debug!(peer = %tab, "broadcast to detached peer dropped");
            }
        }
        Ok(())
    }

    async fn send_to(&self, peer: tandem_core::TabId, frame: WireFrame) -> TransportResult<()> {
        if self.is_offline() {
            return Err(TransportError::Unavailable);
        }
        let bytes = encode_frame(&frame)?;
        let mailboxes = self.mailboxes.read().await;
        let sender = mailboxes
            .get(&peer)
            .ok_or(TransportError::PeerUnreachable { peer })?;
        sender
            .send(Packet {
                from: self.id,
                bytes,
            })
            .map_err(|_| TransportError::PeerUnreachable { peer })
    }

    async fn recv(&self, timeout: Duration) -> TransportResult<Option<Envelope>> {
        let mut receiver = self.receiver.lock().await;
        match tokio::time::timeout(timeout, receiver.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(None) => Err(TransportError::ChannelClosed),
            Ok(Some(packet)) => Ok(Self::decode(packet)),
        }
    }

    fn try_recv(&self) -> Option<Envelope> {
        let mut receiver = self.receiver.try_lock().ok()?;
        loop {
            match receiver.try_recv() {
                Ok(packet) => {
                    if let Some(envelope) = Self::decode(packet) {
                        return Some(envelope);
                    }
                    // Undecodable frame dropped; keep draining.
                }
                Err(_) => return None,
            }
        }
    }
}
