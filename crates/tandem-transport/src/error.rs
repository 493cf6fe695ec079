//! Transport-layer errors.

use tandem_core::TabId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("peer {peer} is not reachable")]
    PeerUnreachable { peer: TabId },

    #[error("transport channel closed")]
    ChannelClosed,

    #[error("transport offline")]
    Unavailable,

    #[error("wire codec failure: {reason}")]
    Codec { reason: String },
}
