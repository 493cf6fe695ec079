//! Inter-tab wire format.
//!
//! Every message exchanged between tabs is one closed [`WireFrame`]
//! variant. Tab-local overlay state is deliberately absent from this
//! enum: it is never replicated.

use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use tandem_core::{Action, ActionId, Epoch, GlobalState, Lease, LeaseClaim, TabId, Version};

pub const WIRE_SCHEMA_VERSION: u16 = 1;

/// All inter-tab coordination messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireFrame {
    /// Periodic liveness beacon. A tab silent for the heartbeat
    /// timeout is declared dead.
    Heartbeat { from: TabId, at_ms: u64 },

    /// A candidate's bid for leadership.
    ClaimLease { claim: LeaseClaim },

    /// The leader re-asserting (or extending) its lease.
    LeaseRenewal { lease: Lease },

    /// A follower forwarding a leader-only action. `epoch` is the
    /// epoch the forwarder believed current, so a superseded leader
    /// can drop stale forwards.
    ForwardAction { action: Action, epoch: Epoch },

    /// Optimistic fan-out of a Broadcast-class action; receivers apply
    /// through their own store and reconcile by version.
    ActionGossip { action: Action },

    /// The leader publishing a freshly produced snapshot. `applied`
    /// carries the action ids folded into this version so forwarding
    /// tabs can resolve their in-flight dispatches.
    Snapshot {
        state: GlobalState,
        applied: Vec<ActionId>,
        from: TabId,
    },

    /// Gap detected: ask the sender (or leader) for a full snapshot.
    ResyncRequest { from: TabId, have: Version },

    /// Full-state answer to a resync request.
    ResyncResponse { state: GlobalState },
}

/// Versioned envelope so future schema changes stay detectable.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    schema_version: u16,
    frame: WireFrame,
}

pub fn encode_frame(frame: &WireFrame) -> Result<Vec<u8>, TransportError> {
    let msg = WireMessage {
        schema_version: WIRE_SCHEMA_VERSION,
        frame: frame.clone(),
    };
    bincode::serialize(&msg).map_err(|e| TransportError::Codec {
        reason: e.to_string(),
    })
}

pub fn decode_frame(bytes: &[u8]) -> Result<WireFrame, TransportError> {
    let msg: WireMessage = bincode::deserialize(bytes).map_err(|e| TransportError::Codec {
        reason: e.to_string(),
    })?;
    if msg.schema_version != WIRE_SCHEMA_VERSION {
        return Err(TransportError::Codec {
            reason: format!("unsupported wire schema {}", msg.schema_version),
        });
    }
    Ok(msg.frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tandem_core::RoutingClass;

    fn tab(b: u8) -> TabId {
        TabId::new_from_entropy([b; 16])
    }

    #[test]
    fn frames_survive_the_codec() {
        let action = Action::new(tab(1), "chat/send", RoutingClass::LeaderOnly, json!({"m": "hi"}));
        let frame = WireFrame::ForwardAction {
            action,
            epoch: Epoch(4),
        };
        let bytes = encode_frame(&frame).expect("encodes");
        let decoded = decode_frame(&bytes).expect("decodes");
        assert_eq!(frame, decoded);
    }

    #[test]
    fn unknown_schema_version_is_rejected() {
        let frame = WireFrame::Heartbeat {
            from: tab(2),
            at_ms: 10,
        };
        let mut bytes = encode_frame(&frame).expect("encodes");
        // schema_version is the first little-endian u16 in the envelope
        bytes[0] = 0xFF;
        bytes[1] = 0xFF;
        let err = decode_frame(&bytes).expect_err("rejects");
        assert!(matches!(err, TransportError::Codec { .. }));
    }
}
