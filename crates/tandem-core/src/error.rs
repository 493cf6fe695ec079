//! Coordination error taxonomy.
//!
//! Recoverable conditions (`VersionConflict`, duplicate action ids)
//! are absorbed by the store/reconciler and never crash a tab; the
//! dispatch-surfaced failures (`NoLeaderAvailable`,
//! `LeaderChangedRetryExhausted`) are typed so the UI layer can retry
//! or inform the user.

use crate::state::Version;
use thiserror::Error;

/// Errors a reducer may raise while computing the next snapshot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReducerError {
    #[error("action rejected by reducer: {reason}")]
    Rejected { reason: String },

    #[error("missing required payload field '{key}'")]
    MissingField { key: &'static str },

    #[error("malformed payload: {reason}")]
    MalformedPayload { reason: String },
}

/// Top-level coordination failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordError {
    #[error("no reducer registered for action kind '{kind}'")]
    ReducerNotFound { kind: String },

    #[error("action targets stale version {targeted} (current {current})")]
    VersionConflict { current: Version, targeted: Version },

    #[error("no leader available within the action queue window")]
    NoLeaderAvailable,

    #[error("leadership changed while forwarding; retry budget exhausted")]
    LeaderChangedRetryExhausted,

    #[error("transport unavailable; tab degraded to standalone mode")]
    TransportUnavailable,

    /// A version gap could not be closed within the resync window. The
    /// session keeps serving its snapshot (marked stale) and settles
    /// any dispatch whose apply confirmation was lost with the resync.
    #[error("resync with peers failed; local snapshot may be stale")]
    ResyncFailed,

    #[error("dispatch cancelled by caller before forwarding")]
    Cancelled,

    #[error(transparent)]
    Reducer(#[from] ReducerError),
}

impl CoordError {
    /// Recoverable conditions are absorbed silently by the store and
    /// reconciler rather than surfaced to dispatch callers.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CoordError::VersionConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn version_conflict_is_recoverable() {
        let err = CoordError::VersionConflict {
            current: Version(5),
            targeted: Version(3),
        };
        assert!(err.is_recoverable());
        assert!(!CoordError::NoLeaderAvailable.is_recoverable());
    }

    #[test]
    fn reducer_error_converts() {
        let err: CoordError = ReducerError::MissingField { key: "channel_id" }.into();
        assert_matches!(err, CoordError::Reducer(_));
    }
}
