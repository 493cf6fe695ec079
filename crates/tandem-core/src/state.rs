//! The replicated global-state snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Snapshot version. Increases by exactly 1 per accepted mutation and
/// never decreases as observed by any single tab.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct Version(pub u64);

impl Version {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// The immutable, versioned application-state value replicated across
/// tabs.
///
/// The payload is an opaque mapping; a `BTreeMap` keeps serialization
/// deterministic so converged tabs hold bit-identical snapshots. Only
/// the current leader originates new versions, but any tab adopts a
/// version newer than its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GlobalState {
    version: Version,
    payload: BTreeMap<String, Value>,
}

impl GlobalState {
    /// The empty initial snapshot at version 0.
    pub fn initial() -> Self {
        Self::default()
    }

    /// Rebuild a snapshot from parts (resync adoption, tests).
    pub fn from_parts(version: Version, payload: BTreeMap<String, Value>) -> Self {
        Self { version, payload }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn payload(&self) -> &BTreeMap<String, Value> {
        &self.payload
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Derive the successor snapshot with a new payload. The version
    /// bump is owned here so reducers cannot skip or repeat versions.
    pub fn advanced(&self, payload: BTreeMap<String, Value>) -> Self {
        Self {
            version: self.version.next(),
            payload,
        }
    }

    /// Convenience for reducers: successor snapshot with one key set.
    pub fn advanced_with(&self, key: impl Into<String>, value: Value) -> Self {
        let mut payload = self.payload.clone();
        payload.insert(key.into(), value);
        self.advanced(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn advanced_bumps_version_by_exactly_one() {
        let s0 = GlobalState::initial();
        let s1 = s0.advanced_with("unread", json!(3));
        let s2 = s1.advanced_with("unread", json!(4));
        assert_eq!(s0.version(), Version(0));
        assert_eq!(s1.version(), Version(1));
        assert_eq!(s2.version(), Version(2));
        assert_eq!(s2.get("unread"), Some(&json!(4)));
    }

    #[test]
    fn serialization_is_deterministic() {
        let mut a = BTreeMap::new();
        a.insert("z".to_string(), json!(1));
        a.insert("a".to_string(), json!(2));
        let mut b = BTreeMap::new();
        b.insert("a".to_string(), json!(2));
        b.insert("z".to_string(), json!(1));

        let sa = GlobalState::from_parts(Version(4), a);
        let sb = GlobalState::from_parts(Version(4), b);
        let ja = serde_json::to_vec(&sa).expect("serializes");
        let jb = serde_json::to_vec(&sb).expect("serializes");
        assert_eq!(ja, jb);
    }
}
