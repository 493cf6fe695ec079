//! Tab identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier for one execution context (a browser tab) participating in
/// the shared session.
///
/// TabIds are opaque, globally unique, and immutable for the life of the
/// tab. The derived total order doubles as the deterministic tie-break
/// key during leader election: when two tabs claim the same epoch
/// concurrently, the smaller id wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TabId(pub Uuid);

impl TabId {
    /// Generate a fresh random tab identity. Called once at tab startup.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a tab ID from caller-provided entropy (tests, simulation).
    pub fn new_from_entropy(entropy: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(entropy))
    }

    /// Create from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// Get bytes representation
    pub fn to_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab-{}", self.0)
    }
}

impl FromStr for TabId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Handle both raw UUIDs and prefixed format
        let uuid_str = s.strip_prefix("tab-").unwrap_or(s);
        Ok(TabId(Uuid::parse_str(uuid_str)?))
    }
}

impl From<Uuid> for TabId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
