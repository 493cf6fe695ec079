//! Durable lease records.
//!
//! The highest epoch this browser profile has ever observed is written
//! through a [`LeaseStore`] so that a full reload cannot restart the
//! election below it. Without this, a reloaded tab could claim an old
//! epoch and briefly win against a leader it should defer to.
//!
//! Stored records only ever move the epoch up; a save carrying a lower
//! epoch than the stored one is silently kept at the stored value.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tandem_core::{Epoch, TabId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LeaseStoreError {
    #[error("lease store io: {0}")]
    Io(#[from] std::io::Error),

    #[error("lease record corrupt: {reason}")]
    Corrupt { reason: String },
}

/// What survives a reload: the last lease we knew about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub epoch: Epoch,
    pub holder: TabId,
    pub recorded_at_ms: u64,
}

/// Persistence seam for lease records.
pub trait LeaseStore: Send {
    fn load(&self) -> Result<Option<LeaseRecord>, LeaseStoreError>;

    /// Persist the record if its epoch is at least the stored one.
    /// Returns the record now on disk.
    fn save(&self, record: LeaseRecord) -> Result<LeaseRecord, LeaseStoreError>;
}

/// In-memory store for tests and ephemeral profiles.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    record: parking_lot::Mutex<Option<LeaseRecord>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn load(&self) -> Result<Option<LeaseRecord>, LeaseStoreError> {
        Ok(*self.record.lock())
    }

    fn save(&self, record: LeaseRecord) -> Result<LeaseRecord, LeaseStoreError> {
        let mut slot = self.record.lock();
        match *slot {
            Some(stored) if stored.epoch > record.epoch => Ok(stored),
            _ => {
                *slot = Some(record);
                Ok(record)
            }
        }
    }
}

/// JSON file store, written atomically via a sibling temp file so a
/// crash mid-save never leaves a truncated record.
#[derive(Debug)]
pub struct FileLeaseStore {
    path: PathBuf,
}

impl FileLeaseStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomic(&self, record: &LeaseRecord) -> Result<(), LeaseStoreError> {
        let tmp = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(record).map_err(|e| LeaseStoreError::Corrupt {
            reason: e.to_string(),
        })?;
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl LeaseStore for FileLeaseStore {
    fn load(&self) -> Result<Option<LeaseRecord>, LeaseStoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record = serde_json::from_slice(&bytes).map_err(|e| LeaseStoreError::Corrupt {
            reason: e.to_string(),
        })?;
        Ok(Some(record))
    }

    fn save(&self, record: LeaseRecord) -> Result<LeaseRecord, LeaseStoreError> {
        if let Some(stored) = self.load()? {
            if stored.epoch > record.epoch {
                return Ok(stored);
            }
        }
        self.write_atomic(&record)?;
        tracing::debug!(epoch = %record.epoch, "lease record persisted");
        Ok(record)
    }
}
