use super::FileId;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the index store and its lock
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Cancelled while waiting for the index lock")]
    Cancelled,

    #[error("Timed out after {waited:?} waiting for the index write lock")]
    LockTimeout { waited: Duration },

    #[error("Index write lock is not held")]
    WriteLockNotHeld,

    #[error("Index store corrupted: {} - {reason}", .path.display())]
    Corrupted { path: PathBuf, reason: String },

    #[error("Unsupported index format version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Unknown file record {0}")]
    UnknownRecord(FileId),

    #[error("No uncommitted version {0}")]
    NotUncommitted(FileId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn corrupted(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Faults that make the persisted store unusable; recovery means rebuilding it
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            StoreError::Corrupted { .. } | StoreError::UnsupportedVersion { .. }
        )
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, StoreError::Cancelled)
    }
}
