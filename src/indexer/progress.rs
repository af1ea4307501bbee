//! Progress counters of an indexing run

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Snapshot of a run's progress; cheap to copy across threads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexerProgress {
    /// Files the run was asked to index or remove
    pub requested: usize,
    /// Location tasks that still need work
    pub remaining: usize,
    pub completed_sources: usize,
    /// Headers that were explicitly requested; also counted in `completed_headers`
    pub primary_headers: usize,
    /// Every header stored, including ones discovered through includes
    pub completed_headers: usize,
    pub removed_files: usize,
    pub errors: usize,
}

impl IndexerProgress {
    pub fn completed(&self) -> usize {
        self.completed_sources + self.completed_headers + self.removed_files
    }

    /// Fold the counters of a nested run into this one
    pub fn absorb(&mut self, other: &IndexerProgress) {
        self.completed_sources += other.completed_sources;
        self.primary_headers += other.primary_headers;
        self.completed_headers += other.completed_headers;
        self.removed_files += other.removed_files;
        self.errors += other.errors;
    }
}

impl fmt::Display for IndexerProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sources, {} headers ({} requested), {} removed, {} errors, {} remaining",
            self.completed_sources,
            self.completed_headers,
            self.primary_headers,
            self.removed_files,
            self.errors,
            self.remaining
        )
    }
}

/// Shared progress of a running task, readable from any thread
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle {
    inner: Arc<Mutex<IndexerProgress>>,
}

impl ProgressHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> IndexerProgress {
        *self.inner.lock()
    }

    pub fn update(&self, f: impl FnOnce(&mut IndexerProgress)) {
        f(&mut self.inner.lock());
    }
}
