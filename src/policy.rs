//! Update policy
//!
//! Decides when file changes become indexing work. In `Immediate` mode every batch of
//! changes turns into a request right away; `Deferred` collects changes until the build
//! finishes; `Manual` collects them until an update is requested explicitly.

use crate::config::UpdateMode;
use crate::indexer::IndexRequest;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, info};

// ============================================================================
// File Changes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Added(PathBuf),
    Changed(PathBuf),
    Removed(PathBuf),
    /// Reindex even if the file looks unchanged
    Forced(PathBuf),
}

/// Changes collected while the policy holds them back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PendingChanges {
    forced: BTreeSet<PathBuf>,
    changed: BTreeSet<PathBuf>,
    removed: BTreeSet<PathBuf>,
}

impl PendingChanges {
    /// Later changes to a path win over earlier ones
    fn record(&mut self, change: FileChange) {
        match change {
            FileChange::Added(path) | FileChange::Changed(path) => {
                self.removed.remove(&path);
                if !self.forced.contains(&path) {
                    self.changed.insert(path);
                }
            }
            FileChange::Forced(path) => {
                self.removed.remove(&path);
                self.changed.remove(&path);
                self.forced.insert(path);
            }
            FileChange::Removed(path) => {
                self.forced.remove(&path);
                self.changed.remove(&path);
                self.removed.insert(path);
            }
        }
    }

    fn len(&self) -> usize {
        self.forced.len() + self.changed.len() + self.removed.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn into_request(self) -> Option<IndexRequest> {
        if self.is_empty() {
            return None;
        }
        let mut request = IndexRequest::new();
        for path in self.forced {
            request = request.with_forced_file(path);
        }
        for path in self.changed {
            request = request.with_file(path);
        }
        for path in self.removed {
            request = request.with_removed(path);
        }
        Some(request)
    }
}

// ============================================================================
// Update Policy
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct UpdatePolicy {
    mode: UpdateMode,
    pending: PendingChanges,
}

impl UpdatePolicy {
    pub fn new(mode: UpdateMode) -> Self {
        Self {
            mode,
            pending: PendingChanges::default(),
        }
    }

    pub fn mode(&self) -> UpdateMode {
        self.mode
    }

    /// Number of paths held back
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Take in a batch of changes; returns the work to do now, if any
    pub fn handle_changes(
        &mut self,
        changes: impl IntoIterator<Item = FileChange>,
    ) -> Option<IndexRequest> {
        for change in changes {
            self.pending.record(change);
        }
        match self.mode {
            UpdateMode::Immediate => self.flush(),
            UpdateMode::Deferred | UpdateMode::Manual => {
                debug!("UpdatePolicy: holding {} changes ({:?})", self.pending.len(), self.mode);
                None
            }
        }
    }

    /// The build finished; deferred changes are due
    pub fn build_finished(&mut self) -> Option<IndexRequest> {
        match self.mode {
            UpdateMode::Deferred => self.flush(),
            UpdateMode::Immediate | UpdateMode::Manual => None,
        }
    }

    /// Explicit request to bring the index up to date
    pub fn request_update(&mut self) -> Option<IndexRequest> {
        self.flush()
    }

    /// Switch modes. Leaving a collecting mode for `Immediate` hands over what was
    /// collected; switching between collecting modes keeps it.
    pub fn set_mode(&mut self, mode: UpdateMode) -> Option<IndexRequest> {
        if mode == self.mode {
            return None;
        }
        info!("UpdatePolicy: {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        match mode {
            UpdateMode::Immediate => self.flush(),
            UpdateMode::Deferred | UpdateMode::Manual => None,
        }
    }

    /// Forget everything collected
    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            debug!("UpdatePolicy: dropping {} collected changes", self.pending.len());
        }
        self.pending = PendingChanges::default();
    }

    fn flush(&mut self) -> Option<IndexRequest> {
        let request = std::mem::take(&mut self.pending).into_request()?;
        debug!("UpdatePolicy: releasing {} changes", request.file_count());
        Some(request)
    }
}
