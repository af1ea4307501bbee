//! Change notifications delivered after a write lock is released

use crate::model::FileLocation;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Summary of what one write-lock episode changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Locations that lost a version
    pub cleared: BTreeSet<FileLocation>,
    /// Locations whose existing version got new content
    pub rewritten: BTreeSet<FileLocation>,
    /// Locations that gained a version
    pub added: BTreeSet<FileLocation>,
    /// The store was rebuilt or reloaded from disk
    pub reloaded: bool,
}

impl ChangeEvent {
    pub fn is_empty(&self) -> bool {
        !self.reloaded
            && self.cleared.is_empty()
            && self.rewritten.is_empty()
            && self.added.is_empty()
    }

    pub fn record_cleared(&mut self, location: &FileLocation) {
        self.cleared.insert(location.clone());
    }

    pub fn record_rewritten(&mut self, location: &FileLocation) {
        self.rewritten.insert(location.clone());
    }

    pub fn record_added(&mut self, location: &FileLocation) {
        self.added.insert(location.clone());
    }

    pub fn reloaded() -> Self {
        Self {
            reloaded: true,
            ..Self::default()
        }
    }
}

/// Callback invoked with each non-empty change event
pub type ChangeListener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;
