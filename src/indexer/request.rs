//! What an indexing task is asked to do

use crate::config::{IndexerConfig, UnusedHeaderStrategy};
use crate::model::FileLocation;
use crate::project::ProjectModel;
use crate::store::StoreView;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // the first group is plenty to tell tasks apart in logs
        let id = self.0.simple().to_string();
        write!(f, "{}", &id[..8])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedFile {
    pub path: PathBuf,
    /// Higher priorities are parsed first
    pub priority: i32,
    /// Reparse even if the stored versions look current
    pub force: bool,
}

impl RequestedFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            priority: 0,
            force: false,
        }
    }
}

/// Files to (re)index and files to drop from the index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRequest {
    pub files: Vec<RequestedFile>,
    pub removed: Vec<PathBuf>,
}

impl IndexRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every file the project knows about. Stored files the project neither lists nor
    /// can find any more are requested for removal.
    pub fn full(project: &dyn ProjectModel, store: &StoreView<'_>) -> Self {
        let files = project.files();
        let listed: HashSet<&FileLocation> = files.iter().collect();
        let stored: BTreeSet<FileLocation> = store
            .all_files()
            .into_iter()
            .map(|key| key.location)
            .filter(|location| !listed.contains(location))
            .collect();
        let removed: Vec<PathBuf> = stored
            .into_iter()
            .filter(|location| {
                project
                    .stat(location)
                    .is_err_and(|e| e.is_not_found())
            })
            .map(|location| location.path().to_path_buf())
            .collect();
        debug!(
            "Full request: {} project files, {} stored files gone",
            files.len(),
            removed.len()
        );
        Self {
            files: files
                .iter()
                .map(|location| RequestedFile::new(location.path()))
                .collect(),
            removed,
        }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(RequestedFile::new(path));
        self
    }

    pub fn with_priority_file(mut self, path: impl Into<PathBuf>, priority: i32) -> Self {
        self.files.push(RequestedFile {
            priority,
            ..RequestedFile::new(path)
        });
        self
    }

    pub fn with_forced_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(RequestedFile {
            force: true,
            ..RequestedFile::new(path)
        });
        self
    }

    pub fn with_removed(mut self, path: impl Into<PathBuf>) -> Self {
        self.removed.push(path.into());
        self
    }

    pub fn file_count(&self) -> usize {
        self.files.len() + self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.removed.is_empty()
    }
}

/// Flags of one indexing task; tasks with equal options are compatible for absorption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexerTaskOptions {
    /// Reparse every requested file
    pub force: bool,
    /// Reparse versions that have unresolved includes
    pub force_unresolved: bool,
    pub check_timestamps: bool,
    pub check_content_hash: bool,
    pub unused_headers: UnusedHeaderStrategy,
    pub index_files_not_in_build: bool,
}

impl IndexerTaskOptions {
    pub fn from_config(config: &IndexerConfig) -> Self {
        Self {
            force: false,
            force_unresolved: false,
            check_timestamps: config.check_timestamps,
            check_content_hash: config.check_content_hash,
            unused_headers: config.unused_headers,
            index_files_not_in_build: config.index_files_not_in_build,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_force_unresolved(mut self, force_unresolved: bool) -> Self {
        self.force_unresolved = force_unresolved;
        self
    }
}

impl Default for IndexerTaskOptions {
    fn default() -> Self {
        Self::from_config(&IndexerConfig::default())
    }
}
