//! In-memory project for tests and embedding hosts

use super::{ProjectError, ProjectModel};
use crate::model::{FileContent, FileLocation, FileStat, LinkageId, DEFAULT_ENCODING};
use crate::parser::ScannerConfig;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone)]
struct MemoryFile {
    text: String,
    modified: DateTime<Utc>,
    in_build: bool,
    /// Overrides the project-wide configuration for this source
    config: Option<ScannerConfig>,
}

#[derive(Debug)]
struct MemoryState {
    files: BTreeMap<FileLocation, MemoryFile>,
    default_config: ScannerConfig,
    /// Monotonic clock so every edit gets a distinct modification time
    clock: DateTime<Utc>,
}

/// Files held in memory with a logical clock for modification times
#[derive(Debug)]
pub struct MemoryProject {
    state: RwLock<MemoryState>,
}

impl Default for MemoryProject {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProject {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState {
                files: BTreeMap::new(),
                default_config: ScannerConfig::new(),
                clock: DateTime::<Utc>::default() + Duration::days(365 * 50),
            }),
        }
    }

    pub fn with_config(self, config: ScannerConfig) -> Self {
        self.state.write().default_config = config;
        self
    }

    fn tick(state: &mut MemoryState) -> DateTime<Utc> {
        state.clock += Duration::seconds(1);
        state.clock
    }

    /// Add a file that belongs to the build
    pub fn add_file(&self, path: impl AsRef<Path>, text: impl Into<String>) -> FileLocation {
        let location = FileLocation::file(path);
        let mut state = self.state.write();
        let modified = Self::tick(&mut state);
        state.files.insert(
            location.clone(),
            MemoryFile {
                text: text.into(),
                modified,
                in_build: true,
                config: None,
            },
        );
        location
    }

    /// Replace the text, advancing the modification time
    pub fn update_file(&self, path: impl AsRef<Path>, text: impl Into<String>) -> bool {
        let location = FileLocation::file(path);
        let mut state = self.state.write();
        let modified = Self::tick(&mut state);
        match state.files.get_mut(&location) {
            Some(file) => {
                file.text = text.into();
                file.modified = modified;
                true
            }
            None => false,
        }
    }

    /// Advance the modification time without changing the text
    pub fn touch(&self, path: impl AsRef<Path>) -> bool {
        let location = FileLocation::file(path);
        let mut state = self.state.write();
        let modified = Self::tick(&mut state);
        match state.files.get_mut(&location) {
            Some(file) => {
                file.modified = modified;
                true
            }
            None => false,
        }
    }

    pub fn remove_file(&self, path: impl AsRef<Path>) -> bool {
        self.state
            .write()
            .files
            .remove(&FileLocation::file(path))
            .is_some()
    }

    pub fn set_in_build(&self, path: impl AsRef<Path>, in_build: bool) {
        if let Some(file) = self.state.write().files.get_mut(&FileLocation::file(path)) {
            file.in_build = in_build;
        }
    }

    pub fn set_scanner_config(&self, path: impl AsRef<Path>, config: ScannerConfig) {
        if let Some(file) = self.state.write().files.get_mut(&FileLocation::file(path)) {
            file.config = Some(config);
        }
    }
}

impl ProjectModel for MemoryProject {
    fn files(&self) -> Vec<FileLocation> {
        self.state.read().files.keys().cloned().collect()
    }

    fn resolve_location(&self, path: &Path) -> Option<FileLocation> {
        let location = FileLocation::file(path);
        self.state
            .read()
            .files
            .contains_key(&location)
            .then_some(location)
    }

    fn exists(&self, location: &FileLocation) -> bool {
        self.state.read().files.contains_key(location)
    }

    fn is_in_build(&self, location: &FileLocation) -> bool {
        self.state
            .read()
            .files
            .get(location)
            .is_some_and(|file| file.in_build)
    }

    fn scanner_config(&self, location: &FileLocation, _linkage: LinkageId) -> ScannerConfig {
        let state = self.state.read();
        state
            .files
            .get(location)
            .and_then(|file| file.config.clone())
            .unwrap_or_else(|| state.default_config.clone())
    }

    fn stat(&self, location: &FileLocation) -> Result<FileStat, ProjectError> {
        let state = self.state.read();
        let file = state
            .files
            .get(location)
            .ok_or_else(|| ProjectError::UnknownFile {
                location: location.clone(),
            })?;
        Ok(FileStat::new(
            file.modified,
            file.text.len() as u64,
            DEFAULT_ENCODING,
        ))
    }

    fn content(&self, location: &FileLocation) -> Result<FileContent, ProjectError> {
        let state = self.state.read();
        let file = state
            .files
            .get(location)
            .ok_or_else(|| ProjectError::UnknownFile {
                location: location.clone(),
            })?;
        Ok(FileContent::new(
            location.clone(),
            file.text.clone(),
            file.modified,
        ))
    }
}
