//! Project backed by a source tree and its compilation database

use super::{CompilationDatabase, CompileUnit, ProjectError, ProjectModel};
use crate::io::{FileSystemTrait, RealFileSystem};
use crate::model::{FileContent, FileLocation, FileStat, LinkageId, DEFAULT_ENCODING};
use crate::parser::ScannerConfig;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Extensions treated as headers when walking the source root
pub const HEADER_EXTENSIONS: &[&str] =
    &["h", "hh", "hpp", "hxx", "h++", "inc", "inl", "ipp", "tcc"];

pub struct FilesystemProject<F: FileSystemTrait = RealFileSystem> {
    root: PathBuf,
    units: BTreeMap<FileLocation, CompileUnit>,
    /// Configuration for headers and sources outside the database
    fallback_config: ScannerConfig,
    fs: F,
}

impl FilesystemProject<RealFileSystem> {
    /// Open `root`, reading `compile_commands` when given
    pub fn open(
        root: impl Into<PathBuf>,
        compile_commands: Option<&Path>,
    ) -> Result<Self, ProjectError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(ProjectError::SourceRootNotFound {
                path: root.to_string_lossy().to_string(),
            });
        }
        let database = compile_commands
            .map(|path| CompilationDatabase::new(path.to_path_buf()))
            .transpose()?;
        Ok(Self::with_file_system(root, database, RealFileSystem))
    }
}

impl<F: FileSystemTrait> FilesystemProject<F> {
    pub fn with_file_system(root: PathBuf, database: Option<CompilationDatabase>, fs: F) -> Self {
        let mut units = BTreeMap::new();
        let mut fallback_config = ScannerConfig::new();
        for unit in database.iter().flat_map(|db| db.units()) {
            for path in &unit.config.include_paths {
                if !fallback_config.include_paths.contains(path) {
                    fallback_config.include_paths.push(path.clone());
                }
            }
            for path in &unit.config.quote_include_paths {
                if !fallback_config.quote_include_paths.contains(path) {
                    fallback_config.quote_include_paths.push(path.clone());
                }
            }
            units.insert(FileLocation::file(&unit.file), unit.clone());
        }
        debug!(
            "FilesystemProject: {} ({} compile units)",
            root.display(),
            units.len()
        );
        Self {
            root: FileLocation::file(&root).path().to_path_buf(),
            units,
            fallback_config,
            fs,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_header(location: &FileLocation) -> bool {
        location
            .extension()
            .is_some_and(|ext| HEADER_EXTENSIONS.contains(&ext))
    }
}

impl<F: FileSystemTrait> ProjectModel for FilesystemProject<F> {
    fn files(&self) -> Vec<FileLocation> {
        let mut files: Vec<FileLocation> = match self.fs.list_files(&self.root) {
            Ok(paths) => paths
                .into_iter()
                .map(FileLocation::file)
                .filter(|location| Self::is_header(location) || self.is_source(location))
                .collect(),
            Err(e) => {
                warn!("Cannot walk {}: {}", self.root.display(), e);
                Vec::new()
            }
        };
        files.extend(self.units.keys().cloned());
        files.sort();
        files.dedup();
        files
    }

    fn resolve_location(&self, path: &Path) -> Option<FileLocation> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let location = FileLocation::file(absolute);
        self.exists(&location).then_some(location)
    }

    fn exists(&self, location: &FileLocation) -> bool {
        self.fs.exists(location.path())
    }

    fn is_source(&self, location: &FileLocation) -> bool {
        self.units.contains_key(location)
            || location
                .extension()
                .and_then(LinkageId::for_source_extension)
                .is_some()
    }

    fn is_in_build(&self, location: &FileLocation) -> bool {
        if self.units.contains_key(location) {
            return true;
        }
        Self::is_header(location) && location.path().starts_with(&self.root)
    }

    fn source_linkages(&self, location: &FileLocation) -> Vec<LinkageId> {
        match self.units.get(location) {
            Some(unit) => vec![unit.linkage],
            None => location
                .extension()
                .and_then(LinkageId::for_source_extension)
                .into_iter()
                .collect(),
        }
    }

    fn scanner_config(&self, location: &FileLocation, _linkage: LinkageId) -> ScannerConfig {
        self.units
            .get(location)
            .map(|unit| unit.config.clone())
            .unwrap_or_else(|| self.fallback_config.clone())
    }

    fn stat(&self, location: &FileLocation) -> Result<FileStat, ProjectError> {
        let metadata = self.fs.metadata(location.path())?;
        Ok(FileStat::new(
            DateTime::<Utc>::from(metadata.modified),
            metadata.size,
            DEFAULT_ENCODING,
        ))
    }

    fn content(&self, location: &FileLocation) -> Result<FileContent, ProjectError> {
        let metadata = self.fs.metadata(location.path())?;
        let bytes = self.fs.read(location.path())?;
        let text = String::from_utf8(bytes).map_err(|e| ProjectError::Unreadable {
            location: location.clone(),
            reason: e.to_string(),
        })?;
        Ok(FileContent::new(
            location.clone(),
            text,
            DateTime::<Utc>::from(metadata.modified),
        ))
    }
}
