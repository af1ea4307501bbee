//! Project model
//!
//! The indexer is a pure consumer of the project: it asks which files exist, which of
//! them are compiled sources, how each source is configured, and for the content and
//! stat of any file. [`ProjectModel`] is that interface; [`MemoryProject`] and
//! [`FilesystemProject`] implement it.

pub mod compilation_database;
pub mod error;
pub mod filesystem;
pub mod memory;

pub use compilation_database::{CompilationDatabase, CompileUnit};
pub use error::ProjectError;
pub use filesystem::FilesystemProject;
pub use memory::MemoryProject;

use crate::model::{FileContent, FileLocation, FileStat, LinkageId};
use crate::parser::ScannerConfig;
use std::path::Path;

#[cfg_attr(test, mockall::automock)]
pub trait ProjectModel: Send + Sync {
    /// Every file the project knows about, sources and headers
    fn files(&self) -> Vec<FileLocation>;

    /// Canonical location of `path`, if the project can address it
    fn resolve_location(&self, path: &Path) -> Option<FileLocation>;

    fn exists(&self, location: &FileLocation) -> bool;

    fn is_source(&self, location: &FileLocation) -> bool {
        location
            .extension()
            .and_then(LinkageId::for_source_extension)
            .is_some()
    }

    /// Whether the file is compiled by the build (sources) or belongs to it (headers)
    fn is_in_build(&self, location: &FileLocation) -> bool;

    /// Linkages a source is compiled in; empty for headers
    fn source_linkages(&self, location: &FileLocation) -> Vec<LinkageId> {
        location
            .extension()
            .and_then(LinkageId::for_source_extension)
            .into_iter()
            .collect()
    }

    fn scanner_config(&self, location: &FileLocation, linkage: LinkageId) -> ScannerConfig;

    fn stat(&self, location: &FileLocation) -> Result<FileStat, ProjectError>;

    fn content(&self, location: &FileLocation) -> Result<FileContent, ProjectError>;

    /// Resolve an include directive the way a C preprocessor searches: the includer's
    /// directory for quoted includes, then the quote paths, then the include paths.
    fn resolve_include(
        &self,
        includer: &FileLocation,
        spelled: &str,
        system: bool,
        config: &ScannerConfig,
    ) -> Option<FileLocation> {
        let spelled_path = Path::new(spelled);
        if spelled_path.is_absolute() {
            let location = FileLocation::new(includer.scheme(), spelled_path);
            return self.exists(&location).then_some(location);
        }
        let local = (!system)
            .then(|| includer.parent())
            .flatten()
            .map(|dir| dir.join(spelled_path));
        let quoted = config
            .quote_include_paths
            .iter()
            .filter(|_| !system)
            .map(|dir| FileLocation::new(includer.scheme(), dir.join(spelled_path)));
        let searched = config
            .include_paths
            .iter()
            .map(|dir| FileLocation::new(includer.scheme(), dir.join(spelled_path)));

        local
            .into_iter()
            .chain(quoted)
            .chain(searched)
            .find(|candidate| self.exists(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Exists(Vec<&'static str>);

    impl ProjectModel for Exists {
        fn files(&self) -> Vec<FileLocation> {
            self.0.iter().map(FileLocation::file).collect()
        }
        fn resolve_location(&self, path: &Path) -> Option<FileLocation> {
            Some(FileLocation::file(path))
        }
        fn exists(&self, location: &FileLocation) -> bool {
            self.0.iter().any(|path| location.path() == Path::new(path))
        }
        fn is_in_build(&self, _: &FileLocation) -> bool {
            true
        }
        fn scanner_config(&self, _: &FileLocation, _: LinkageId) -> ScannerConfig {
            ScannerConfig::new()
        }
        fn stat(&self, location: &FileLocation) -> Result<FileStat, ProjectError> {
            Err(ProjectError::UnknownFile {
                location: location.clone(),
            })
        }
        fn content(&self, location: &FileLocation) -> Result<FileContent, ProjectError> {
            Err(ProjectError::UnknownFile {
                location: location.clone(),
            })
        }
    }

    #[test]
    fn test_provided_include_resolution() {
        let project = Exists(vec!["/src/local.h", "/quote/q.h", "/inc/local.h", "/inc/sys.h"]);
        let includer = FileLocation::file("/src/main.c");
        let config = ScannerConfig::new()
            .with_quote_include_path("/quote")
            .with_include_path("/inc");
        let resolve = |spelled: &str, system: bool| {
            project
                .resolve_include(&includer, spelled, system, &config)
                .map(|location| location.path().to_string_lossy().to_string())
        };

        assert_eq!(resolve("local.h", false).as_deref(), Some("/src/local.h"));
        // angle includes skip the includer's directory
        assert_eq!(resolve("local.h", true).as_deref(), Some("/inc/local.h"));
        assert_eq!(resolve("q.h", false).as_deref(), Some("/quote/q.h"));
        assert_eq!(resolve("q.h", true), None);
        assert_eq!(resolve("sys.h", true).as_deref(), Some("/inc/sys.h"));
        assert_eq!(resolve("/inc/sys.h", false).as_deref(), Some("/inc/sys.h"));
        assert_eq!(resolve("missing.h", false), None);
    }

    #[test]
    fn test_default_source_classification() {
        let project = Exists(vec![]);
        assert!(project.is_source(&FileLocation::file("/a.c")));
        assert!(project.is_source(&FileLocation::file("/a.cpp")));
        assert!(!project.is_source(&FileLocation::file("/a.h")));
        assert_eq!(
            project.source_linkages(&FileLocation::file("/a.cc")),
            vec![LinkageId::Cpp]
        );
        assert!(project.source_linkages(&FileLocation::file("/a.hpp")).is_empty());
    }
}
