//! Canonical file identities
//!
//! A [`FileLocation`] names a file independently of any handle or parse. Different
//! spellings of one path (`inc/./a.h`, `inc/sub/../a.h`) normalize to the same location.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Scheme used for locations backed by the local filesystem
pub const FILE_SCHEME: &str = "file";

/// Canonical, comparable identity of a file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileLocation {
    scheme: String,
    path: PathBuf,
}

impl FileLocation {
    pub fn new(scheme: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            scheme: scheme.into(),
            path: normalize(path.as_ref()),
        }
    }

    /// Location of a file on the local filesystem
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::new(FILE_SCHEME, path)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }

    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|ext| ext.to_str())
    }

    /// Directory containing this file, in the same scheme
    pub fn parent(&self) -> Option<FileLocation> {
        self.path.parent().map(|parent| Self {
            scheme: self.scheme.clone(),
            path: parent.to_path_buf(),
        })
    }

    /// Resolve `relative` against this location, treating it as a directory
    pub fn join(&self, relative: impl AsRef<Path>) -> FileLocation {
        Self::new(self.scheme.clone(), self.path.join(relative))
    }
}

impl fmt::Display for FileLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.path.display())
    }
}

/// Lexical normalization; never touches the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let ends_with_parent =
                    matches!(normalized.components().next_back(), Some(Component::ParentDir));
                if ends_with_parent || (!normalized.pop() && !normalized.has_root()) {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
