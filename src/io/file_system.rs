//! File system access for the filesystem-backed project model
//!
//! All disk access of [`crate::project::FilesystemProject`] goes through
//! [`FileSystemTrait`], so tests can run the project against an in-memory tree.

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Modification time and size of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    pub modified: SystemTime,
    pub size: u64,
}

impl FileMetadata {
    pub fn new(modified: SystemTime, size: u64) -> Self {
        Self { modified, size }
    }

    pub fn from_std_metadata(metadata: &std::fs::Metadata) -> Result<Self, std::io::Error> {
        Ok(Self {
            modified: metadata.modified()?,
            size: metadata.len(),
        })
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait FileSystemTrait: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn read(&self, path: &Path) -> Result<Vec<u8>, std::io::Error>;

    fn metadata(&self, path: &Path) -> Result<FileMetadata, std::io::Error>;

    /// Every regular file below `root`, in a stable order
    fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>, std::io::Error>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RealFileSystem;

impl FileSystemTrait for RealFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>, std::io::Error> {
        std::fs::read(path)
    }

    fn metadata(&self, path: &Path) -> Result<FileMetadata, std::io::Error> {
        let metadata = std::fs::metadata(path)?;
        FileMetadata::from_std_metadata(&metadata)
    }

    fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::other)?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}

#[cfg(test)]
mod test_filesystem {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    type TestFileData = BTreeMap<PathBuf, (Vec<u8>, SystemTime)>;

    /// Shared in-memory tree; clones see each other's updates
    #[derive(Clone, Default)]
    pub struct TestFileSystem {
        state: Arc<Mutex<TestFileData>>,
    }

    impl TestFileSystem {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert_file(&self, path: impl Into<PathBuf>, content: &str, modified: SystemTime) {
            self.state
                .lock()
                .insert(path.into(), (content.as_bytes().to_vec(), modified));
        }

        pub fn remove_file(&self, path: impl AsRef<Path>) {
            self.state.lock().remove(path.as_ref());
        }
    }

    impl FileSystemTrait for TestFileSystem {
        fn exists(&self, path: &Path) -> bool {
            self.state.lock().contains_key(path)
        }

        fn read(&self, path: &Path) -> Result<Vec<u8>, std::io::Error> {
            self.state
                .lock()
                .get(path)
                .map(|(content, _)| content.clone())
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "File not found"))
        }

        fn metadata(&self, path: &Path) -> Result<FileMetadata, std::io::Error> {
            self.state
                .lock()
                .get(path)
                .map(|(content, modified)| FileMetadata::new(*modified, content.len() as u64))
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "File not found"))
        }

        fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
            Ok(self
                .state
                .lock()
                .keys()
                .filter(|path| path.starts_with(root))
                .cloned()
                .collect())
        }
    }
}

#[cfg(test)]
pub use test_filesystem::TestFileSystem;
