//! I/O layer
//!
//! File system abstraction used by the filesystem project model.

pub mod file_system;

pub use file_system::{FileMetadata, FileSystemTrait, RealFileSystem};

#[cfg(test)]
pub use file_system::{MockFileSystemTrait, TestFileSystem};
