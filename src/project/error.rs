use crate::model::FileLocation;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not part of the project: {location}")]
    UnknownFile { location: FileLocation },

    #[error("Cannot read {location}: {reason}")]
    Unreadable {
        location: FileLocation,
        reason: String,
    },

    #[error("Source root directory not found: {path}")]
    SourceRootNotFound { path: String },

    #[error("Compilation database not found: {path}")]
    CompilationDatabaseNotFound { path: String },

    #[error("Compilation database is invalid: {error}")]
    CompilationDatabaseInvalid { error: String },

    #[error("Compilation database is empty")]
    CompilationDatabaseEmpty,
}

impl ProjectError {
    /// The file vanished or was never there, as opposed to a failing read
    pub fn is_not_found(&self) -> bool {
        match self {
            ProjectError::UnknownFile { .. } => true,
            ProjectError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
