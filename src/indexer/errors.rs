use crate::model::{FileLocation, LinkageId};
use crate::parser::ParseError;
use crate::project::ProjectError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors that end an indexing run
///
/// Per-file faults are recovered inside the run and only show up here once the error
/// budget is spent.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Indexing cancelled")]
    Cancelled,

    #[error("Transient fault in {location}: {reason}")]
    Transient {
        location: FileLocation,
        reason: String,
    },

    #[error("Resource exhausted after {retries} retries: {reason}")]
    ResourceExhausted { retries: usize, reason: String },

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Project error: {0}")]
    Project(#[from] ProjectError),

    #[error("Too many errors ({count}); indexing aborted")]
    TooManyErrors { count: usize },

    #[error("No parser registered for linkage {linkage}")]
    NoParser { linkage: LinkageId },

    #[error("Commit of {location} failed: {source}")]
    Commit {
        location: FileLocation,
        /// Every location the failed unit would have written
        touched: Vec<FileLocation>,
        source: StoreError,
    },
}

impl IndexerError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, IndexerError::Cancelled)
    }

    /// Errors that must end the run rather than be counted against the error budget
    pub fn is_fatal(&self) -> bool {
        match self {
            IndexerError::Cancelled
            | IndexerError::ResourceExhausted { .. }
            | IndexerError::TooManyErrors { .. } => true,
            IndexerError::Store(e) => e.is_structural(),
            IndexerError::Commit { source, .. } => source.is_structural(),
            IndexerError::Transient { .. }
            | IndexerError::Project(_)
            | IndexerError::NoParser { .. } => false,
        }
    }
}

impl From<StoreError> for IndexerError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Cancelled => IndexerError::Cancelled,
            other => IndexerError::Store(other),
        }
    }
}

impl IndexerError {
    /// Map a parse failure of `location`; retryable outcomes are handled by the caller
    pub(crate) fn from_parse(location: &FileLocation, error: ParseError) -> Self {
        match error {
            ParseError::Cancelled => IndexerError::Cancelled,
            other => IndexerError::Transient {
                location: location.clone(),
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_cancellation_maps_to_cancelled() {
        let error: IndexerError = StoreError::Cancelled.into();
        assert!(error.is_cancellation());
        assert!(error.is_fatal());

        let error: IndexerError = StoreError::WriteLockNotHeld.into();
        assert!(matches!(error, IndexerError::Store(_)));
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_structural_store_faults_are_fatal() {
        let error: IndexerError = StoreError::corrupted("/idx", "bad digest").into();
        assert!(error.is_fatal());

        let commit = IndexerError::Commit {
            location: FileLocation::file("/a.c"),
            touched: vec![FileLocation::file("/a.c")],
            source: StoreError::UnknownRecord(crate::store::FileId(3)),
        };
        assert!(!commit.is_fatal());
    }

    #[test]
    fn test_parse_errors() {
        let location = FileLocation::file("/a.c");
        assert!(IndexerError::from_parse(&location, ParseError::Cancelled).is_cancellation());
        let error = IndexerError::from_parse(
            &location,
            ParseError::Malformed {
                location: location.clone(),
                reason: "unterminated conditional".to_string(),
            },
        );
        assert!(matches!(error, IndexerError::Transient { .. }));
        assert_eq!(
            IndexerError::TooManyErrors { count: 501 }.to_string(),
            "Too many errors (501); indexing aborted"
        );
    }
}
