//! Indexer configuration
//!
//! [`IndexerConfig`] holds the policy constants of an indexing run and is built with
//! [`IndexerConfigBuilder`], which validates the relationships between them.

use crate::model::LinkageId;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Faults tolerated per run before it aborts
///
/// Far above the handful of per-file faults a healthy project produces.
pub const DEFAULT_MAX_ERRORS: usize = 500;

/// Out-of-memory conditions swallowed per run before they become fatal
pub const DEFAULT_MAX_OOM_RETRIES: usize = 3;

/// How long a batch commit may hold the write lock before letting waiting readers in
pub const DEFAULT_YIELD_THRESHOLD_MS: u64 = 100;

/// Lock waits re-check cancellation at this interval
pub const DEFAULT_LOCK_POLL_INTERVAL_MS: u64 = 50;

/// Files handled between cancellation and urgent-work checks
pub const DEFAULT_CANCEL_POLL_FILES: usize = 1;

/// Upper bound on the yield threshold; longer holds starve readers
pub const MAX_YIELD_THRESHOLD_MS: u64 = 10_000;

// ============================================================================
// Core Configuration Types
// ============================================================================

/// What to do with headers no source includes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UnusedHeaderStrategy {
    /// Index them only when something includes them
    #[default]
    Skip,
    /// Index them once, in the first linkage that needs them
    DefaultLanguage,
    /// Index them in every configured linkage
    Both,
}

/// When file changes turn into indexing work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpdateMode {
    #[default]
    Immediate,
    /// Collect changes until the build finishes
    Deferred,
    /// Collect changes until an explicit update request
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexerConfig {
    pub max_errors: usize,
    pub max_oom_retries: usize,
    pub yield_threshold: Duration,
    pub lock_poll_interval: Duration,
    pub cancel_poll_files: usize,
    pub update_mode: UpdateMode,
    pub unused_headers: UnusedHeaderStrategy,
    /// Compare modification time and size against the stored stamp
    pub check_timestamps: bool,
    /// Re-check the content hash before reparsing a file whose stamp moved
    pub check_content_hash: bool,
    pub index_files_not_in_build: bool,
    /// Linkages in which headers are indexed; order decides which linkage claims a
    /// lazily indexed header
    pub linkages: Vec<LinkageId>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_errors: DEFAULT_MAX_ERRORS,
            max_oom_retries: DEFAULT_MAX_OOM_RETRIES,
            yield_threshold: Duration::from_millis(DEFAULT_YIELD_THRESHOLD_MS),
            lock_poll_interval: Duration::from_millis(DEFAULT_LOCK_POLL_INTERVAL_MS),
            cancel_poll_files: DEFAULT_CANCEL_POLL_FILES,
            update_mode: UpdateMode::default(),
            unused_headers: UnusedHeaderStrategy::default(),
            check_timestamps: true,
            check_content_hash: true,
            index_files_not_in_build: false,
            linkages: vec![LinkageId::C, LinkageId::Cpp],
        }
    }
}

impl IndexerConfig {
    pub fn builder() -> IndexerConfigBuilder {
        IndexerConfigBuilder::new()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Configuration Builder
// ============================================================================

#[derive(Debug, Default)]
pub struct IndexerConfigBuilder {
    max_errors: Option<usize>,
    max_oom_retries: Option<usize>,
    yield_threshold: Option<Duration>,
    lock_poll_interval: Option<Duration>,
    cancel_poll_files: Option<usize>,
    update_mode: Option<UpdateMode>,
    unused_headers: Option<UnusedHeaderStrategy>,
    check_timestamps: Option<bool>,
    check_content_hash: Option<bool>,
    index_files_not_in_build: Option<bool>,
    linkages: Option<Vec<LinkageId>>,
}

impl IndexerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_errors(mut self, count: usize) -> Self {
        self.max_errors = Some(count);
        self
    }

    pub fn max_oom_retries(mut self, count: usize) -> Self {
        self.max_oom_retries = Some(count);
        self
    }

    pub fn yield_threshold(mut self, threshold: Duration) -> Self {
        self.yield_threshold = Some(threshold);
        self
    }

    pub fn lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = Some(interval);
        self
    }

    pub fn cancel_poll_files(mut self, files: usize) -> Self {
        self.cancel_poll_files = Some(files);
        self
    }

    pub fn update_mode(mut self, mode: UpdateMode) -> Self {
        self.update_mode = Some(mode);
        self
    }

    pub fn unused_headers(mut self, strategy: UnusedHeaderStrategy) -> Self {
        self.unused_headers = Some(strategy);
        self
    }

    pub fn check_timestamps(mut self, enabled: bool) -> Self {
        self.check_timestamps = Some(enabled);
        self
    }

    pub fn check_content_hash(mut self, enabled: bool) -> Self {
        self.check_content_hash = Some(enabled);
        self
    }

    pub fn index_files_not_in_build(mut self, enabled: bool) -> Self {
        self.index_files_not_in_build = Some(enabled);
        self
    }

    pub fn linkages(mut self, linkages: impl IntoIterator<Item = LinkageId>) -> Self {
        self.linkages = Some(linkages.into_iter().collect());
        self
    }

    pub fn build(self) -> Result<IndexerConfig, ConfigError> {
        let defaults = IndexerConfig::default();
        let config = IndexerConfig {
            max_errors: self.max_errors.unwrap_or(defaults.max_errors),
            max_oom_retries: self.max_oom_retries.unwrap_or(defaults.max_oom_retries),
            yield_threshold: self.yield_threshold.unwrap_or(defaults.yield_threshold),
            lock_poll_interval: self.lock_poll_interval.unwrap_or(defaults.lock_poll_interval),
            cancel_poll_files: self.cancel_poll_files.unwrap_or(defaults.cancel_poll_files),
            update_mode: self.update_mode.unwrap_or(defaults.update_mode),
            unused_headers: self.unused_headers.unwrap_or(defaults.unused_headers),
            check_timestamps: self.check_timestamps.unwrap_or(defaults.check_timestamps),
            check_content_hash: self.check_content_hash.unwrap_or(defaults.check_content_hash),
            index_files_not_in_build: self
                .index_files_not_in_build
                .unwrap_or(defaults.index_files_not_in_build),
            linkages: self.linkages.unwrap_or(defaults.linkages),
        };
        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &IndexerConfig) -> Result<(), ConfigError> {
        if config.max_errors == 0 {
            return Err(ConfigError::invalid("max_errors", "must be at least 1"));
        }
        if config.cancel_poll_files == 0 {
            return Err(ConfigError::invalid("cancel_poll_files", "must be at least 1"));
        }
        if config.lock_poll_interval.is_zero() {
            return Err(ConfigError::invalid("lock_poll_interval", "must not be zero"));
        }
        if config.yield_threshold > Duration::from_millis(MAX_YIELD_THRESHOLD_MS) {
            return Err(ConfigError::invalid(
                "yield_threshold",
                format!("exceeds maximum of {MAX_YIELD_THRESHOLD_MS} ms"),
            ));
        }
        if config.linkages.is_empty() {
            return Err(ConfigError::invalid("linkages", "at least one linkage is required"));
        }
        Ok(())
    }
}
