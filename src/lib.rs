//! Incremental, versioned symbol index for C-family translation graphs
//!
//! The [`store::IndexStore`] keeps one version per (linkage, location, significant macro
//! values) of every file, guarded by a reader/writer lock that lets readers in between
//! write batches. An [`indexer::IndexerTask`] brings the store up to date with a
//! [`project::ProjectModel`], and the [`scheduler::IndexerScheduler`] runs those tasks one
//! at a time on a background worker.

pub mod config;
pub mod indexer;
pub mod io;
pub mod logging;
pub mod model;
pub mod parser;
pub mod policy;
pub mod project;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod test_utils;

pub use config::{IndexerConfig, UnusedHeaderStrategy, UpdateMode};
pub use indexer::{
    IndexRequest, IndexerContext, IndexerError, IndexerProgress, IndexerTask, IndexerTaskOptions,
};
pub use policy::{FileChange, UpdatePolicy};
pub use scheduler::{IndexerScheduler, SchedulerError, SchedulerEvent};
pub use store::{IndexStore, StoreError};
