//! Indexer task engine
//!
//! An [`IndexerTask`] turns an [`IndexRequest`] into committed store versions:
//!
//! 1. **Classification** compares each requested file against the versions the store
//!    holds and builds a per-linkage graph of location tasks.
//! 2. **Removal** deletes versions the request dropped and refreshes stamps of files whose
//!    content did not change.
//! 3. **Parsing** walks every linkage by descending priority: required sources first,
//!    then headers refreshed in the context they were parsed in, then headers that still
//!    lack a version. Each parse is committed by the [`IndexWriter`] under the store's
//!    write lock.
//! 4. **Cleanup** removes outdated versions nothing refreshed.
//!
//! Urgent tasks handed over through the [`UrgentInbox`] run between files.

mod classify;
mod context;
pub mod errors;
pub mod location_task;
pub mod progress;
pub mod request;
pub mod resolver;
pub mod task;
pub mod writer;

#[cfg(test)]
mod scenario_tests;

pub use errors::IndexerError;
pub use location_task::{LinkageTasks, LocationTask, TaskGraph, UpdateKind, VersionTask};
pub use progress::{IndexerProgress, ProgressHandle};
pub use request::{IndexRequest, IndexerTaskOptions, RequestedFile, TaskId};
pub use resolver::EngineResolver;
pub use task::{IndexerContext, IndexerTask, UrgentInbox};
pub use writer::{IndexWriter, WritePlan, WriteReport, WrittenFile};
