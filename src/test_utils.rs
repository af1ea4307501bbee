//! Test utilities and global setup
//!
//! Provides centralized test logging configuration and on-disk source tree fixtures.

/// Test logging utilities
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// Respects `RUST_LOG`, writes through the test writer so output stays attached to the
    /// test that produced it.
    ///
    /// For automatic initialization in a test module:
    /// ```rust
    /// #[cfg(test)]
    /// mod tests {
    ///     #[cfg(feature = "test-logging")]
    ///     crate::setup_test_logging!();
    /// }
    /// ```
    ///
    /// ```bash
    /// # Trace the task engine only
    /// RUST_LOG=cindex_engine::indexer=trace cargo test --features test-logging
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debug,tokio=info"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok(); // another test may have installed a subscriber already
        });
    }
}

/// Install test logging for every test in the invoking module
#[cfg(all(test, feature = "test-logging"))]
#[macro_export]
macro_rules! setup_test_logging {
    () => {
        #[ctor::ctor]
        fn init_test_logging() {
            $crate::test_utils::logging::init();
        }
    };
}

/// Source trees on disk, for tests that go through the real file system
#[cfg(test)]
pub mod integration {
    use crate::project::{FilesystemProject, ProjectError};
    use serde_json::json;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    pub const COMPILE_COMMANDS: &str = "compile_commands.json";

    /// Temporary source tree with an optional compilation database
    pub struct SourceTree {
        _temp_dir: TempDir, // keeps the tree alive until drop
        pub root: PathBuf,
    }

    impl SourceTree {
        pub fn new() -> Result<Self, std::io::Error> {
            let temp_dir = TempDir::new()?;
            let root = temp_dir.path().canonicalize()?;
            Ok(Self {
                _temp_dir: temp_dir,
                root,
            })
        }

        /// Write `content` to `relative`, creating parent directories
        pub fn write(&self, relative: &str, content: &str) -> Result<PathBuf, std::io::Error> {
            let path = self.root.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, content)?;
            Ok(path)
        }

        pub fn remove(&self, relative: &str) -> Result<(), std::io::Error> {
            fs::remove_file(self.root.join(relative))
        }

        pub fn path(&self, relative: &str) -> PathBuf {
            self.root.join(relative)
        }

        /// Write a compilation database compiling `sources` with `flags`
        pub fn write_compile_commands(
            &self,
            sources: &[&str],
            flags: &[&str],
        ) -> Result<PathBuf, std::io::Error> {
            let entries: Vec<_> = sources
                .iter()
                .map(|source| {
                    let mut arguments = vec!["cc".to_string()];
                    arguments.extend(flags.iter().map(|flag| flag.to_string()));
                    arguments.extend(["-c".to_string(), source.to_string()]);
                    json!({
                        "directory": self.root,
                        "file": source,
                        "arguments": arguments,
                    })
                })
                .collect();
            let text = serde_json::to_string_pretty(&entries).map_err(std::io::Error::other)?;
            self.write(COMPILE_COMMANDS, &text)
        }

        pub fn project(&self) -> Result<FilesystemProject, ProjectError> {
            let database = self.root.join(COMPILE_COMMANDS);
            FilesystemProject::open(&self.root, database.exists().then_some(database.as_path()))
        }

        pub fn store_path(&self) -> PathBuf {
            self.root.join(".cindex").join("index.db")
        }

        pub fn exists(&self, relative: &str) -> bool {
            Path::new(&self.root).join(relative).exists()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::config::IndexerConfig;
        use crate::indexer::{IndexRequest, IndexerContext, IndexerTask};
        use crate::model::{FileLocation, LinkageId};
        use crate::parser::ParserRegistry;
        use crate::project::ProjectModel;
        use crate::scheduler::IndexerScheduler;
        use crate::store::IndexStore;
        use std::sync::Arc;
        use std::time::Duration;
        use tokio_util::sync::CancellationToken;

        fn tree() -> SourceTree {
            let tree = SourceTree::new().unwrap();
            tree.write("include/util.h", "#pragma once\nint util(int x);\n").unwrap();
            tree.write(
                "src/main.c",
                "#include \"util.h\"\nint main(void) { return util(1); }\n",
            )
            .unwrap();
            tree.write("src/util.c", "#include \"util.h\"\nint util(int x) { return x; }\n")
                .unwrap();
            tree.write_compile_commands(&["src/main.c", "src/util.c"], &["-Iinclude"])
                .unwrap();
            tree
        }

        #[test]
        fn test_source_tree_layout() {
            let tree = tree();
            assert!(tree.exists("include/util.h"));
            assert!(tree.exists(COMPILE_COMMANDS));
            tree.remove("src/util.c").unwrap();
            assert!(!tree.exists("src/util.c"));
        }

        #[tokio::test]
        async fn test_tree_indexes_through_scheduler_and_persists() {
            let tree = tree();
            let project: Arc<dyn ProjectModel> = Arc::new(tree.project().unwrap());
            let config = IndexerConfig::default();
            let store =
                Arc::new(IndexStore::open(tree.store_path(), config.lock_poll_interval).unwrap());
            let cancel = CancellationToken::new();
            let request = IndexRequest::full(project.as_ref(), &store.read_lock(&cancel).unwrap());
            let ctx = IndexerContext::new(
                store,
                project.clone(),
                ParserRegistry::c_family().unwrap(),
                config.clone(),
            );

            let scheduler = IndexerScheduler::start(ctx);
            let task = IndexerTask::new(request, scheduler.default_options());
            scheduler.enqueue(task).await.unwrap();
            scheduler.wait_idle(Duration::from_secs(10)).await.unwrap();
            scheduler.shutdown().await.unwrap();
            assert!(tree.store_path().exists());

            let reopened = IndexStore::open(tree.store_path(), config.lock_poll_interval).unwrap();
            let view = reopened.read_lock(&cancel).unwrap();
            let header = FileLocation::file(tree.path("include/util.h"));
            assert_eq!(view.get_versions(LinkageId::C, &header).len(), 1);
            let declared: Vec<_> = view
                .find_declarations("util")
                .into_iter()
                .map(|(key, _)| key.location.clone())
                .collect();
            assert!(declared.contains(&header));
            assert!(declared.contains(&FileLocation::file(tree.path("src/util.c"))));
        }
    }
}
