use cindex_engine::indexer::{IndexRequest, IndexerContext, IndexerTask};
use cindex_engine::logging::{LogConfig, init_logging};
use cindex_engine::parser::ParserRegistry;
use cindex_engine::project::{FilesystemProject, ProjectModel};
use cindex_engine::scheduler::{IndexerScheduler, SchedulerEvent};
use cindex_engine::store::IndexStore;
use cindex_engine::IndexerConfig;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Upper bound for one full indexing run
const RUN_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);

/// CLI arguments for the index builder
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source root to index (defaults to current directory)
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// compile_commands.json describing the build
    /// (defaults to <root>/compile_commands.json if present)
    #[arg(long, value_name = "FILE")]
    compile_commands: Option<PathBuf>,

    /// Index store file (defaults to <root>/.cindex/index.db)
    #[arg(long, value_name = "FILE")]
    store: Option<PathBuf>,

    /// Reparse every file even if it looks unchanged
    #[arg(long)]
    force: bool,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides CINDEX_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_config =
        LogConfig::from_env().with_overrides(args.log_level.clone(), args.log_file.clone());
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let root = match args.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let compile_commands = args.compile_commands.or_else(|| {
        let candidate = root.join("compile_commands.json");
        candidate.exists().then_some(candidate)
    });
    let store_path = args
        .store
        .unwrap_or_else(|| root.join(".cindex").join("index.db"));

    let project = match FilesystemProject::open(&root, compile_commands.as_deref()) {
        Ok(project) => project,
        Err(e) => {
            eprintln!("Failed to open project at {}: {e}", root.display());
            std::process::exit(1);
        }
    };
    let project: Arc<dyn ProjectModel> = Arc::new(project);

    let config = IndexerConfig::default();
    let (store, rebuilt) = IndexStore::open_or_rebuild(&store_path, config.lock_poll_interval)?;
    if rebuilt {
        warn!("Index store {} was unusable and starts empty", store_path.display());
    }
    let store = Arc::new(store);
    store.announce_reload();
    let request = {
        let view = store.read_lock(&CancellationToken::new())?;
        info!(
            "Indexing {} into {} ({} records stored)",
            root.display(),
            store_path.display(),
            view.stats().files
        );
        IndexRequest::full(project.as_ref(), &view)
    };

    let ctx = IndexerContext::new(
        store.clone(),
        project.clone(),
        ParserRegistry::c_family()?,
        config,
    );
    let scheduler = IndexerScheduler::start(ctx);
    let mut events = scheduler.subscribe();

    let options = scheduler.default_options().with_force(args.force);
    let task = IndexerTask::new(request, options);
    let task_id = scheduler.enqueue(task).await?;

    let outcome = scheduler.wait_idle(RUN_TIMEOUT).await;
    let mut summary = None;
    while let Ok(event) = events.try_recv() {
        if let SchedulerEvent::TaskCompleted { task, progress } = event
            && task == task_id
        {
            summary = Some(progress);
        }
    }
    scheduler.shutdown().await?;

    match outcome {
        Ok(()) => {
            match summary {
                Some(progress) => println!("{progress}"),
                None => println!("Indexing finished"),
            }
            let stats = store.read_lock(&CancellationToken::new())?.stats();
            println!("{} file versions stored", stats.files);
            Ok(())
        }
        Err(e) => {
            eprintln!("Indexing failed: {e}");
            std::process::exit(1);
        }
    }
}
