use std::env;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log file sink; unset means stderr only
pub const LOG_FILE_ENV: &str = "CINDEX_LOG_FILE";
/// `true` appends the process id to the log file name
pub const LOG_UNIQUE_ENV: &str = "CINDEX_LOG_UNIQUE";
/// `true` switches to JSON lines
pub const LOG_JSON_ENV: &str = "CINDEX_LOG_JSON";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter directive, e.g. "info" or "cindex_engine::indexer=trace"
    pub level: String,
    pub file_path: Option<PathBuf>,
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            json_format: false,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let unique = env::var(LOG_UNIQUE_ENV).unwrap_or_default() == "true";
        let file_path = env::var(LOG_FILE_ENV).ok().map(|path| {
            let path = PathBuf::from(path);
            if unique {
                with_pid_suffix(&path, std::process::id())
            } else {
                path
            }
        });
        let json_format = env::var(LOG_JSON_ENV).unwrap_or_default() == "true";

        Self {
            level,
            file_path,
            json_format,
        }
    }

    /// Command-line values win over the environment
    pub fn with_overrides(mut self, level: Option<String>, file_path: Option<PathBuf>) -> Self {
        if let Some(level) = level {
            self.level = level;
        }
        if let Some(file_path) = file_path {
            self.file_path = Some(file_path);
        }
        self
    }
}

/// `index.log` -> `index.<pid>.log`
fn with_pid_suffix(path: &Path, pid: u32) -> PathBuf {
    let Some(stem) = path.file_stem() else {
        return path.to_path_buf();
    };
    let unique = match path.extension().and_then(|ext| ext.to_str()) {
        Some(extension) => format!("{}.{}.{}", stem.to_string_lossy(), pid, extension),
        None => format!("{}.{}", stem.to_string_lossy(), pid),
    };
    path.with_file_name(unique)
}

pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_new(&config.level).or_else(|_| EnvFilter::try_new("info"))?;
    let subscriber = tracing_subscriber::registry().with(env_filter);

    match (&config.file_path, config.json_format) {
        (Some(file_path), true) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;
            subscriber
                .with(fmt::layer().json().with_writer(file).with_ansi(false))
                .try_init()?;
        }
        (Some(file_path), false) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;
            let file_layer = fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true);
            subscriber.with(file_layer).try_init()?;
        }
        (None, true) => {
            subscriber
                .with(fmt::layer().json().with_writer(io::stderr).with_ansi(false))
                .try_init()?;
        }
        (None, false) => {
            let stderr_layer = fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(true)
                .with_target(true)
                .with_thread_ids(true);
            subscriber.with(stderr_layer).try_init()?;
        }
    }

    Ok(())
}

/// Emit an `operation`/`duration_ms` event
#[macro_export]
macro_rules! log_timing {
    ($level:expr, $operation:expr, $duration:expr) => {
        tracing::event!(
            $level,
            operation = $operation,
            duration_ms = $duration.as_millis() as u64,
            pid = std::process::id(),
            "Performance timing"
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_suffix() {
        assert_eq!(
            with_pid_suffix(Path::new("/tmp/index.log"), 42),
            PathBuf::from("/tmp/index.42.log")
        );
        assert_eq!(
            with_pid_suffix(Path::new("/tmp/index"), 7),
            PathBuf::from("/tmp/index.7")
        );
    }

    #[test]
    fn test_overrides() {
        let config = LogConfig::default()
            .with_overrides(Some("debug".to_string()), Some(PathBuf::from("/tmp/x.log")));
        assert_eq!(config.level, "debug");
        assert_eq!(config.file_path, Some(PathBuf::from("/tmp/x.log")));
        assert!(!config.json_format);

        let unchanged = LogConfig::default().with_overrides(None, None);
        assert_eq!(unchanged, LogConfig::default());
    }
}
