//! Tracing subscriber setup.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;
use crate::error::{Result, SyncError};

/// File name prefix for rolling log files.
const LOG_FILE_PREFIX: &str = "homesync.log";

/// Build the filter: `RUST_LOG` when set, the configured level otherwise.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global subscriber.
///
/// Logs go to stderr and, when `log_dir` is set, to a daily rolling file.
/// Keep the returned guard alive for the life of the process or buffered
/// file output is lost.
///
/// # Errors
///
/// Returns [`SyncError::Io`] if the log directory cannot be created and
/// [`SyncError::Config`] if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let console = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| SyncError::Config(format!("logging already initialised: {e}")))?;

    Ok(guard)
}
