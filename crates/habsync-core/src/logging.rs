//! File logging via tracing
//!
//! stdout belongs to the NDJSON event stream, so all diagnostics go to a
//! daily rolling file.

use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Environment variable holding the log filter directives
pub const LOG_ENV_VAR: &str = "HABSYNC_LOG";

/// Environment variable overriding the log directory
pub const LOG_DIR_ENV_VAR: &str = "HABSYNC_LOG_DIR";

const LOG_FILE_NAME: &str = "habsync.log";

const DEFAULT_FILTER: &str = "habsync=info,warn";

/// Install the global subscriber.
///
/// Logs go to `<local data dir>/habsync/logs/` unless `HABSYNC_LOG_DIR`
/// names another directory.
///
/// # Examples
/// ```bash
/// HABSYNC_LOG=debug habsync http://openhab:8080
/// HABSYNC_LOG=habsync_engine=trace habsync http://openhab:8080
/// ```
pub fn init() -> Result<()> {
    let log_dir = log_directory(std::env::var_os(LOG_DIR_ENV_VAR).map(PathBuf::from));
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_NAME);
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!("───────────────────────────────────────────────");
    tracing::info!("habsync {} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!("Log file: {}", log_file_in(&log_dir).display());
    tracing::info!("───────────────────────────────────────────────");

    Ok(())
}

fn log_directory(dir_override: Option<PathBuf>) -> PathBuf {
    dir_override.unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("habsync")
            .join("logs")
    })
}

fn log_file_in(dir: &Path) -> PathBuf {
    dir.join(LOG_FILE_NAME)
}

/// Path of the current log file (ignores `HABSYNC_LOG_DIR`)
pub fn default_log_file() -> PathBuf {
    log_file_in(&log_directory(None))
}
