//! File logging for shiftctl.
//!
//! stdout carries the JSON result, so logs go to a daily-rolling file under
//! `~/.zara/logs`. `ZARA_DEBUG_LOG=1` raises the level to debug.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "shiftctl.log";

/// Returns `None` when the log directory is unavailable; the CLI then runs
/// without logging.
pub fn init() -> Option<WorkerGuard> {
    let log_dir = dirs::home_dir()?.join(".zara").join("logs");
    fs_err::create_dir_all(&log_dir).ok()?;

    let appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let debug_enabled = std::env::var("ZARA_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok()?;
    Some(guard)
}
