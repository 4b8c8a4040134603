//! Logging setup for hosts and the `beacon` CLI
//!
//! The library itself only emits `tracing` events; hosts that already install a
//! subscriber never need this module. [`init`] writes a daily-rotated file under
//! `$XDG_STATE_HOME/beacon/` (files named `beacon.log.<date>`).
//!
//! Filter precedence: `BEACON_LOG`, then `RUST_LOG`, then `logging.level`.

use std::path::Path;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};

/// Environment variable holding a filter directive for beacon logs
pub const LOG_ENV: &str = "BEACON_LOG";

const LOG_FILE_PREFIX: &str = "beacon.log";

/// Install a file subscriber in the XDG state directory.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    init_in(&Config::state_dir(), config)
}

/// Install a file subscriber writing into `log_dir`.
///
/// Fails if a global subscriber is already set.
pub fn init_in(log_dir: &Path, config: &LoggingConfig) -> Result<LoggingGuard> {
    std::fs::create_dir_all(log_dir)?;

    let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {}", e)))?;

    tracing::info!(log_dir = %log_dir.display(), level = %config.level, "Logging initialized");

    Ok(LoggingGuard { _guard: guard })
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level))
}

/// Test subscriber printing through the test harness
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Flushes buffered log lines when dropped
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_in_creates_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("state/beacon");

        let guard = init_in(&log_dir, &LoggingConfig::default()).unwrap();
        assert!(log_dir.is_dir());

        // only one global subscriber per process
        assert!(init_in(&log_dir, &LoggingConfig::default()).is_err());
        drop(guard);
    }
}
