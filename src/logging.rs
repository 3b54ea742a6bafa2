//! Process-wide `tracing` setup for the service.
//!
//! Request handlers emit structured events (face counts, stored paths,
//! failure kinds). Where they end up depends on the host: the systemd
//! journal when one is reachable, else stderr plus a rolling log file.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "FACEMETER_LOG";
const DEFAULT_DIRECTIVE: &str = "info";
const LOG_FILE_PREFIX: &str = "facemeter.log";

/// Where log events were routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogBackend {
    Journald,
    File(PathBuf),
}

/// Install the global subscriber. Call once, before serving requests.
///
/// `log_dir` is only used when journald is unavailable; `None` falls back to
/// the per-user data directory.
pub fn init(log_dir: Option<PathBuf>) -> Result<LogBackend> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(journald_layer)
                .init();
            tracing::info!("Logging to journald");
            return Ok(LogBackend::Journald);
        }
    }

    let log_dir = log_dir.unwrap_or_else(default_log_dir);
    let writer = file_writer(&log_dir)?;

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .init();

    tracing::info!(log_dir = ?log_dir, "Logging to stderr and file");
    Ok(LogBackend::File(log_dir))
}

fn env_filter() -> EnvFilter {
    filter_from(std::env::var(LOG_ENV).ok().as_deref())
}

/// Build a filter from a directive, falling back to `info` when it is absent
/// or unparsable.
fn filter_from(directive: Option<&str>) -> EnvFilter {
    directive
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("facemeter")
        .join("logs")
}

/// Daily rolling writer under `log_dir`. Its flush guard lives for the whole process.
fn file_writer(log_dir: &Path) -> Result<NonBlocking> {
    static GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

    std::fs::create_dir_all(log_dir)?;
    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = GUARD.set(guard);
    Ok(writer)
}
