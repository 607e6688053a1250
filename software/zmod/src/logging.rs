//! Terminal and per-session file logging.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::ZmodError;

/// Keeps the background log writers alive. Dropping it flushes both.
#[must_use = "logging stops when the session is dropped"]
pub struct LogSession {
    path: PathBuf,
    _stderr: WorkerGuard,
    _file: WorkerGuard,
}

impl LogSession {
    /// File this session writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Name of the log file for a session started now.
pub fn log_file_name(session: &str) -> String {
    format!("{session}_{}.log", Utc::now().format("%Y%m%dT%H%M%SZ"))
}

/// Install the global subscriber: human-readable lines on stderr and a
/// plain-text copy under `log_dir`.
///
/// The level defaults to `info` and can be overridden with `RUST_LOG`.
/// Only one session may be installed per process.
pub fn init_logging(log_dir: &Path, session: &str) -> Result<LogSession, ZmodError> {
    fs::create_dir_all(log_dir)?;
    let path = log_dir.join(log_file_name(session));
    let logfile = OpenOptions::new().create(true).append(true).open(&path)?;

    let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    let (file_writer, file_guard) = tracing_appender::non_blocking(logfile);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| ZmodError::InvalidConfig(format!("bad log filter: {e}")))?;

    let stderr_layer = fmt::layer()
        .with_timer(fmt::time::ChronoUtc::rfc_3339())
        .with_writer(stderr_writer)
        .with_target(false);
    let file_layer = fmt::layer()
        .with_timer(fmt::time::ChronoUtc::rfc_3339())
        .with_writer(file_writer)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ZmodError::InvalidConfig(format!("logging already initialized: {e}")))?;

    Ok(LogSession {
        path,
        _stderr: stderr_guard,
        _file: file_guard,
    })
}
