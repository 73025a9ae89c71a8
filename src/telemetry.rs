//! Log subscriber setup.
//!
//! Diagnostics go to stderr (plain or JSON) so that stdout only carries the
//! run summary. An optional log file is written through a daily rolling
//! appender that keeps a bounded number of files.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Default log file name prefix.
pub const DEFAULT_LOG_PREFIX: &str = "bucketguard.log";

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The log level is not one of `trace`, `debug`, `info`, `warn`, `error`.
    #[error("invalid log level '{0}'")]
    InvalidLevel(String),

    /// The rolling log file could not be opened.
    #[error("opening log file: {0}")]
    Appender(#[from] InitError),

    /// A global subscriber is already installed.
    #[error("failed to init logging: {0}")]
    Init(String),
}

/// Logging options resolved from the CLI and the settings file.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Level used when `RUST_LOG` is not set.
    pub level: String,
    /// Emit JSON lines instead of plain text.
    pub json: bool,
    /// Log file path; its file name is used as the rolling prefix.
    pub file: Option<PathBuf>,
    /// Number of rotated files to keep.
    pub max_files: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            file: None,
            max_files: 5,
        }
    }
}

/// Normalises a level name, accepting `warning` for `warn`.
pub fn normalize_level(raw: &str) -> Result<&'static str, TelemetryError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        _ => Err(TelemetryError::InvalidLevel(raw.to_string())),
    }
}

/// Builds the rolling appender for `path`.
fn rolling_appender(path: &Path, max_files: usize) -> Result<RollingFileAppender, InitError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let prefix = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_LOG_PREFIX);

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(max_files.max(1))
        .build(dir)
}

/// Installs the global subscriber.
///
/// The returned guard flushes the log file when dropped and must be held
/// for the lifetime of the program.
pub fn init(options: &LogOptions) -> Result<Option<WorkerGuard>, TelemetryError> {
    let level = normalize_level(&options.level)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr_layer = if options.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = match &options.file {
        Some(path) => {
            let appender = rolling_appender(path, options.max_files)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_level() {
        assert_eq!(normalize_level("INFO").unwrap(), "info");
        assert_eq!(normalize_level("Warning").unwrap(), "warn");
        assert_eq!(normalize_level(" debug ").unwrap(), "debug");
        assert!(matches!(
            normalize_level("verbose"),
            Err(TelemetryError::InvalidLevel(_))
        ));
    }

    #[test]
    fn test_invalid_level_fails_before_install() {
        let options = LogOptions {
            level: "loud".into(),
            ..LogOptions::default()
        };
        assert!(init(&options).is_err());
    }
}
