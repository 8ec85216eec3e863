//! Tracing subscriber setup.
//!
//! Filtering follows `RUST_LOG`, defaulting to `info` (`debug` with
//! `--verbose`). Logs go to stderr so `run` can keep stdout for NDJSON
//! events. With `[logging] dir` set, a daily-rolling JSON file is written
//! as well.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const LOG_FILE_PREFIX: &str = "forge-codegen.log";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// `[logging]` settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Directory for rolling log files. Unset means stderr only.
    pub dir: Option<PathBuf>,
}

fn default_filter(verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn file_writer(dir: &Path) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

/// Install the global subscriber. Keep the returned guard alive for the
/// life of the process or buffered file output is lost.
///
/// Only the first call in a process takes effect.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<Option<WorkerGuard>> {
    let (writer, guard) = match &config.dir {
        Some(dir) => {
            let (writer, guard) = file_writer(dir)?;
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };
    let file_layer = writer.map(|w| fmt::layer().with_writer(w).with_ansi(false).json());

    let registry = tracing_subscriber::registry()
        .with(file_layer)
        .with(default_filter(verbose));

    let installed = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(guard)
}
