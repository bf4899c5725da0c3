//! src/logging.rs
//! ============================================================================
//! # Logger: Tracing Initialization for the Coordination Core
//!
//! Hosts embedding the core call [`Logger::init`] once at startup. Output
//! goes to a rolling log file (non-blocking, via `tracing-appender`) and
//! optionally to stderr. The returned [`Logger`] owns the appender's worker
//! guard; dropping it flushes buffered log lines.
//!
//! Every module in this crate emits through `tracing` — listener failures,
//! admission denials, stale-section reclaims, and cache recomputation all
//! show up under the `reflow_core` target.

use std::path::PathBuf;

use anyhow::{Context, Result};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    pub log_dir: PathBuf,
    pub log_file_prefix: CompactString,
    pub log_level: CompactString,
    pub rotation: LogRotation,
    pub console: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum LogRotation {
    Never,
    Daily,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            log_file_prefix: CompactString::const_new("reflow"),
            log_level: CompactString::const_new("info"),
            rotation: LogRotation::Daily,
            console: false,
        }
    }
}

/// Initialized logging pipeline. Keep this alive for the process lifetime.
pub struct Logger {
    _guard: WorkerGuard,
}

impl Logger {
    /// Install the global tracing subscriber. Errors if one is already set.
    pub fn init(config: &LoggerConfig) -> Result<Self> {
        let rotation = match config.rotation {
            LogRotation::Never => Rotation::NEVER,
            LogRotation::Daily => Rotation::DAILY,
        };

        let appender = RollingFileAppender::new(
            rotation,
            &config.log_dir,
            config.log_file_prefix.as_str(),
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

        let file_layer = fmt::layer().with_writer(writer).with_ansi(false);

        let registry = tracing_subscriber::registry().with(filter).with(file_layer);

        if config.console {
            registry
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init()
                .context("Failed to install tracing subscriber")?;
        } else {
            registry
                .try_init()
                .context("Failed to install tracing subscriber")?;
        }

        tracing::info!(
            log_dir = %config.log_dir.display(),
            level = config.log_level.as_str(),
            "logging initialized"
        );

        Ok(Self { _guard: guard })
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}
