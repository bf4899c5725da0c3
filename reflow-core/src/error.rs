//! src/error.rs
//! ============================================================================
//! # `CoordError`: Unified Error Type for the Coordination Core
//!
//! This module defines the error enum used across the crate. Each variant
//! carries enough context for diagnostics; public operations that can fail
//! return `Result<T, CoordError>`.

use std::{io, path::PathBuf};
use thiserror::Error;

/// Unified error type for all coordination-core operations.
#[derive(Debug, Error)]
pub enum CoordError {
    /// Standard IO error, auto-converted from `io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TOML config parsing error.
    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    /// Config file I/O error with path.
    #[error("Failed to read config file {path:?}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A registered listener failed while handling an event. The bus
    /// records this but never propagates it to the poster.
    #[error("Listener {listener_id} failed on {kind}: {reason}")]
    Listener {
        listener_id: u64,
        kind: &'static str,
        reason: String,
    },

    /// A derived-value computation failed; the cache substitutes the
    /// neutral default instead of surfacing this to callers.
    #[error("Cache computation failed for '{cell}': {reason}")]
    CacheCompute { cell: String, reason: String },

    /// Host reported a viewport the cache cannot compute against.
    #[error("Invalid viewport {width}x{height}")]
    InvalidViewport { width: u16, height: u16 },

    /// Any other error, with description.
    #[error("Unexpected error: {0}")]
    Other(String),
}

impl CoordError {
    /// Create a cache computation error.
    pub fn cache_compute<S1: Into<String>, S2: Into<String>>(cell: S1, reason: S2) -> Self {
        Self::CacheCompute {
            cell: cell.into(),
            reason: reason.into(),
        }
    }
}

// Allow conversion from `anyhow::Error` as fallback.
impl From<anyhow::Error> for CoordError {
    fn from(e: anyhow::Error) -> Self {
        Self::Other(e.to_string())
    }
}
