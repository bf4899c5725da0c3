//! src/config.rs
//! ============================================================================
//! # Config: Coordination Core Configuration Loader and Saver
//!
//! Manages the tunable thresholds of the coordination core: the debounce
//! window, the adaptive-backoff admission parameters, and the derived-layout
//! cache re-check interval. Loads and saves settings as TOML from the proper
//! cross-platform config path using the
//! [`directories`](https://docs.rs/directories) crate.
//!
//! ## Features
//! - XDG-compliant config discovery and writing (Linux, macOS, Windows)
//! - Robust defaulting if no config file exists
//! - Async load/save for smooth integration with Tokio
//!
//! ## Example
//! ```rust,ignore
//! let config = Config::load().await?;
//! config.save().await?;
//! ```

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use tokio::fs as TokioFs;

/// Debounce configuration: the fixed-width coalescing window applied per key
/// before any event reaches the admission controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// Minimum interval between two accepted triggers sharing a key.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(250),
        }
    }
}

/// Adaptive-backoff admission parameters.
///
/// `adaptive interval` starts at `base_interval`, grows proportionally to the
/// consecutive-refresh count once `burst_threshold` is exceeded, is clamped
/// to `max_interval`, and relaxes back to base after `quiet_period` without
/// a granted refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Baseline minimum interval between granted refreshes per key.
    #[serde(with = "humantime_serde")]
    pub base_interval: Duration,

    /// Hard cap the adaptive interval never exceeds.
    #[serde(with = "humantime_serde")]
    pub max_interval: Duration,

    /// Consecutive grants before the interval starts growing.
    pub burst_threshold: u32,

    /// Idle time after which a key's stats reset to baseline.
    #[serde(with = "humantime_serde")]
    pub quiet_period: Duration,

    /// Age past which a still-held global refresh section is considered
    /// leaked and is reclaimed.
    #[serde(with = "humantime_serde")]
    pub stale_timeout: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(250),
            max_interval: Duration::from_millis(5000),
            burst_threshold: 3,
            quiet_period: Duration::from_millis(2000),
            stale_timeout: Duration::from_millis(10_000),
        }
    }
}

/// Derived-layout cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How often the cache re-validates against host-reported viewport
    /// dimensions even without explicit invalidation.
    #[serde(with = "humantime_serde")]
    pub recheck_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            recheck_interval: Duration::from_millis(1000),
        }
    }
}

/// Main configuration struct for the coordination core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub debounce: DebounceConfig,

    #[serde(default)]
    pub admission: AdmissionConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// Loads config from TOML file at the XDG-compliant app config dir, or
    /// returns defaults.
    ///
    /// The config is expected at `$XDG_CONFIG_HOME/Reflow/config.toml`
    /// (Linux), or equivalent on Windows/macOS.
    pub async fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            info!("Loading config from {}", path.display());
            let text = TokioFs::read_to_string(&path).await?;
            let cfg: Self = toml::from_str(&text)?;

            Ok(cfg)
        } else {
            info!(
                "No config file found at {}, using default configuration. Creating it now.",
                path.display()
            );

            let default_config = Self::default();
            default_config.save().await?;

            Ok(default_config)
        }
    }

    /// Saves config to TOML file at the XDG-compliant app config dir.
    pub async fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path()?;

        info!("Saving config to {}", path.display());

        if let Some(parent) = path.parent() {
            TokioFs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        TokioFs::write(&path, toml_str).await?;

        Ok(())
    }

    /// Returns the canonical config file path using `directories::ProjectDirs`.
    pub fn config_path() -> anyhow::Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "example", "Reflow")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory."))?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Returns the config directory (without filename).
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "example", "Reflow")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory."))?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }
}
