//! TOML configuration for speedify.
//!
//! Layered model: compiled-in defaults, overridden by a config file found
//! via the `SPEEDIFY_CONFIG` environment variable or `./speedify.toml`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::accel::{AccelerationConfig, Backend};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "SPEEDIFY_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG: &str = "speedify.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeedifyConfig {
    #[serde(default)]
    pub acceleration: AccelerationSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SpeedifyConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded speedify configuration");
        Ok(config)
    }

    /// Try, in order: `$SPEEDIFY_CONFIG`, `./speedify.toml`, defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SPEEDIFY_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Reject values that would otherwise be silently coerced.
    pub fn validate(&self) -> Result<()> {
        if self.acceleration.workers == Some(0) {
            anyhow::bail!("acceleration.workers must be a positive integer");
        }
        if let Some(name) = &self.acceleration.backend {
            name.parse::<Backend>()?;
        }
        Ok(())
    }

    /// Push file settings through the regular toggles so each change is logged.
    pub fn apply(&self, accel: &AccelerationConfig) -> Result<()> {
        self.validate()?;
        let section = &self.acceleration;

        if section.compile {
            accel.enable_compilation();
        } else {
            accel.disable_compilation();
        }

        if section.vectorized {
            accel.enable_vectorized_backend();
        } else {
            accel.disable_vectorized_backend();
        }

        if section.multiprocessing {
            accel.enable_multiprocessing(section.workers)?;
        } else {
            if let Some(workers) = section.workers {
                accel.set_workers(workers)?;
            }
            accel.disable_multiprocessing();
        }

        if let Some(name) = &section.backend {
            accel.set_default_backend(name.parse()?);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Acceleration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccelerationSection {
    /// Route compiled kernels through the vectorizing wrapper.
    pub compile: bool,
    /// Allow the data-parallel backend (ignored when not available).
    pub vectorized: bool,
    /// Allow the worker pool.
    pub multiprocessing: bool,
    /// Worker count; unset keeps the detected default.
    pub workers: Option<usize>,
    /// Default backend name; unset keeps the probed default.
    pub backend: Option<String>,
}

impl Default for AccelerationSection {
    fn default() -> Self {
        Self {
            compile: false,
            vectorized: true,
            multiprocessing: true,
            workers: None,
            backend: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `latqcd_speedify=debug`.
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
