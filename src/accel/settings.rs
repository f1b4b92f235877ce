//! Process-wide acceleration switches.
//!
//! Each field is an independent relaxed atomic. There is no lock tying the
//! fields together or ordering them against dispatches: a dispatch reads the
//! fields it needs once when it resolves its plan, and reconfiguring while a
//! dispatch is in flight gives no guarantee about which values it saw.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::OnceLock;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::accel::{Backend, Capabilities};

static GLOBAL: OnceLock<AccelerationConfig> = OnceLock::new();

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("worker count must be a positive integer, got {requested}")]
    InvalidWorkerCount { requested: usize },
}

/// Acceleration state shared by every dispatch that reads it.
#[derive(Debug)]
pub struct AccelerationConfig {
    capabilities: Capabilities,
    compilation: AtomicBool,
    vectorized: AtomicBool,
    multiprocessing: AtomicBool,
    workers: AtomicUsize,
    default_backend: AtomicU8,
}

/// Point-in-time copy of the switches, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccelerationSnapshot {
    pub compilation_enabled: bool,
    pub vectorized_enabled: bool,
    pub multiprocessing_enabled: bool,
    pub workers: usize,
    pub max_threads: usize,
    pub default_backend: Backend,
}

impl AccelerationConfig {
    /// The process-wide instance, seeded from the capability probe.
    pub fn global() -> &'static AccelerationConfig {
        GLOBAL.get_or_init(|| AccelerationConfig::new(*Capabilities::get()))
    }

    /// Fresh configuration: compilation off, every available backend on.
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            compilation: AtomicBool::new(false),
            vectorized: AtomicBool::new(capabilities.vectorized),
            multiprocessing: AtomicBool::new(true),
            workers: AtomicUsize::new(capabilities.default_workers()),
            default_backend: AtomicU8::new(capabilities.default_backend.to_u8()),
            capabilities,
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn max_threads(&self) -> usize {
        self.capabilities.max_threads
    }

    pub fn compilation_enabled(&self) -> bool {
        self.compilation.load(Ordering::Relaxed)
    }

    pub fn vectorized_enabled(&self) -> bool {
        self.vectorized.load(Ordering::Relaxed)
    }

    /// Enabled and actually present in this process.
    pub fn vectorized_active(&self) -> bool {
        self.vectorized_enabled() && self.capabilities.vectorized
    }

    pub fn multiprocessing_enabled(&self) -> bool {
        self.multiprocessing.load(Ordering::Relaxed)
    }

    pub fn workers(&self) -> usize {
        self.workers.load(Ordering::Relaxed)
    }

    pub fn default_backend(&self) -> Backend {
        Backend::from_u8(self.default_backend.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> AccelerationSnapshot {
        AccelerationSnapshot {
            compilation_enabled: self.compilation_enabled(),
            vectorized_enabled: self.vectorized_active(),
            multiprocessing_enabled: self.multiprocessing_enabled(),
            workers: self.workers(),
            max_threads: self.max_threads(),
            default_backend: self.default_backend(),
        }
    }

    pub fn enable_compilation(&self) {
        self.compilation.store(true, Ordering::Relaxed);
        info!("Using compilation to speed things up.");
    }

    pub fn disable_compilation(&self) {
        self.compilation.store(false, Ordering::Relaxed);
        info!("No longer using compilation.");
    }

    /// No-op with a warning when the probe found no vectorized backend.
    pub fn enable_vectorized_backend(&self) {
        if !self.capabilities.vectorized {
            warn!("Vectorized backend requested but not available; configuration unchanged.");
            return;
        }
        self.vectorized.store(true, Ordering::Relaxed);
        info!("Using the vectorized backend.");
    }

    pub fn disable_vectorized_backend(&self) {
        self.vectorized.store(false, Ordering::Relaxed);
        info!("No longer using the vectorized backend.");
    }

    /// Turn the worker pool on, optionally resizing it first.
    pub fn enable_multiprocessing(&self, workers: Option<usize>) -> Result<(), ConfigError> {
        if let Some(requested) = workers {
            self.set_workers(requested)?;
        }
        self.multiprocessing.store(true, Ordering::Relaxed);
        info!(workers = self.workers(), "Using the worker pool.");
        Ok(())
    }

    pub fn disable_multiprocessing(&self) {
        self.multiprocessing.store(false, Ordering::Relaxed);
        info!("No longer using the worker pool.");
    }

    /// Store a worker count clamped to `[1, max_threads]` and return it.
    ///
    /// Zero is rejected rather than clamped up.
    pub fn set_workers(&self, requested: usize) -> Result<usize, ConfigError> {
        if requested == 0 {
            return Err(ConfigError::InvalidWorkerCount { requested });
        }
        if requested > self.max_threads() {
            warn!(
                requested,
                max_threads = self.max_threads(),
                "We recommend using fewer workers than available hardware threads"
            );
        }
        let workers = self.capabilities.clamp_workers(requested);
        self.workers.store(workers, Ordering::Relaxed);
        info!(workers, "Worker count set.");
        Ok(workers)
    }

    /// Change the backend used when a dispatch does not name one.
    ///
    /// Unavailable backends are refused with a warning.
    pub fn set_default_backend(&self, backend: Backend) {
        if !self.capabilities.is_available(backend) {
            warn!(%backend, "Backend not available; default unchanged.");
            return;
        }
        self.default_backend.store(backend.to_u8(), Ordering::Relaxed);
        info!(%backend, "Default backend set.");
    }
}
