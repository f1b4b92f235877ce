use std::sync::OnceLock;

use serde::Serialize;
use tracing::{debug, info};

use crate::accel::{vectorized, Backend};

static CAPABILITIES: OnceLock<Capabilities> = OnceLock::new();

/// What this process can run, detected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// The data-parallel backend initialised successfully.
    pub vectorized: bool,
    /// Hardware threads reported by the OS. Never changes after probing.
    pub max_threads: usize,
    /// First backend in priority order that initialised.
    pub default_backend: Backend,
}

impl Capabilities {
    /// Probe once per process; later calls return the cached result.
    pub fn get() -> &'static Capabilities {
        CAPABILITIES.get_or_init(Self::probe)
    }

    /// Run the probe now, bypassing the cache.
    pub fn probe() -> Self {
        let max_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let vectorized = match vectorized::initialize() {
            Ok(threads) => {
                debug!(threads, "vectorized backend initialised");
                true
            }
            Err(e) => {
                debug!(error = %e, "vectorized backend unavailable");
                false
            }
        };

        let caps = Self::new(vectorized, max_threads);
        info!(
            "Capability probe complete. Vectorized: {}, Pool: true, max threads: {}, default: {}",
            caps.vectorized, caps.max_threads, caps.default_backend
        );
        caps
    }

    /// Build a capability set by hand, e.g. to simulate a missing backend.
    pub fn new(vectorized: bool, max_threads: usize) -> Self {
        // The worker pool only needs std threads, so it always closes the list.
        let default_backend = if vectorized {
            Backend::Vectorized
        } else {
            Backend::Pool
        };
        Self {
            vectorized,
            max_threads: max_threads.max(1),
            default_backend,
        }
    }

    pub fn is_available(&self, backend: Backend) -> bool {
        match backend {
            Backend::Vectorized => self.vectorized,
            Backend::Pool | Backend::Sequential => true,
        }
    }

    /// Leave two hardware threads for the rest of the system.
    pub fn default_workers(&self) -> usize {
        self.max_threads.saturating_sub(2).max(1)
    }

    /// Clamp a worker request to `[1, max_threads]`.
    pub fn clamp_workers(&self, requested: usize) -> usize {
        requested.clamp(1, self.max_threads)
    }
}
