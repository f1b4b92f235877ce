//! Acceleration manager -- vectorized (rayon) / scoped worker pool / sequential fallback.
//!
//! Every dispatch resolves an ordered chain of backends once per call and
//! walks it until one succeeds. The sequential loop always terminates the
//! chain and is the only tier whose failures reach the caller.
//!
//! The module-level functions below are thin wrappers over the process-wide
//! [`AccelerationConfig::global`] instance. That instance is not synchronized
//! with in-flight dispatches: configure once, then dispatch.

pub mod compile;
pub mod cpu;
pub mod manager;
pub mod pool;
pub mod probe;
pub mod settings;
pub mod vectorized;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use compile::{Arg, Args, CompileMode, Compiled, Kernel, NativeArray};
pub use manager::{DispatchOptions, DispatchPlan, DispatchRequest, Dispatched, Dispatcher};
pub use probe::Capabilities;
pub use settings::{AccelerationConfig, AccelerationSnapshot, ConfigError};

/// Execution backends, in fallback priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Data-parallel map over the leading axis (rayon)
    Vectorized,
    /// Per-call pool of OS worker threads
    Pool,
    /// Plain loop on the calling thread
    Sequential,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::Vectorized, Backend::Pool, Backend::Sequential];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Vectorized => "vectorized",
            Backend::Pool => "pool",
            Backend::Sequential => "sequential",
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Backend::Vectorized => 0,
            Backend::Pool => 1,
            Backend::Sequential => 2,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Backend::Vectorized,
            1 => Backend::Pool,
            _ => Backend::Sequential,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = DispatchError;

    /// Accepts the canonical names plus the parallelizer names used by older
    /// analysis scripts (`jax`, `pathos.pools`, `concurrent.futures`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vectorized" | "vectorised" | "rayon" | "jax" => Ok(Backend::Vectorized),
            "pool" | "worker-pool" | "process-pool" | "pathos.pools" | "concurrent.futures" => {
                Ok(Backend::Pool)
            }
            "sequential" | "serial" | "loop" => Ok(Backend::Sequential),
            _ => Err(DispatchError::UnknownBackend {
                name: s.to_string(),
            }),
        }
    }
}

/// Errors surfaced to dispatch callers.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown backend '{name}' (expected vectorized, pool or sequential)")]
    UnknownBackend { name: String },

    #[error("worker count must be a positive integer, got {requested}")]
    InvalidWorkerCount { requested: usize },

    /// The sequential tier failed; there is nothing left to fall back to.
    #[error("function failed on input {index}: {source}")]
    Function {
        index: usize,
        #[source]
        source: anyhow::Error,
    },
}

/// Failure of one accelerated tier. Absorbed by the dispatcher and turned
/// into a fallback, never returned to callers.
#[derive(Debug, Error)]
pub enum TierError {
    #[error("{backend} backend is not available in this build")]
    Unavailable { backend: Backend },

    #[error("task {index} panicked: {message}")]
    Panicked { index: usize, message: String },

    #[error("task {index} failed: {source}")]
    Function {
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("worker pool setup failed: {0}")]
    Setup(String),

    #[error("worker pool returned no result for task {index}")]
    Incomplete { index: usize },
}

/// One failed tier, recorded before moving down the chain.
#[derive(Debug, Clone, Serialize)]
pub struct Fallback {
    pub backend: Backend,
    pub reason: String,
}

/// Metadata recording which backend produced a result.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchMetadata {
    pub path_used: Backend,
    pub workers: usize,
    pub fallbacks: Vec<Fallback>,
    pub duration_us: u64,
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub fn enable_compilation() {
    AccelerationConfig::global().enable_compilation();
}

pub fn disable_compilation() {
    AccelerationConfig::global().disable_compilation();
}

pub fn enable_vectorized_backend() {
    AccelerationConfig::global().enable_vectorized_backend();
}

pub fn disable_vectorized_backend() {
    AccelerationConfig::global().disable_vectorized_backend();
}

pub fn enable_multiprocessing(workers: Option<usize>) -> Result<(), ConfigError> {
    AccelerationConfig::global().enable_multiprocessing(workers)
}

pub fn disable_multiprocessing() {
    AccelerationConfig::global().disable_multiprocessing();
}

/// Wrap `kernel` according to the global compilation settings.
pub fn compile<K: Kernel>(name: impl Into<String>, kernel: K) -> Compiled<K> {
    AccelerationConfig::global().compile(name, kernel)
}

/// Map `function` over `inputs` with the global configuration.
///
/// `function` receives one input element and the shared `extra` arguments.
pub fn evaluate<I, A, O, F>(
    function: F,
    inputs: &[I],
    extra: &A,
    options: DispatchOptions,
) -> Result<Vec<O>, DispatchError>
where
    I: Sync,
    A: Sync + ?Sized,
    O: Send,
    F: Fn(&I, &A) -> O + Sync,
{
    Dispatcher::global().evaluate(function, inputs, extra, options)
}

/// `evaluate` followed by a single sum over the outputs.
pub fn reduce<I, A, O, F>(
    function: F,
    inputs: &[I],
    extra: &A,
    options: DispatchOptions,
) -> Result<O, DispatchError>
where
    I: Sync,
    A: Sync + ?Sized,
    O: Send + std::iter::Sum<O>,
    F: Fn(&I, &A) -> O + Sync,
{
    Dispatcher::global().reduce(function, inputs, extra, options)
}
