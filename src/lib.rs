//! latqcd-speedify -- parallel evaluation helpers for lattice QCD analysis.
//!
//! The core is a dispatcher that maps a function over an input slice using
//! the best available backend (rayon data parallelism, a scoped worker pool,
//! or a plain loop) and falls back tier by tier when one fails. Around it sit
//! a function compiler adapter, polynomial/rational function objects and a
//! few numeric test helpers.

pub mod accel;
pub mod check;
pub mod config;
pub mod logging;
pub mod math;
pub mod testing;

pub use accel::{
    compile, disable_compilation, disable_multiprocessing, disable_vectorized_backend,
    enable_compilation, enable_multiprocessing, enable_vectorized_backend, evaluate, reduce,
    AccelerationConfig, Backend, Capabilities, DispatchError, DispatchMetadata, DispatchOptions,
    Dispatcher,
};
