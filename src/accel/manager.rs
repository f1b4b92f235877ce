use std::convert::Infallible;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use tracing::{debug, warn};

use crate::accel::pool::ScopedPool;
use crate::accel::{
    cpu, panic_message, vectorized, AccelerationConfig, Backend, DispatchError, DispatchMetadata,
    Fallback, TierError,
};

/// Per-call overrides. Unset fields fall back to the configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    pub workers: Option<usize>,
    pub backend: Option<Backend>,
}

impl DispatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single worker: always the sequential loop.
    pub fn sequential() -> Self {
        Self::new().with_workers(1)
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    #[must_use]
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Parse a backend identifier; unknown names are an error.
    pub fn with_backend_name(self, name: &str) -> Result<Self, DispatchError> {
        Ok(self.with_backend(name.parse()?))
    }
}

/// The resolved order of tiers for one call.
///
/// `tiers` always ends with [`Backend::Sequential`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchPlan {
    pub workers: usize,
    pub tiers: Vec<Backend>,
}

/// One dispatch call: borrowed function, inputs and extra arguments.
pub struct DispatchRequest<'a, I, A: ?Sized, F> {
    pub function: &'a F,
    pub inputs: &'a [I],
    pub extra: &'a A,
    pub options: DispatchOptions,
}

/// Outputs in input order plus how they were produced.
#[derive(Debug, Clone)]
pub struct Dispatched<O> {
    pub outputs: Vec<O>,
    pub metadata: DispatchMetadata,
}

impl<O> Dispatched<O> {
    /// Sum the outputs once, in input order.
    pub fn total(self) -> O
    where
        O: std::iter::Sum<O>,
    {
        self.outputs.into_iter().sum()
    }
}

/// Handles backend selection and dispatch against one configuration.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher<'c> {
    config: &'c AccelerationConfig,
}

impl Dispatcher<'static> {
    pub fn global() -> Self {
        Self::new(AccelerationConfig::global())
    }
}

impl<'c> Dispatcher<'c> {
    pub fn new(config: &'c AccelerationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &'c AccelerationConfig {
        self.config
    }

    /// Resolve worker count and tier order from `options` and the current
    /// configuration. Called once per dispatch; nothing is cached.
    pub fn plan(&self, options: &DispatchOptions) -> Result<DispatchPlan, DispatchError> {
        let requested = options.workers.unwrap_or_else(|| self.config.workers());
        if requested == 0 {
            return Err(DispatchError::InvalidWorkerCount { requested });
        }
        let max_threads = self.config.max_threads();
        if requested > max_threads {
            warn!(
                requested,
                max_threads, "We recommend using fewer workers than available hardware threads"
            );
        }
        let workers = self.config.capabilities().clamp_workers(requested);

        let mut tiers = Vec::with_capacity(3);
        if workers > 1 {
            let entry = options
                .backend
                .unwrap_or_else(|| self.config.default_backend());
            if entry == Backend::Vectorized && self.config.vectorized_active() {
                tiers.push(Backend::Vectorized);
            }
            if entry != Backend::Sequential && self.config.multiprocessing_enabled() {
                tiers.push(Backend::Pool);
            }
        }
        tiers.push(Backend::Sequential);

        Ok(DispatchPlan { workers, tiers })
    }

    /// Walk the plan until a tier succeeds.
    ///
    /// Accelerated tiers absorb errors and panics as fallbacks; the
    /// sequential tier returns errors and lets panics unwind.
    pub fn dispatch<I, A, O, E, F>(
        &self,
        request: DispatchRequest<'_, I, A, F>,
    ) -> Result<Dispatched<O>, DispatchError>
    where
        I: Sync,
        A: Sync + ?Sized,
        O: Send,
        E: Into<anyhow::Error>,
        F: Fn(&I, &A) -> Result<O, E> + Sync,
    {
        let DispatchRequest {
            function,
            inputs,
            extra,
            options,
        } = request;
        let plan = self.plan(&options)?;
        let started = Instant::now();
        let mut fallbacks = Vec::new();

        let task = |index: usize| guarded(index, || function(&inputs[index], extra));

        for &backend in &plan.tiers {
            let attempt = match backend {
                Backend::Vectorized => {
                    debug!(%backend, inputs = inputs.len(), "dispatching");
                    vectorized::map_indexed(inputs.len(), task)
                }
                Backend::Pool => {
                    debug!(%backend, inputs = inputs.len(), workers = plan.workers, "dispatching");
                    ScopedPool::new(plan.workers).map(inputs.len(), task)
                }
                Backend::Sequential => {
                    if plan.workers == 1 {
                        debug!("Using for-loop instead of a parallel backend");
                    } else {
                        debug!(%backend, inputs = inputs.len(), "dispatching");
                    }
                    let outputs = cpu::map_sequential(function, inputs, extra)?;
                    return Ok(finish(outputs, backend, plan.workers, fallbacks, started));
                }
            };

            match attempt {
                Ok(outputs) => {
                    return Ok(finish(outputs, backend, plan.workers, fallbacks, started));
                }
                Err(error) => {
                    warn!(%backend, error = %error, "backend failed, falling back");
                    fallbacks.push(Fallback {
                        backend,
                        reason: error.to_string(),
                    });
                }
            }
        }

        // The plan always ends in the sequential tier, which returns above.
        let outputs = cpu::map_sequential(function, inputs, extra)?;
        Ok(finish(
            outputs,
            Backend::Sequential,
            plan.workers,
            fallbacks,
            started,
        ))
    }

    /// Fallible map: `function` may return an error for any element.
    pub fn try_evaluate<I, A, O, E, F>(
        &self,
        function: F,
        inputs: &[I],
        extra: &A,
        options: DispatchOptions,
    ) -> Result<Vec<O>, DispatchError>
    where
        I: Sync,
        A: Sync + ?Sized,
        O: Send,
        E: Into<anyhow::Error>,
        F: Fn(&I, &A) -> Result<O, E> + Sync,
    {
        self.dispatch(DispatchRequest {
            function: &function,
            inputs,
            extra,
            options,
        })
        .map(|d| d.outputs)
    }

    pub fn evaluate<I, A, O, F>(
        &self,
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
        self.evaluate_with_metadata(function, inputs, extra, options)
            .map(|d| d.outputs)
    }

    pub fn evaluate_with_metadata<I, A, O, F>(
        &self,
        function: F,
        inputs: &[I],
        extra: &A,
        options: DispatchOptions,
    ) -> Result<Dispatched<O>, DispatchError>
    where
        I: Sync,
        A: Sync + ?Sized,
        O: Send,
        F: Fn(&I, &A) -> O + Sync,
    {
        let infallible = |input: &I, extra: &A| Ok::<O, Infallible>(function(input, extra));
        self.dispatch(DispatchRequest {
            function: &infallible,
            inputs,
            extra,
            options,
        })
    }

    /// `evaluate`, then one sum over the outputs. Floating-point results may
    /// differ in the last bits between backends only through the map itself;
    /// the summation always runs in input order.
    pub fn reduce<I, A, O, F>(
        &self,
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
        self.evaluate_with_metadata(function, inputs, extra, options)
            .map(Dispatched::total)
    }

    pub fn try_reduce<I, A, O, E, F>(
        &self,
        function: F,
        inputs: &[I],
        extra: &A,
        options: DispatchOptions,
    ) -> Result<O, DispatchError>
    where
        I: Sync,
        A: Sync + ?Sized,
        O: Send + std::iter::Sum<O>,
        E: Into<anyhow::Error>,
        F: Fn(&I, &A) -> Result<O, E> + Sync,
    {
        self.dispatch(DispatchRequest {
            function: &function,
            inputs,
            extra,
            options,
        })
        .map(Dispatched::total)
    }
}

/// Run one task, turning both error returns and panics into a [`TierError`].
///
/// The process panic hook still runs before the unwind is caught, so with the
/// default hook every absorbed panic also prints a `thread '..' panicked at`
/// line to stderr. Install a quieter hook to keep stderr to the `warn!` lines.
fn guarded<O, E, G>(index: usize, task: G) -> Result<O, TierError>
where
    E: Into<anyhow::Error>,
    G: FnOnce() -> Result<O, E>,
{
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TierError::Function {
            index,
            source: e.into(),
        }),
        Err(payload) => Err(TierError::Panicked {
            index,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn finish<O>(
    outputs: Vec<O>,
    path_used: Backend,
    workers: usize,
    fallbacks: Vec<Fallback>,
    started: Instant,
) -> Dispatched<O> {
    let duration_us = started.elapsed().as_micros().min(u64::MAX as u128) as u64;
    debug!(backend = %path_used, outputs = outputs.len(), duration_us, "dispatch complete");
    Dispatched {
        outputs,
        metadata: DispatchMetadata {
            path_used,
            workers,
            fallbacks,
            duration_us,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::Capabilities;

    fn config(vectorized: bool, max_threads: usize) -> AccelerationConfig {
        AccelerationConfig::new(Capabilities::new(vectorized, max_threads))
    }

    #[test]
    fn test_single_worker_plan_is_sequential() {
        let cfg = config(true, 8);
        let plan = Dispatcher::new(&cfg)
            .plan(&DispatchOptions::sequential().with_backend(Backend::Vectorized))
            .unwrap();
        assert_eq!(plan.workers, 1);
        assert_eq!(plan.tiers, vec![Backend::Sequential]);
    }

    #[test]
    fn test_full_plan_order() {
        let cfg = config(true, 8);
        let plan = Dispatcher::new(&cfg)
            .plan(&DispatchOptions::new().with_workers(4))
            .unwrap();
        assert_eq!(
            plan.tiers,
            vec![Backend::Vectorized, Backend::Pool, Backend::Sequential]
        );
    }

    #[test]
    fn test_plan_skips_disabled_tiers() {
        let cfg = config(true, 8);
        cfg.disable_vectorized_backend();
        let dispatcher = Dispatcher::new(&cfg);
        let opts = DispatchOptions::new().with_workers(4);
        assert_eq!(
            dispatcher.plan(&opts).unwrap().tiers,
            vec![Backend::Pool, Backend::Sequential]
        );
        cfg.disable_multiprocessing();
        assert_eq!(dispatcher.plan(&opts).unwrap().tiers, vec![Backend::Sequential]);
    }

    #[test]
    fn test_plan_without_vectorized_capability() {
        let cfg = config(false, 8);
        let plan = Dispatcher::new(&cfg)
            .plan(&DispatchOptions::new().with_workers(4).with_backend(Backend::Vectorized))
            .unwrap();
        assert_eq!(plan.tiers, vec![Backend::Pool, Backend::Sequential]);
    }

    #[test]
    fn test_explicit_backend_enters_chain_at_its_tier() {
        let cfg = config(true, 8);
        let dispatcher = Dispatcher::new(&cfg);
        let pool = DispatchOptions::new().with_workers(4).with_backend(Backend::Pool);
        assert_eq!(
            dispatcher.plan(&pool).unwrap().tiers,
            vec![Backend::Pool, Backend::Sequential]
        );
        let seq = DispatchOptions::new()
            .with_workers(4)
            .with_backend(Backend::Sequential);
        assert_eq!(dispatcher.plan(&seq).unwrap().tiers, vec![Backend::Sequential]);
    }

    #[test]
    fn test_plan_clamps_workers() {
        let cfg = config(false, 4);
        let plan = Dispatcher::new(&cfg)
            .plan(&DispatchOptions::new().with_workers(32))
            .unwrap();
        assert_eq!(plan.workers, 4);
    }

    #[test]
    fn test_single_thread_machine_is_sequential() {
        let cfg = config(true, 1);
        let plan = Dispatcher::new(&cfg)
            .plan(&DispatchOptions::new().with_workers(8))
            .unwrap();
        assert_eq!(plan.tiers, vec![Backend::Sequential]);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let cfg = config(false, 4);
        let err = Dispatcher::new(&cfg)
            .plan(&DispatchOptions::new().with_workers(0))
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidWorkerCount { requested: 0 }));
    }

    #[test]
    fn test_backend_name_option() {
        let opts = DispatchOptions::new().with_backend_name("pathos.pools").unwrap();
        assert_eq!(opts.backend, Some(Backend::Pool));
        let err = DispatchOptions::new().with_backend_name("mpi").unwrap_err();
        assert!(err.to_string().contains("mpi"));
    }

    #[test]
    fn test_square_scenario() {
        let cfg = config(true, 8);
        let dispatcher = Dispatcher::new(&cfg);
        let xs = [1i64, 2, 3, 4];
        let out = dispatcher
            .evaluate(|x, _: &()| x * x, &xs, &(), DispatchOptions::sequential())
            .unwrap();
        assert_eq!(out, vec![1, 4, 9, 16]);
        let sum: i64 = dispatcher
            .reduce(|x, _: &()| x * x, &xs, &(), DispatchOptions::sequential())
            .unwrap();
        assert_eq!(sum, 30);
    }

    #[test]
    fn test_pool_tier_used_when_vectorized_missing() {
        let cfg = config(false, 4);
        let xs: Vec<u64> = (0..50).collect();
        let done = Dispatcher::new(&cfg)
            .evaluate_with_metadata(|x, k: &u64| x + k, &xs, &7, DispatchOptions::new().with_workers(3))
            .unwrap();
        assert_eq!(done.metadata.path_used, Backend::Pool);
        assert_eq!(done.metadata.workers, 3);
        assert!(done.metadata.fallbacks.is_empty());
        assert_eq!(done.outputs, (7..57).collect::<Vec<_>>());
    }

    #[test]
    fn test_pool_failure_falls_back_to_sequential() {
        let cfg = config(false, 4);
        let home = std::thread::current().id();
        let xs = [1.0f64, 2.0, 3.0];
        let done = Dispatcher::new(&cfg)
            .dispatch(DispatchRequest {
                function: &|x: &f64, _: &()| {
                    if std::thread::current().id() != home {
                        anyhow::bail!("not on the calling thread")
                    }
                    Ok(x * 2.0)
                },
                inputs: &xs,
                extra: &(),
                options: DispatchOptions::new().with_workers(2),
            })
            .unwrap();
        assert_eq!(done.outputs, vec![2.0, 4.0, 6.0]);
        assert_eq!(done.metadata.path_used, Backend::Sequential);
        assert_eq!(done.metadata.fallbacks.len(), 1);
        assert_eq!(done.metadata.fallbacks[0].backend, Backend::Pool);
        assert!(done.metadata.fallbacks[0].reason.contains("not on the calling thread"));
    }

    #[test]
    fn test_sequential_error_propagates() {
        let cfg = config(false, 4);
        let err = Dispatcher::new(&cfg)
            .try_evaluate(
                |x: &i32, _: &()| {
                    if *x == 2 {
                        anyhow::bail!("bad point")
                    }
                    Ok(*x)
                },
                &[1, 2, 3],
                &(),
                DispatchOptions::new().with_workers(2),
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Function { index: 1, .. }));
    }

    #[test]
    fn test_empty_inputs() {
        let cfg = config(true, 4);
        let empty: [f64; 0] = [];
        let out = Dispatcher::new(&cfg)
            .evaluate(|x, _: &()| *x, &empty, &(), DispatchOptions::new().with_workers(2))
            .unwrap();
        assert!(out.is_empty());
        let sum: f64 = Dispatcher::new(&cfg)
            .reduce(|x, _: &()| *x, &empty, &(), DispatchOptions::new().with_workers(2))
            .unwrap();
        assert_eq!(sum, 0.0);
    }
}
