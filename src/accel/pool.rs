//! Scoped worker pool: one pool per dispatch call.
//!
//! Lifecycle is create -> submit every task -> collect -> release. The pool
//! lives inside a `std::thread::scope`, so every worker is joined before
//! `map` returns, whether the batch succeeded, failed partway, or a worker
//! could not be spawned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::unbounded;
use tracing::{debug, warn};

use crate::accel::TierError;

/// Prefix of every worker thread name.
pub const WORKER_THREAD_PREFIX: &str = "speedify-worker-";

/// Fixed-size pool of OS threads scoped to a single batch.
#[derive(Debug, Clone, Copy)]
pub struct ScopedPool {
    workers: usize,
}

impl ScopedPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `task(i)` for every `i` in `0..len` and return outputs in index order.
    ///
    /// Workers finish tasks in any order; results are slotted back by index.
    /// The first failure marks the batch aborted: queued tasks are drained
    /// without running, and no partial output is returned.
    pub fn map<O, T>(&self, len: usize, task: T) -> Result<Vec<O>, TierError>
    where
        O: Send,
        T: Fn(usize) -> Result<O, TierError> + Sync,
    {
        if len == 0 {
            return Ok(Vec::new());
        }

        let workers = self.workers.min(len);
        let (task_tx, task_rx) = unbounded::<usize>();
        let (result_tx, result_rx) = unbounded::<(usize, Result<O, TierError>)>();
        let aborted = AtomicBool::new(false);

        for index in 0..len {
            task_tx
                .send(index)
                .map_err(|e| TierError::Setup(format!("task queue closed: {e}")))?;
        }
        // Workers exit once the queue is empty and this sender is gone.
        drop(task_tx);

        let outcome = thread::scope(|scope| {
            let mut spawned = 0usize;
            for id in 0..workers {
                let tasks = task_rx.clone();
                let results = result_tx.clone();
                let task = &task;
                let aborted = &aborted;

                let spawn = thread::Builder::new()
                    .name(format!("{WORKER_THREAD_PREFIX}{id}"))
                    .spawn_scoped(scope, move || {
                        for index in tasks.iter() {
                            if aborted.load(Ordering::Relaxed) {
                                continue;
                            }
                            if results.send((index, task(index))).is_err() {
                                break;
                            }
                        }
                    });

                match spawn {
                    Ok(_) => spawned += 1,
                    Err(e) => warn!(worker = id, error = %e, "failed to spawn pool worker"),
                }
            }
            drop(result_tx);

            if spawned == 0 {
                return Err(TierError::Setup("no worker thread could be spawned".to_string()));
            }
            debug!(workers = spawned, tasks = len, "worker pool started");

            let mut slots: Vec<Option<O>> = (0..len).map(|_| None).collect();
            let mut failure = None;
            for (index, result) in result_rx.iter() {
                match result {
                    Ok(value) => slots[index] = Some(value),
                    Err(e) => {
                        aborted.store(true, Ordering::Relaxed);
                        failure.get_or_insert(e);
                    }
                }
            }

            if let Some(e) = failure {
                return Err(e);
            }

            slots
                .into_iter()
                .enumerate()
                .map(|(index, slot)| slot.ok_or(TierError::Incomplete { index }))
                .collect()
        });

        debug!(workers, "worker pool released");
        outcome
    }
}
