//! Fork-join worker pool.

use loopforge_kernels::error::{LoopError, Result};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info};

/// Owns the rayon pool used for partitioned loops, rebuilt whenever the
/// requested worker count changes.
#[derive(Default)]
pub struct WorkerPool {
    cached: Mutex<Option<Arc<ThreadPool>>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fork-join handle running on `workers` threads. One worker
    /// yields a sequential handle without touching the thread pool.
    pub fn prepare(&self, workers: usize) -> Result<ForkJoin> {
        if workers <= 1 {
            return Ok(ForkJoin::sequential());
        }
        let mut cached = self.cached.lock();
        if let Some(pool) = cached.as_ref() {
            if pool.current_num_threads() == workers {
                return Ok(ForkJoin {
                    pool: Some(Arc::clone(pool)),
                });
            }
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("loopforge-worker-{index}"))
            .build()
            .map_err(|err| {
                LoopError::ResourceExhaustion(format!("failed to start {workers} workers: {err}"))
            })?;
        info!(workers, "worker pool started");
        let pool = Arc::new(pool);
        *cached = Some(Arc::clone(&pool));
        Ok(ForkJoin { pool: Some(pool) })
    }

    pub fn current_workers(&self) -> Option<usize> {
        self.cached.lock().as_ref().map(|pool| pool.current_num_threads())
    }

    /// Drops the cached pool; its threads exit once in-flight work ends.
    pub fn shutdown(&self) {
        if self.cached.lock().take().is_some() {
            debug!("worker pool released");
        }
    }
}

/// One fork-join round over a prepared pool.
pub struct ForkJoin {
    pool: Option<Arc<ThreadPool>>,
}

impl ForkJoin {
    pub fn sequential() -> Self {
        Self { pool: None }
    }

    pub fn is_parallel(&self) -> bool {
        self.pool.is_some()
    }

    /// Runs `task(partition, item)` for every item and blocks until all have
    /// finished. Every partition runs to completion even when a sibling
    /// fails; the first error observed is returned. Panics are reported as
    /// [`LoopError::WorkerFailure`].
    pub fn run<T, F>(&self, items: Vec<T>, task: F) -> Result<()>
    where
        T: Send,
        F: Fn(usize, T) -> Result<()> + Sync,
    {
        let first_error: Mutex<Option<LoopError>> = Mutex::new(None);
        let task = &task;
        let first_error_ref = &first_error;

        match &self.pool {
            Some(pool) if items.len() > 1 => pool.scope(|scope| {
                for (partition, item) in items.into_iter().enumerate() {
                    scope.spawn(move |_| {
                        if let Err(err) = run_guarded(partition, item, task) {
                            keep_first(first_error_ref, err);
                        }
                    });
                }
            }),
            _ => {
                for (partition, item) in items.into_iter().enumerate() {
                    if let Err(err) = run_guarded(partition, item, task) {
                        keep_first(first_error_ref, err);
                    }
                }
            }
        }

        match first_error.into_inner() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn keep_first(slot: &Mutex<Option<LoopError>>, err: LoopError) {
    let mut slot = slot.lock();
    if slot.is_none() {
        *slot = Some(err);
    }
}

fn run_guarded<T, F>(partition: usize, item: T, task: &F) -> Result<()>
where
    F: Fn(usize, T) -> Result<()>,
{
    match catch_unwind(AssertUnwindSafe(|| task(partition, item))) {
        Ok(outcome) => outcome,
        Err(payload) => Err(LoopError::WorkerFailure {
            partition,
            detail: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
