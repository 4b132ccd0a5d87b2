//! Worker pool for segment tasks.
//!
//! Each segment runs to completion on one worker. The pool is owned by the
//! engine instead of using rayon's global pool so its size follows
//! `max_parallel_tasks`.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{ExecError, Result};

pub(crate) fn build_pool(threads: usize) -> Result<ThreadPool> {
    let requested = threads.max(1);
    let try_build = |n: usize| {
        ThreadPoolBuilder::new()
            .num_threads(n)
            .thread_name(|i| format!("strata-worker-{i}"))
            .build()
    };
    match try_build(requested) {
        Ok(pool) => Ok(pool),
        Err(e) if requested > 1 => {
            tracing::warn!(requested, error = %e, "worker pool build failed, falling back to one thread");
            try_build(1).map_err(|e| ExecError::Config(format!("worker pool: {e}")))
        }
        Err(e) => Err(ExecError::Config(format!("worker pool: {e}"))),
    }
}

/// Run `task` for every item on the pool. The first error wins; tasks
/// already running finish but their results are dropped.
pub(crate) fn run_all<I, F, R>(pool: &ThreadPool, items: Vec<I>, task: F) -> Result<Vec<R>>
where
    I: Send,
    R: Send,
    F: Fn(usize, I) -> Result<R> + Send + Sync,
{
    pool.install(|| {
        items
            .into_par_iter()
            .enumerate()
            .map(|(i, item)| task(i, item))
            .collect()
    })
}
