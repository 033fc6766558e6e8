use rayon::prelude::*;
use rayon::ThreadPool;

use crate::error::Result;

/// Runs per-chunk work in parallel and joins before returning.
pub enum WorkerPool {
    Rayon(ThreadPool),
    Inline,
}

impl WorkerPool {
    /// Build a pool with `threads` workers; `0` uses rayon's default size.
    pub fn new(threads: usize) -> Self {
        let mut threads = threads;
        loop {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|idx| format!("migrate-cache-{idx}"))
                .build()
            {
                Ok(pool) => return WorkerPool::Rayon(pool),
                // Constrained environments can hit OS thread limits; shrink instead of failing.
                Err(_) if threads != 1 => {
                    threads = if threads == 0 { 1 } else { (threads / 2).max(1) };
                }
                Err(err) => {
                    tracing::debug!(
                        target: "migrate.cache",
                        error = %err,
                        "failed to build worker pool; running chunk work inline"
                    );
                    return WorkerPool::Inline;
                }
            }
        }
    }

    /// Apply `f` to every item and collect the results in input order.
    ///
    /// All items are processed before this returns; the first error (in input
    /// order) aborts the whole batch.
    pub fn try_map<T, R, F>(&self, items: &[T], f: F) -> Result<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> Result<R> + Sync + Send,
    {
        match self {
            WorkerPool::Rayon(pool) => pool.install(|| {
                let results: Vec<Result<R>> = items.par_iter().map(&f).collect();
                results.into_iter().collect()
            }),
            WorkerPool::Inline => items.iter().map(f).collect(),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerPool::Rayon(pool) => f
                .debug_tuple("Rayon")
                .field(&pool.current_num_threads())
                .finish(),
            WorkerPool::Inline => f.write_str("Inline"),
        }
    }
}
