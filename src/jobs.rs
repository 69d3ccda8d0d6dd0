//! Fixed-size worker pool used for the frame's fork-join fan-outs.
//!
//! There is no long-lived background work: every fan-out joins before the
//! data it produced is read.

use anyhow::{Context, Result};

pub struct JobPool {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl JobPool {
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("render-worker-{index}"))
            .build()
            .context("Failed to build render worker pool")?;
        Ok(Self { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs three independent tasks concurrently and joins all of them
    /// before returning. The tasks must not share mutable state.
    pub fn fork_join3<A, B, C>(&self, a: A, b: B, c: C)
    where
        A: FnOnce() + Send,
        B: FnOnce() + Send,
        C: FnOnce() + Send,
    {
        self.pool.scope(|scope| {
            scope.spawn(|_| a());
            scope.spawn(|_| b());
            c();
        });
    }

    /// Runs `work` inside the pool so nested parallel iterators use these
    /// workers instead of the global pool.
    pub fn install<R: Send>(&self, work: impl FnOnce() -> R + Send) -> R {
        self.pool.install(work)
    }
}
