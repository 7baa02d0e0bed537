//! Pipeline context: the worker pool and entry-range partitioning.
//!
//! Every parallel stage receives the context explicitly. With one thread the
//! stages run inline on the caller's thread, which is the debugging path and
//! produces the same results as any other thread count.

use std::ops::Range;

use rayon::prelude::*;
use tracing::debug;

use crate::error::Result;

#[derive(Debug)]
pub struct PipelineContext {
    pool: Option<rayon::ThreadPool>,
    n_threads: usize,
}

impl PipelineContext {
    /// `threads == 0` picks rayon's default; `single_thread` forces the
    /// inline path.
    pub fn new(threads: usize, single_thread: bool) -> Result<Self> {
        if single_thread || threads == 1 {
            return Ok(Self::single_threaded());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("evload-worker-{i}"))
            .build()?;
        let n_threads = pool.current_num_threads();
        debug!(threads = n_threads, "worker pool ready");
        Ok(PipelineContext {
            pool: Some(pool),
            n_threads,
        })
    }

    pub fn single_threaded() -> Self {
        PipelineContext {
            pool: None,
            n_threads: 1,
        }
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    /// Split `0..n_entries` into one contiguous range per thread. The first
    /// `n_entries % n_threads` ranges get one extra entry.
    pub fn thread_bounds(&self, n_entries: usize) -> Vec<Range<usize>> {
        split_even(n_entries, self.n_threads)
    }

    /// Run one task per element of `tasks`, returning results in task order.
    /// The first error aborts the stage.
    pub fn run_tasks<I, T, F>(&self, tasks: Vec<I>, f: F) -> Result<Vec<T>>
    where
        I: Send,
        T: Send,
        F: Fn(I) -> Result<T> + Sync + Send,
    {
        match &self.pool {
            None => tasks.into_iter().map(f).collect(),
            Some(pool) => pool.install(|| tasks.into_par_iter().map(f).collect()),
        }
    }

    /// Run `f` inside the pool, so rayon iterators inside it use these
    /// workers.
    pub fn install<T, F>(&self, f: F) -> T
    where
        T: Send,
        F: FnOnce() -> T + Send,
    {
        match &self.pool {
            None => f(),
            Some(pool) => pool.install(f),
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.pool.is_some()
    }
}

pub fn split_even(n: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1);
    let base = n / parts;
    let extra = n % parts;
    let mut out = Vec::with_capacity(parts);
    let mut start = 0;
    for p in 0..parts {
        let len = base + usize::from(p < extra);
        out.push(start..start + len);
        start += len;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_cover_all_entries_evenly() {
        assert_eq!(split_even(10, 3), vec![0..4, 4..7, 7..10]);
        assert_eq!(split_even(2, 4), vec![0..1, 1..2, 2..2, 2..2]);
        assert_eq!(split_even(5, 0), vec![0..5]);
    }

    #[test]
    fn run_tasks_preserves_order() {
        let ctx = PipelineContext::new(3, false).unwrap();
        let out = ctx.run_tasks((0..20).collect(), |i: usize| Ok(i * i)).unwrap();
        assert_eq!(out, (0..20).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn single_thread_path() {
        let ctx = PipelineContext::new(8, true).unwrap();
        assert_eq!(ctx.n_threads(), 1);
        assert!(!ctx.is_parallel());
        let out = ctx.run_tasks(vec![1, 2], |i: i32| Ok(i + 1)).unwrap();
        assert_eq!(out, vec![2, 3]);
    }
}
