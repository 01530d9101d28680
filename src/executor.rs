//! Execution contexts for provider calls and completion listeners.
//!
//! Nothing here is global: callers build an executor and pass it to whatever
//! needs one. Three flavors are provided:
//!
//! - a dedicated rayon [`ThreadPool`](rayon::ThreadPool), see [`thread_pool`]
//! - rayon's global pool, see [`GlobalPool`]
//! - [`DirectExecutor`], which runs every task inline on the calling thread and
//!   is handy as a chain executor or in tests

use crate::pending::{Pending, Promise, catch_panic, channel};
use anyhow::{Context, Result};
use std::sync::Arc;

/// A unit of work handed to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Shared handle to an executor.
pub type SharedExecutor = Arc<dyn Executor>;

/// Something that can run tasks.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);
}

/// Submitting work that produces a value.
pub trait ExecutorExt: Executor {
    /// Run `f` on this executor and return its pending result. A panic in `f`
    /// becomes an internal error.
    fn submit<T, F>(&self, f: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (promise, pending): (Promise<T>, Pending<T>) = channel();
        self.execute(Box::new(move || promise.complete(catch_panic(f))));
        pending
    }
}

impl<E: Executor + ?Sized> ExecutorExt for E {}

impl Executor for rayon::ThreadPool {
    fn execute(&self, task: Task) {
        self.spawn(task);
    }
}

/// Runs tasks on rayon's global pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalPool;

impl Executor for GlobalPool {
    fn execute(&self, task: Task) {
        rayon::spawn(task);
    }
}

/// Runs tasks immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}

#[must_use]
pub fn direct() -> SharedExecutor {
    Arc::new(DirectExecutor)
}

/// Build a dedicated worker pool. `None` sizes it to the number of CPUs.
///
/// # Errors
///
/// Returns an error if the operating system refuses to spawn the worker threads.
pub fn thread_pool(threads: Option<usize>) -> Result<SharedExecutor> {
    let threads = threads.unwrap_or_else(num_cpus::get).max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("cloudgather-worker-{i}"))
        .build()
        .with_context(|| format!("build worker pool with {threads} threads"))?;
    Ok(Arc::new(pool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_thread_pool_runs_submitted_work() {
        let pool = thread_pool(Some(2)).unwrap();
        let pending: Vec<_> = (0..8u32).map(|i| pool.submit(move || Ok(i * i))).collect();
        let total: u32 = pending.into_iter().map(|p| p.wait().unwrap()).sum();
        assert_eq!(total, 140);
    }

    #[test]
    fn test_global_pool_and_direct() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        GlobalPool.submit(move || Ok(c.fetch_add(1, Ordering::SeqCst))).wait().unwrap();

        let c = Arc::clone(&counter);
        direct().execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_task_becomes_error() {
        let pool = thread_pool(Some(1)).unwrap();
        let err = pool
            .submit(|| -> Result<()> { panic!("provider exploded") })
            .wait()
            .unwrap_err();
        assert!(err.to_string().contains("provider exploded"));
    }
}
