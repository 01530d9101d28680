//! Retry decorators.
//!
//! [`RetryOnTimeout`] wraps a supplier or a function so that timeout-class
//! failures are re-attempted up to the configured bound, while any other
//! failure (authorization above all) comes straight back on the first
//! occurrence. [`retry_pending`] does the same for operations that return a
//! [`Pending`] value.
//!
//! ```
//! use cloudgather::error::CloudError;
//! use cloudgather::retry::RetryOnTimeout;
//!
//! let mut calls = 0;
//! let mut session = RetryOnTimeout::new(|| -> anyhow::Result<&str> {
//!     calls += 1;
//!     if calls < 3 {
//!         Err(CloudError::timeout("login timed out").into())
//!     } else {
//!         Ok("token")
//!     }
//! });
//! assert_eq!(session.get().unwrap(), "token");
//! ```

use crate::config::RetryConfig;
use crate::error::classify;
use crate::executor::SharedExecutor;
use crate::pending::{Pending, Promise, catch_panic, channel};
use anyhow::Result;
use std::sync::Arc;
use std::thread;
use tracing::debug;

/// Retry `operation` according to `config`.
///
/// Failures are classified with [`classify`]; only classes the policy allows
/// are re-attempted, and never more than `config.max_attempts` times in total.
///
/// # Errors
///
/// Returns the last failure unchanged once it is not retryable or the attempts
/// are used up.
pub fn retry_with_backoff<T, F>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) => {
                let class = classify(&err);
                if !config.should_retry(class) || !config.has_attempts_left(attempt) {
                    return Err(err);
                }
                let delay = config.delay_after(attempt);
                debug!(
                    "<< {class} failure on attempt {attempt}/{}, retrying in {delay:?}: {err:#}",
                    config.max_attempts
                );
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
        }
    }
}

/// Wraps a delegate so timeout-class failures are retried.
///
/// Call [`get`](Self::get) for a supplier (`FnMut() -> Result<T>`) or
/// [`apply`](Self::apply) for a function (`FnMut(A) -> Result<T>`).
#[derive(Debug, Clone)]
pub struct RetryOnTimeout<F> {
    delegate: F,
    config: RetryConfig,
}

impl<F> RetryOnTimeout<F> {
    /// Three attempts in total, no delay between them.
    pub const fn new(delegate: F) -> Self {
        Self::with_config(delegate, RetryConfig::on_timeout())
    }

    pub const fn with_config(delegate: F, config: RetryConfig) -> Self {
        Self { delegate, config }
    }

    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn into_inner(self) -> F {
        self.delegate
    }

    /// # Errors
    ///
    /// Returns the delegate's failure once it is not a timeout or the attempts
    /// are used up.
    pub fn get<T>(&mut self) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        retry_with_backoff(&self.config, &mut self.delegate)
    }

    /// # Errors
    ///
    /// Returns the delegate's failure once it is not a timeout or the attempts
    /// are used up.
    pub fn apply<A, T>(&mut self, arg: A) -> Result<T>
    where
        A: Clone,
        F: FnMut(A) -> Result<T>,
    {
        let delegate = &mut self.delegate;
        retry_with_backoff(&self.config, || delegate(arg.clone()))
    }
}

/// Wrap a supplier into a closure with the same call shape that retries
/// timeout-class failures.
pub fn retry_on_timeout<T, F>(delegate: F) -> impl FnMut() -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut wrapped = RetryOnTimeout::new(delegate);
    move || wrapped.get()
}

/// Wrap a function into a closure with the same call shape that retries
/// timeout-class failures.
pub fn retry_fn_on_timeout<A, T, F>(delegate: F) -> impl FnMut(A) -> Result<T>
where
    A: Clone,
    F: FnMut(A) -> Result<T>,
{
    let mut wrapped = RetryOnTimeout::new(delegate);
    move |arg| wrapped.apply(arg)
}

/// Retry an operation that returns a pending value.
///
/// Each attempt is started from the completion listener of the previous one,
/// on `executor`; no thread blocks while waiting. An `Err` returned by
/// `operation` itself is treated like a failed attempt.
pub fn retry_pending<T, F>(
    executor: &SharedExecutor,
    config: RetryConfig,
    operation: F,
) -> Pending<T>
where
    T: Send + 'static,
    F: Fn() -> Result<Pending<T>> + Send + Sync + 'static,
{
    let (promise, pending) = channel();
    attempt_pending(Arc::new(operation), Arc::clone(executor), config, 1, promise);
    pending
}

fn attempt_pending<T, F>(
    operation: Arc<F>,
    executor: SharedExecutor,
    config: RetryConfig,
    attempt: u32,
    promise: Promise<T>,
) where
    T: Send + 'static,
    F: Fn() -> Result<Pending<T>> + Send + Sync + 'static,
{
    let started = catch_panic(|| (*operation)()).unwrap_or_else(Pending::failed);
    let chain = Arc::clone(&executor);
    started.on_complete(&chain, move |result| match result {
        Err(err) if config.has_attempts_left(attempt) && config.should_retry(classify(&err)) => {
            let delay = config.delay_after(attempt);
            debug!(
                "<< attempt {attempt}/{} failed, retrying in {delay:?}: {err:#}",
                config.max_attempts
            );
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            attempt_pending(operation, executor, config, attempt + 1, promise);
        }
        other => promise.complete(other),
    });
}
