//! Session and reference data that is expensive to fetch.
//!
//! A [`MemoizedSupplier`] keeps the last value for a refresh interval. When the
//! interval runs out the next caller recomputes it through
//! [`retry_with_backoff`], so timeouts during the refresh are retried. An
//! authorization failure is remembered: until [`MemoizedSupplier::invalidate`]
//! is called every `get` returns it again without calling the provider, which
//! keeps a bad password from turning into a stream of failed logins.

use crate::config::RetryConfig;
use crate::error::{CloudError, authorization_cause};
use crate::retry::retry_with_backoff;
use anyhow::Result;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

type Refresh<T> = Box<dyn Fn() -> Result<T> + Send + Sync>;

struct Memo<T> {
    value: Option<(T, Instant)>,
    denied: Option<CloudError>,
}

/// Caches a value for an interval and refreshes it on demand.
pub struct MemoizedSupplier<T> {
    name: String,
    interval: Duration,
    retry: RetryConfig,
    refresh: Refresh<T>,
    memo: Mutex<Memo<T>>,
}

impl<T> fmt::Debug for MemoizedSupplier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizedSupplier")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl<T: Clone> MemoizedSupplier<T> {
    pub fn new<F>(name: impl Into<String>, interval: Duration, refresh: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            interval,
            retry: RetryConfig::on_timeout(),
            refresh: Box::new(refresh),
            memo: Mutex::new(Memo {
                value: None,
                denied: None,
            }),
        }
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Memo<T>> {
        self.memo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The cached value, refreshed first if it is missing or older than the
    /// interval. Concurrent callers wait for a single refresh.
    ///
    /// # Errors
    ///
    /// Returns the remembered authorization failure, or the refresh failure
    /// once retries are exhausted.
    pub fn get(&self) -> Result<T> {
        let mut memo = self.lock();
        if let Some(denied) = &memo.denied {
            debug!("<< [{}] returning cached authorization failure", self.name);
            return Err(denied.clone().into());
        }
        if let Some((value, fetched)) = &memo.value
            && fetched.elapsed() < self.interval
        {
            return Ok(value.clone());
        }

        debug!(">> [{}] refreshing", self.name);
        match retry_with_backoff(&self.retry, || (self.refresh)()) {
            Ok(value) => {
                memo.value = Some((value.clone(), Instant::now()));
                Ok(value)
            }
            Err(err) => {
                if let Some(denied) = authorization_cause(&err) {
                    warn!(
                        "<< [{}] authorization failure, caching until invalidated: {denied}",
                        self.name
                    );
                    memo.denied = Some(denied.clone());
                }
                Err(err)
            }
        }
    }

    /// Forget the cached value and any remembered authorization failure.
    pub fn invalidate(&self) {
        let mut memo = self.lock();
        memo.value = None;
        memo.denied = None;
    }

    /// Whether a value is cached and still inside its interval.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.lock()
            .value
            .as_ref()
            .is_some_and(|(_, fetched)| fetched.elapsed() < self.interval)
    }
}
