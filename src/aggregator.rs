//! Fan-out / fan-in over many provider calls.
//!
//! An [`Aggregator`] takes a set of keys (zone ids, org names, node ids, ...)
//! and a function that starts the work for one key, dispatches all of them at
//! once, and blocks until every key has resolved to a value or an error.
//!
//! ## Failure policy
//!
//! - Ordinary failures are collected, never fail-fast: the caller gets an
//!   [`AggregateError::Failed`] listing *every* failing key.
//! - An authorization-class failure is surfaced as
//!   [`AggregateError::Authorization`] as soon as it is seen. Work already
//!   dispatched for other keys keeps running in the background.
//! - If the optional batch deadline passes first, the call returns
//!   [`AggregateError::Timeout`]; dispatched work is not cancelled.
//!
//! ## Executors
//!
//! The aggregator holds a *chain* executor, on which completion listeners run.
//! Where the per-key work runs is up to the operation: typically it calls
//! [`ExecutorExt::submit`] on a worker pool, which is exactly what
//! [`Aggregator::spawn_all`] does.
//!
//! ## Example
//!
//! ```
//! use cloudgather::aggregator::Aggregator;
//! use cloudgather::executor::{direct, thread_pool, ExecutorExt};
//!
//! # fn main() -> anyhow::Result<()> {
//! let workers = thread_pool(Some(4))?;
//! let aggregator = Aggregator::new(direct());
//!
//! let sizes = aggregator.await_completion(
//!     vec!["us-east-1", "eu-west-1"],
//!     |zone| {
//!         let zone = zone.to_string();
//!         Ok(workers.submit(move || Ok(zone.len())))
//!     },
//!     "zone sizes",
//! )?;
//! assert_eq!(sizes["eu-west-1"], 9);
//! # Ok(())
//! # }
//! ```

use crate::aggregate::{AggregateError, Outcome};
use crate::config::{AggregatorConfig, RetryConfig};
use crate::error::{BatchTimeout, CloudError, authorization_cause, classify};
use crate::executor::{ExecutorExt, SharedExecutor};
use crate::pending::{Pending, catch_panic};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Bounds every batch key has to satisfy.
pub trait BatchKey: Eq + Hash + Clone + fmt::Debug + Send + 'static {}

impl<T: Eq + Hash + Clone + fmt::Debug + Send + 'static> BatchKey for T {}

pub type AggregateResult<K, T> = Result<T, AggregateError<K>>;

// ============================================================================
// Collector
// ============================================================================

struct Progress<K, V> {
    outstanding: usize,
    outcome: Outcome<K, V>,
    authorization: Option<(K, CloudError)>,
}

/// Fan-in point of one round: listeners record into it, the caller waits on it.
struct Collector<K, V> {
    total: usize,
    progress: Mutex<Progress<K, V>>,
    changed: Condvar,
}

impl<K: BatchKey, V> Collector<K, V> {
    fn new(total: usize) -> Self {
        Self {
            total,
            progress: Mutex::new(Progress {
                outstanding: total,
                outcome: Outcome::default(),
                authorization: None,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Progress<K, V>> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, key: K, result: anyhow::Result<V>, prefix: &str) {
        match result {
            Ok(value) => {
                debug!("<< [{prefix}] completed key({key:?})");
                let mut progress = self.lock();
                progress.outcome.results.insert(key, value);
                progress.outstanding = progress.outstanding.saturating_sub(1);
            }
            Err(err) => {
                let denied = authorization_cause(&err).cloned();
                if denied.is_some() {
                    warn!("<< [{prefix}] authorization failure on key({key:?}): {err:#}");
                } else {
                    warn!("<< [{prefix}] error on key({key:?}): {err:#}");
                }
                let mut progress = self.lock();
                if let Some(cause) = denied
                    && progress.authorization.is_none()
                {
                    progress.authorization = Some((key.clone(), cause));
                }
                progress.outcome.errors.insert(key, err);
                progress.outstanding = progress.outstanding.saturating_sub(1);
            }
        }
        self.changed.notify_all();
    }
}

fn unique<K: BatchKey>(keys: impl IntoIterator<Item = K>) -> Vec<K> {
    let mut seen = HashSet::new();
    keys.into_iter().filter(|key| seen.insert(key.clone())).collect()
}

// ============================================================================
// Aggregator
// ============================================================================

/// Dispatches per-key work and gathers the outcomes.
#[derive(Clone)]
pub struct Aggregator {
    chain: SharedExecutor,
    timeout: Option<Duration>,
    retry: RetryConfig,
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Aggregator {
    /// An aggregator without a batch deadline, using
    /// [`RetryConfig::for_batches`] for [`Aggregator::transform_parallel`].
    #[must_use]
    pub fn new(chain: SharedExecutor) -> Self {
        Self {
            chain,
            timeout: None,
            retry: RetryConfig::for_batches(),
        }
    }

    #[must_use]
    pub fn from_config(chain: SharedExecutor, config: &AggregatorConfig) -> Self {
        Self {
            chain,
            timeout: config.timeout(),
            retry: config.retry,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub const fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Start `operation` for every key, wait for all of them and return the
    /// value of each key.
    ///
    /// An `Err` returned by `operation` itself counts as that key's failure.
    /// Duplicate keys are dispatched once.
    ///
    /// # Errors
    ///
    /// - [`AggregateError::Authorization`] as soon as any key fails with an
    ///   authorization-class error
    /// - [`AggregateError::Timeout`] if the batch deadline passes first
    /// - [`AggregateError::Failed`] with every failed key otherwise
    pub fn await_completion<K, V, I, F>(
        &self,
        keys: I,
        operation: F,
        log_prefix: &str,
    ) -> AggregateResult<K, HashMap<K, V>>
    where
        K: BatchKey,
        V: Send + 'static,
        I: IntoIterator<Item = K>,
        F: FnMut(&K) -> anyhow::Result<Pending<V>>,
    {
        let started = Instant::now();
        let collector = self.dispatch(unique(keys), operation, log_prefix);
        self.collect(&collector, started, self.deadline(started), log_prefix)?
            .into_result(log_prefix)
    }

    /// Wait on already dispatched work and report both maps.
    ///
    /// Use this when good and bad keys are reported separately; ordinary
    /// failures land in [`Outcome::errors`] instead of failing the call.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError::Authorization`] or [`AggregateError::Timeout`].
    pub fn await_responses<K, V, I>(
        &self,
        responses: I,
        log_prefix: &str,
    ) -> AggregateResult<K, Outcome<K, V>>
    where
        K: BatchKey,
        V: Send + 'static,
        I: IntoIterator<Item = (K, Pending<V>)>,
    {
        let started = Instant::now();
        let responses: HashMap<K, Pending<V>> = responses.into_iter().collect();
        let collector = Arc::new(Collector::new(responses.len()));
        let prefix: Arc<str> = Arc::from(log_prefix);
        for (key, pending) in responses {
            self.listen(&collector, &prefix, key, pending);
        }
        self.collect(&collector, started, self.deadline(started), log_prefix)
    }

    /// Like [`Aggregator::await_completion`], but keys that failed are
    /// dispatched again according to the aggregator's [`RetryConfig`]. Only
    /// failed keys are re-run; keys whose failure the policy does not retry are
    /// final straight away.
    ///
    /// The batch deadline covers the whole call: every round and every backoff
    /// sleep between rounds count against it.
    ///
    /// # Errors
    ///
    /// Same as [`Aggregator::await_completion`]; `Failed` holds the last error
    /// of every key that never succeeded.
    pub fn transform_parallel<K, V, I, F>(
        &self,
        keys: I,
        mut operation: F,
        log_prefix: &str,
    ) -> AggregateResult<K, HashMap<K, V>>
    where
        K: BatchKey,
        V: Send + 'static,
        I: IntoIterator<Item = K>,
        F: FnMut(&K) -> anyhow::Result<Pending<V>>,
    {
        let started = Instant::now();
        let deadline = self.deadline(started);
        let mut remaining = unique(keys);
        let total = remaining.len();
        let mut results = HashMap::with_capacity(total);
        let mut failed = HashMap::new();
        let mut attempt = 0;

        while !remaining.is_empty() {
            attempt += 1;
            let collector = self.dispatch(remaining, &mut operation, log_prefix);
            let outcome = self.collect(&collector, started, deadline, log_prefix)?;
            results.extend(outcome.results);

            remaining = Vec::new();
            for (key, err) in outcome.errors {
                let retry = self.retry.has_attempts_left(attempt)
                    && self.retry.should_retry(classify(&err));
                if retry {
                    remaining.push(key);
                } else {
                    failed.insert(key, err);
                }
            }

            if !remaining.is_empty() {
                let delay = self.retry.delay_after(attempt);
                debug!(
                    "<< [{log_prefix}] retrying {} key(s) after attempt {attempt} in {delay:?}",
                    remaining.len()
                );
                let now = Instant::now();
                let delay = deadline.map_or(delay, |deadline| {
                    delay.min(deadline.saturating_duration_since(now))
                });
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                if let Some(deadline) = deadline
                    && Instant::now() >= deadline
                {
                    let cause = BatchTimeout {
                        waited: started.elapsed(),
                        outstanding: remaining.len(),
                        total,
                    };
                    warn!("<< [{log_prefix}] {cause}");
                    return Err(AggregateError::Timeout {
                        prefix: log_prefix.to_string(),
                        cause,
                    });
                }
            }
        }

        if failed.is_empty() {
            Ok(results)
        } else {
            Err(AggregateError::Failed {
                prefix: log_prefix.to_string(),
                total,
                errors: failed,
            })
        }
    }

    /// Run the blocking `f` for every key on `pool` and aggregate the results
    /// with [`Aggregator::await_completion`].
    ///
    /// # Errors
    ///
    /// Same as [`Aggregator::await_completion`].
    pub fn spawn_all<K, V, I, F>(
        &self,
        keys: I,
        pool: &SharedExecutor,
        f: F,
        log_prefix: &str,
    ) -> AggregateResult<K, HashMap<K, V>>
    where
        K: BatchKey,
        V: Send + 'static,
        I: IntoIterator<Item = K>,
        F: Fn(&K) -> anyhow::Result<V> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.await_completion(
            keys,
            |key| {
                let f = Arc::clone(&f);
                let key = key.clone();
                Ok(pool.submit(move || f(&key)))
            },
            log_prefix,
        )
    }

    /// Deadline of a call that started at `started`. A timeout too large to
    /// represent means no deadline.
    fn deadline(&self, started: Instant) -> Option<Instant> {
        self.timeout.and_then(|timeout| started.checked_add(timeout))
    }

    fn dispatch<K, V, F>(
        &self,
        keys: Vec<K>,
        mut operation: F,
        log_prefix: &str,
    ) -> Arc<Collector<K, V>>
    where
        K: BatchKey,
        V: Send + 'static,
        F: FnMut(&K) -> anyhow::Result<Pending<V>>,
    {
        let collector = Arc::new(Collector::new(keys.len()));
        let prefix: Arc<str> = Arc::from(log_prefix);
        for key in keys {
            trace!(">> [{log_prefix}] dispatching key({key:?})");
            match catch_panic(|| operation(&key)) {
                Ok(pending) => self.listen(&collector, &prefix, key, pending),
                Err(err) => collector.record(key, Err(err), log_prefix),
            }
        }
        collector
    }

    fn listen<K, V>(
        &self,
        collector: &Arc<Collector<K, V>>,
        prefix: &Arc<str>,
        key: K,
        pending: Pending<V>,
    ) where
        K: BatchKey,
        V: Send + 'static,
    {
        let collector = Arc::clone(collector);
        let prefix = Arc::clone(prefix);
        pending.on_complete(&self.chain, move |result| collector.record(key, result, &prefix));
    }

    /// Wait for `collector` to drain. `started` is when the whole call began,
    /// which may be earlier than this round.
    fn collect<K, V>(
        &self,
        collector: &Collector<K, V>,
        started: Instant,
        deadline: Option<Instant>,
        log_prefix: &str,
    ) -> AggregateResult<K, Outcome<K, V>>
    where
        K: BatchKey,
    {
        let mut progress = collector.lock();
        loop {
            if let Some((key, cause)) = progress.authorization.take() {
                return Err(AggregateError::Authorization {
                    prefix: log_prefix.to_string(),
                    key,
                    cause,
                });
            }
            if progress.outstanding == 0 {
                debug!(
                    "<< [{log_prefix}] resolved {} key(s), {} failed",
                    collector.total,
                    progress.outcome.errors.len()
                );
                return Ok(std::mem::take(&mut progress.outcome));
            }
            progress = match deadline {
                None => collector
                    .changed
                    .wait(progress)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let cause = BatchTimeout {
                            waited: now - started,
                            outstanding: progress.outstanding,
                            total: collector.total,
                        };
                        warn!("<< [{log_prefix}] {cause}");
                        return Err(AggregateError::Timeout {
                            prefix: log_prefix.to_string(),
                            cause,
                        });
                    }
                    collector
                        .changed
                        .wait_timeout(progress, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}
