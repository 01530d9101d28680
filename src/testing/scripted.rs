//! A fake provider operation driven by a per-key script.

use crate::error::{CloudError, ErrorKind};
use crate::pending::{Pending, Promise, channel};
use anyhow::Result;
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One scripted outcome of a single invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<V> {
    /// The pending value resolves to `V`.
    Succeed(V),
    /// The pending value fails with a [`CloudError`] of this kind.
    Fail(ErrorKind),
    /// The operation returns `Err` without producing a pending value.
    Throw(ErrorKind),
    /// The pending value stays unresolved until
    /// [`ScriptedOperation::release`] is called.
    Hang,
}

struct Script<K, V: Send + 'static> {
    queued: HashMap<K, VecDeque<Step<V>>>,
    otherwise: Option<Step<V>>,
    calls: HashMap<K, usize>,
    held: Vec<Promise<V>>,
}

/// Replays queued [`Step`]s per key and counts invocations.
///
/// Each call takes the next step queued for its key; once the queue is empty
/// the [`always`](Self::always) step is used. Clones share the same script, so
/// one clone can go into an aggregator while the test keeps another to read
/// the call counts.
///
/// # Example
///
/// ```
/// use cloudgather::aggregator::Aggregator;
/// use cloudgather::error::ErrorKind;
/// use cloudgather::executor::direct;
/// use cloudgather::testing::{ScriptedOperation, Step};
///
/// let op = ScriptedOperation::new()
///     .then("eu", Step::Fail(ErrorKind::Timeout))
///     .always(Step::Succeed(1));
///
/// let aggregator = Aggregator::new(direct())
///     .with_retry(cloudgather::config::RetryConfig::for_batches().without_delay());
/// let found = aggregator
///     .transform_parallel(vec!["us", "eu"], |key| op.start(key), "zones")
///     .unwrap();
///
/// assert_eq!(found.len(), 2);
/// assert_eq!(op.calls(&"eu"), 2);
/// assert_eq!(op.calls(&"us"), 1);
/// ```
pub struct ScriptedOperation<K, V: Send + 'static> {
    script: Arc<Mutex<Script<K, V>>>,
}

impl<K, V: Send + 'static> Clone for ScriptedOperation<K, V> {
    fn clone(&self) -> Self {
        Self {
            script: Arc::clone(&self.script),
        }
    }
}

impl<K, V> Default for ScriptedOperation<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ScriptedOperation<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone + Send + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                queued: HashMap::new(),
                otherwise: None,
                calls: HashMap::new(),
                held: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Script<K, V>> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Step used for any key whose queue is empty.
    #[must_use]
    pub fn always(self, step: Step<V>) -> Self {
        self.lock().otherwise = Some(step);
        self
    }

    /// Queue `step` for the next unscripted invocation with `key`.
    #[must_use]
    pub fn then(self, key: K, step: Step<V>) -> Self {
        self.push(key, step);
        self
    }

    pub fn push(&self, key: K, step: Step<V>) {
        self.lock().queued.entry(key).or_default().push_back(step);
    }

    /// Invoke the operation for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error when the step is [`Step::Throw`].
    pub fn start(&self, key: &K) -> Result<Pending<V>> {
        let mut script = self.lock();
        *script.calls.entry(key.clone()).or_insert(0) += 1;
        let queued = script.queued.get_mut(key).and_then(VecDeque::pop_front);
        let step = queued.or_else(|| script.otherwise.clone());

        match step {
            Some(Step::Succeed(value)) => Ok(Pending::ready(value)),
            Some(Step::Fail(kind)) => Ok(Pending::failed(scripted_error(kind, key))),
            Some(Step::Throw(kind)) => Err(scripted_error(kind, key).into()),
            Some(Step::Hang) => {
                let (promise, pending) = channel();
                script.held.push(promise);
                Ok(pending)
            }
            None => Ok(Pending::failed(CloudError::new(
                ErrorKind::InternalError,
                format!("no scripted step left for {key:?}"),
            ))),
        }
    }

    /// Blocking form of [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns the scripted failure.
    pub fn run(&self, key: &K) -> Result<V> {
        self.start(key)?.wait()
    }

    #[must_use]
    pub fn calls(&self, key: &K) -> usize {
        self.lock().calls.get(key).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// Resolve every [`Step::Hang`] issued so far with an internal error.
    pub fn release(&self) {
        let held = std::mem::take(&mut self.lock().held);
        drop(held);
    }
}

impl<V: Clone + Send + 'static> ScriptedOperation<(), V> {
    /// Supplier form for scripts keyed by `()`.
    ///
    /// # Errors
    ///
    /// Returns the scripted failure.
    pub fn supply(&self) -> Result<V> {
        self.run(&())
    }
}

fn scripted_error<K: Debug>(kind: ErrorKind, key: &K) -> CloudError {
    CloudError::new(kind, format!("scripted {kind:?} for {key:?}"))
}
