//! Single-consumer pending results.
//!
//! A [`Promise`] is the producing half and a [`Pending`] the consuming half of
//! one computation. The consumer either blocks on it ([`Pending::wait`],
//! [`Pending::wait_timeout`]) or hands it a continuation that runs exactly once,
//! on an executor of its choosing, when the result arrives
//! ([`Pending::on_complete`], [`Pending::map`]).
//!
//! A promise dropped without being completed resolves its pending half with an
//! internal error, so nobody waits forever on abandoned work.

use crate::error::{CloudError, ErrorKind};
use crate::executor::{Executor, SharedExecutor};
use anyhow::Result;
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

type Callback<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

struct Listener<T> {
    executor: SharedExecutor,
    callback: Callback<T>,
}

enum Slot<T> {
    Empty,
    Ready(Result<T>),
    Listening(Listener<T>),
    Taken,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    fn take_ready(&mut self) -> Option<Result<T>> {
        match std::mem::replace(self, Self::Taken) {
            Self::Ready(result) => Some(result),
            other => {
                *self = other;
                None
            }
        }
    }
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a connected promise / pending pair.
#[must_use]
pub fn channel<T: Send + 'static>() -> (Promise<T>, Pending<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot::Empty),
        ready: Condvar::new(),
    });
    (
        Promise {
            shared: Some(Arc::clone(&shared)),
        },
        Pending { shared },
    )
}

// ============================================================================
// Promise
// ============================================================================

/// Producing half of a pending computation.
pub struct Promise<T: Send + 'static> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T: Send + 'static> Promise<T> {
    pub fn succeed(self, value: T) {
        self.complete(Ok(value));
    }

    pub fn fail(self, err: impl Into<anyhow::Error>) {
        self.complete(Err(err.into()));
    }

    /// Resolve the pending half. If a continuation is already registered it is
    /// handed to its executor, otherwise the result is stored for the consumer.
    pub fn complete(mut self, result: Result<T>) {
        if let Some(shared) = self.shared.take() {
            resolve(&shared, result);
        }
    }
}

impl<T: Send + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            resolve(
                &shared,
                Err(CloudError::new(
                    ErrorKind::InternalError,
                    "promise dropped before completion",
                )
                .into()),
            );
        }
    }
}

fn resolve<T: Send + 'static>(shared: &Shared<T>, result: Result<T>) {
    let mut slot = shared.lock();
    match std::mem::replace(&mut *slot, Slot::Taken) {
        Slot::Listening(listener) => {
            drop(slot);
            let Listener { executor, callback } = listener;
            executor.execute(Box::new(move || callback(result)));
        }
        Slot::Empty => {
            *slot = Slot::Ready(result);
            drop(slot);
            shared.ready.notify_all();
        }
        // The promise half is consumed on completion, so these are unreachable
        // in practice; restore whatever was there.
        previous @ (Slot::Ready(_) | Slot::Taken) => *slot = previous,
    }
}

// ============================================================================
// Pending
// ============================================================================

/// Consuming half of a pending computation.
pub struct Pending<T: Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("done", &self.is_done())
            .finish()
    }
}

impl<T: Send + 'static> Pending<T> {
    /// An already successful pending value.
    #[must_use]
    pub fn ready(value: T) -> Self {
        let (promise, pending) = channel();
        promise.succeed(value);
        pending
    }

    /// An already failed pending value.
    #[must_use]
    pub fn failed(err: impl Into<anyhow::Error>) -> Self {
        let (promise, pending) = channel();
        promise.fail(err);
        pending
    }

    /// Whether the result has arrived and has not been handed to a listener.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(*self.shared.lock(), Slot::Ready(_))
    }

    /// Block until the result arrives.
    ///
    /// # Errors
    ///
    /// Returns the failure the computation completed with.
    pub fn wait(self) -> Result<T> {
        let mut slot = self.shared.lock();
        loop {
            if let Some(result) = slot.take_ready() {
                return result;
            }
            slot = self
                .shared
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the result arrives or `timeout` elapses. The computation is
    /// not cancelled on timeout.
    ///
    /// # Errors
    ///
    /// Returns the failure the computation completed with, or a
    /// [`ErrorKind::Timeout`] error if nothing arrived in time.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.lock();
        loop {
            if let Some(result) = slot.take_ready() {
                return result;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CloudError::timeout(format!(
                    "no result within {timeout:?}"
                ))
                .into());
            }
            slot = self
                .shared
                .ready
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Run `callback` on `executor` exactly once, when the result arrives. If
    /// it already has, the callback is submitted immediately.
    pub fn on_complete<F>(self, executor: &SharedExecutor, callback: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let mut slot = self.shared.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(result) => {
                drop(slot);
                executor.execute(Box::new(move || callback(result)));
            }
            Slot::Empty => {
                *slot = Slot::Listening(Listener {
                    executor: Arc::clone(executor),
                    callback: Box::new(callback),
                });
            }
            previous @ (Slot::Listening(_) | Slot::Taken) => *slot = previous,
        }
    }

    /// Derive a new pending value by applying `f` to a successful result on
    /// `executor`. Failures pass through untouched.
    #[must_use]
    pub fn map<U, F>(self, executor: &SharedExecutor, f: F) -> Pending<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let (promise, pending) = channel();
        self.on_complete(executor, move |result| {
            promise.complete(result.and_then(|value| catch_panic(move || f(value))));
        });
        pending
    }
}

/// Run `f`, turning a panic into an internal error.
pub(crate) fn catch_panic<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(CloudError::new(
            ErrorKind::InternalError,
            format!("task panicked: {}", panic_message(payload.as_ref())),
        )
        .into())
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureClass, classify};
    use crate::executor::{DirectExecutor, ExecutorExt, direct};
    use std::thread;

    #[test]
    fn test_ready_and_failed() {
        assert_eq!(Pending::ready(7).wait().unwrap(), 7);
        let err = Pending::<u8>::failed(CloudError::timeout("slow")).wait().unwrap_err();
        assert_eq!(classify(&err), FailureClass::Timeout);
    }

    #[test]
    fn test_wait_for_other_thread() {
        let (promise, pending) = channel();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            promise.succeed("done");
        });
        assert_eq!(pending.wait().unwrap(), "done");
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_expires() {
        let (_promise, pending) = channel::<u32>();
        let err = pending.wait_timeout(Duration::from_millis(10)).unwrap_err();
        assert_eq!(classify(&err), FailureClass::Timeout);
    }

    #[test]
    fn test_dropped_promise_fails_pending() {
        let (promise, pending) = channel::<u32>();
        drop(promise);
        let err = pending.wait().unwrap_err();
        assert!(err.to_string().contains("promise dropped"));
    }

    #[test]
    fn test_listener_registered_before_completion() {
        let executor = direct();
        let (promise, pending) = channel();
        let (tx, rx) = std::sync::mpsc::channel();
        pending.on_complete(&executor, move |r: Result<u32>| tx.send(r.unwrap()).unwrap());
        assert!(rx.try_recv().is_err());
        promise.succeed(3);
        assert_eq!(rx.recv().unwrap(), 3);
    }

    #[test]
    fn test_listener_registered_after_completion() {
        let executor = direct();
        let (tx, rx) = std::sync::mpsc::channel();
        Pending::ready(5)
            .on_complete(&executor, move |r: Result<u32>| tx.send(r.unwrap()).unwrap());
        assert_eq!(rx.recv().unwrap(), 5);
    }

    #[test]
    fn test_map_and_panic_capture() {
        let executor = direct();
        let doubled = Pending::ready(21).map(&executor, |v| Ok(v * 2));
        assert_eq!(doubled.wait().unwrap(), 42);

        let exploded = Pending::ready(1).map(&executor, |_: i32| -> Result<i32> { panic!("boom") });
        let err = exploded.wait().unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_submit_runs_inline_on_direct_executor() {
        let pending = DirectExecutor.submit(|| Ok(String::from("inline")));
        assert!(pending.is_done());
        assert_eq!(pending.wait().unwrap(), "inline");
    }
}
