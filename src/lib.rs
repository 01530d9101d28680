//! # cloudgather
//!
//! Parallel fetch and aggregation for multi-cloud API clients.
//!
//! Cloud provider clients constantly need "the same call, once per zone / org /
//! node / VDC". This crate dispatches those calls at once, gathers their
//! pending results and turns them into a single map, with the retry and
//! escalation policy such clients need:
//!
//! - **Timeouts are transient** and are retried a bounded number of times
//! - **Authorization failures are fatal** and surface immediately, never retried
//! - **Everything else is collected**, so one bad key does not hide the others
//!
//! ## Quick Start
//!
//! ```
//! use cloudgather::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let workers = thread_pool(Some(4))?;
//! let aggregator = Aggregator::new(direct());
//!
//! let regions = aggregator.spawn_all(
//!     vec!["us-east-1", "eu-west-1"],
//!     &workers,
//!     |region| Ok(format!("{region}: 3 images")),
//!     "list images",
//! )?;
//! assert_eq!(regions.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Pending values
//!
//! A [`Pending<T>`] is the consumer half of a one-shot result, completed by a
//! [`Promise<T>`]. Work submitted to an [`Executor`] through
//! [`ExecutorExt::submit`] yields one.
//!
//! ### Aggregation
//!
//! [`Aggregator`] fans out over keys and fans back in:
//! - [`await_completion`](Aggregator::await_completion) - all values or an error
//! - [`await_responses`](Aggregator::await_responses) - both the result and error maps
//! - [`transform_parallel`](Aggregator::transform_parallel) - re-dispatch failed keys
//! - [`spawn_all`](Aggregator::spawn_all) - blocking work on a pool
//!
//! ### Retry
//!
//! - [`RetryOnTimeout`] / [`retry_on_timeout`] - decorate a supplier or function
//! - [`retry_pending`] - the same for operations returning a pending value
//! - [`MemoizedSupplier`] - session data refreshed on an interval
//! - [`RetryablePredicate`] - poll until a job is done
//!
//! ### Failure classification
//!
//! Every failure is an [`anyhow::Error`]; [`classify`] walks its cause chain and
//! decides whether it is a [`FailureClass::Timeout`], a
//! [`FailureClass::Authorization`] or anything else.
//!
//! ## Logging
//!
//! Progress is reported through [`tracing`]; install any subscriber to see it.

pub mod aggregate;
pub mod aggregator;
pub mod config;
pub mod error;
pub mod executor;
pub mod memoize;
pub mod pending;
pub mod predicate;
pub mod retry;
pub mod testing;

pub use aggregate::{AggregateError, Outcome};
pub use aggregator::{AggregateResult, Aggregator, BatchKey};
pub use config::{AggregatorConfig, RetryConfig, RetryOn};
pub use error::{BatchTimeout, CloudError, ErrorKind, FailureClass, authorization_cause, classify};
pub use executor::{
    DirectExecutor, Executor, ExecutorExt, GlobalPool, SharedExecutor, Task, direct, thread_pool,
};
pub use memoize::MemoizedSupplier;
pub use pending::{Pending, Promise, channel};
pub use predicate::RetryablePredicate;
pub use retry::{
    RetryOnTimeout, retry_fn_on_timeout, retry_on_timeout, retry_pending, retry_with_backoff,
};
