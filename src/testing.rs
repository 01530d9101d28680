//! Testing utilities for code built on the aggregator.
//!
//! - **Scripted operations**: a fake provider call whose per-key outcomes are
//!   queued up front, with invocation counting
//! - **Assertions**: check failure classes, failed key sets and result maps
//! - **Fixtures**: sample keys and temporary config files
//!
//! # Quick Start
//!
//! ```
//! use cloudgather::aggregator::Aggregator;
//! use cloudgather::error::ErrorKind;
//! use cloudgather::executor::direct;
//! use cloudgather::testing::*;
//!
//! let op = ScriptedOperation::new()
//!     .then("finance", Step::Fail(ErrorKind::NotFound))
//!     .always(Step::Succeed("ok"));
//!
//! let err = Aggregator::new(direct())
//!     .await_completion(vec!["engineering", "finance"], |key| op.start(key), "orgs")
//!     .unwrap_err();
//! assert_failed_keys(&err, &["finance"]);
//! ```

pub mod assertions;
pub mod fixtures;
pub mod scripted;

pub use assertions::*;
pub use fixtures::*;
pub use scripted::*;
