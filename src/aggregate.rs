//! Outcome types of one aggregation call.

use crate::error::{BatchTimeout, CloudError};
use std::collections::HashMap;
use std::fmt::{Debug, Write};
use std::hash::Hash;
use thiserror::Error;

/// Every key of a batch resolved to exactly one of these two maps.
#[derive(Debug)]
pub struct Outcome<K, V> {
    pub results: HashMap<K, V>,
    pub errors: HashMap<K, anyhow::Error>,
}

impl<K, V> Default for Outcome<K, V> {
    fn default() -> Self {
        Self {
            results: HashMap::new(),
            errors: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V> Outcome<K, V> {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len() + self.errors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Turn the outcome into the result map, or a [`AggregateError::Failed`]
    /// naming every failed key.
    ///
    /// # Errors
    ///
    /// Returns `AggregateError::Failed` if any key failed.
    pub fn into_result(self, prefix: &str) -> Result<HashMap<K, V>, AggregateError<K>> {
        if self.errors.is_empty() {
            Ok(self.results)
        } else {
            Err(AggregateError::Failed {
                prefix: prefix.to_string(),
                total: self.len(),
                errors: self.errors,
            })
        }
    }
}

/// Why an aggregation call did not produce a complete result map.
#[derive(Debug, Error)]
pub enum AggregateError<K> {
    /// One or more keys failed with ordinary errors; every failed key is listed.
    #[error("error {prefix}: {} of {total} failed{}", .errors.len(), list_failures(.errors))]
    Failed {
        prefix: String,
        total: usize,
        errors: HashMap<K, anyhow::Error>,
    },
    /// A key failed with an authorization-class error. Surfaced as soon as it
    /// is seen, without waiting for sibling keys.
    #[error("{prefix}: authorization failure on {key:?}: {cause}")]
    Authorization {
        prefix: String,
        key: K,
        #[source]
        cause: CloudError,
    },
    /// The batch deadline passed with work outstanding.
    #[error("{prefix}: {cause}")]
    Timeout {
        prefix: String,
        #[source]
        cause: BatchTimeout,
    },
}

fn list_failures<K: Debug>(errors: &HashMap<K, anyhow::Error>) -> String {
    let mut listed = String::new();
    for (key, err) in errors {
        let _ = write!(listed, "; {key:?}: {err:#}");
    }
    listed
}

impl<K> AggregateError<K> {
    #[must_use]
    pub fn prefix(&self) -> &str {
        match self {
            Self::Failed { prefix, .. }
            | Self::Authorization { prefix, .. }
            | Self::Timeout { prefix, .. } => prefix,
        }
    }

    /// Per-key failures; `None` unless this is [`AggregateError::Failed`].
    #[must_use]
    pub fn errors(&self) -> Option<&HashMap<K, anyhow::Error>> {
        match self {
            Self::Failed { errors, .. } => Some(errors),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization { .. })
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
