//! Assertion functions for aggregation outcomes.

use crate::aggregate::AggregateError;
use crate::error::{FailureClass, classify};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::{BuildHasher, Hash};

/// Assert that `err` classifies as `expected`.
///
/// # Panics
///
/// Panics with the full cause chain if the class differs.
///
/// # Example
///
/// ```
/// use cloudgather::error::{CloudError, FailureClass};
/// use cloudgather::testing::assert_failure_class;
///
/// let err = anyhow::Error::new(CloudError::timeout("slow"));
/// assert_failure_class(&err, FailureClass::Timeout);
/// ```
pub fn assert_failure_class(err: &anyhow::Error, expected: FailureClass) {
    let actual = classify(err);
    assert_eq!(
        actual, expected,
        "Failure class mismatch:\n  Expected: {expected}\n  Actual: {actual}\n  Error: {err:#}"
    );
}

/// Assert that `err` is [`AggregateError::Failed`] and lists exactly `expected`.
///
/// # Panics
///
/// Panics if `err` is another variant or the failed key sets differ.
pub fn assert_failed_keys<K: Debug + Eq + Hash>(err: &AggregateError<K>, expected: &[K]) {
    let Some(errors) = err.errors() else {
        panic!("Expected an aggregate failure, got: {err}");
    };
    let actual: HashSet<&K> = errors.keys().collect();
    let expected_set: HashSet<&K> = expected.iter().collect();

    if actual != expected_set {
        let missing: Vec<_> = expected_set.difference(&actual).collect();
        let extra: Vec<_> = actual.difference(&expected_set).collect();
        panic!(
            "Failed key mismatch:\n  Missing keys: {:?}\n  Extra keys: {:?}\n  Error: {}",
            missing, extra, err
        );
    }
}

/// Assert that a result map holds exactly the `expected` pairs.
///
/// # Panics
///
/// Panics if a key is missing, extra, or maps to a different value.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use cloudgather::testing::assert_results_equal;
///
/// let actual = HashMap::from([("a", 1), ("b", 2)]);
/// assert_results_equal(&actual, &[("b", 2), ("a", 1)]);
/// ```
pub fn assert_results_equal<K, V, S>(actual: &HashMap<K, V, S>, expected: &[(K, V)])
where
    K: Debug + Eq + Hash,
    V: Debug + PartialEq,
    S: BuildHasher,
{
    assert_eq!(
        actual.len(),
        expected.len(),
        "Result count mismatch:\n  Expected: {expected:?}\n  Actual: {actual:?}"
    );

    for (key, value) in expected {
        match actual.get(key) {
            Some(found) => assert_eq!(
                found, value,
                "Value mismatch for key {key:?}:\n  Expected: {value:?}\n  Actual: {found:?}"
            ),
            None => panic!("Key {key:?} missing from results: {actual:?}"),
        }
    }
}
