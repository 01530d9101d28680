//! Polling until a condition holds.
//!
//! Provider jobs (VM deploys, IP releases, task status) are usually checked
//! with a cheap status call that is repeated until it reports completion.
//! [`RetryablePredicate`] does the repeating with a growing period and an
//! overall deadline.

use crate::error::{FailureClass, classify};
use anyhow::Result;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryablePredicate {
    max_wait: Duration,
    period: Duration,
    max_period: Duration,
}

impl RetryablePredicate {
    /// Poll for up to `max_wait`, starting at a 50ms period capped at 1s.
    #[must_use]
    pub const fn new(max_wait: Duration) -> Self {
        Self {
            max_wait,
            period: Duration::from_millis(50),
            max_period: Duration::from_secs(1),
        }
    }

    #[must_use]
    pub const fn with_period(mut self, period: Duration, max_period: Duration) -> Self {
        self.period = period;
        self.max_period = max_period;
        self
    }

    /// Call `check` until it returns `true` or `max_wait` has passed.
    ///
    /// Returns `Ok(false)` when time runs out. A timeout-class error from
    /// `check` counts as "not yet".
    ///
    /// # Errors
    ///
    /// Returns the first error from `check` that is not timeout-class.
    pub fn apply<F>(&self, mut check: F) -> Result<bool>
    where
        F: FnMut() -> Result<bool>,
    {
        let start = Instant::now();
        let mut period = self.period;
        let mut polls = 0u32;

        loop {
            polls += 1;
            match check() {
                Ok(true) => {
                    trace!("<< condition met after {polls} poll(s) in {:?}", start.elapsed());
                    return Ok(true);
                }
                Ok(false) => {}
                Err(err) if classify(&err) == FailureClass::Timeout => {
                    debug!("<< poll {polls} timed out, will try again: {err:#}");
                }
                Err(err) => return Err(err),
            }

            let elapsed = start.elapsed();
            if elapsed >= self.max_wait {
                debug!("<< gave up after {polls} poll(s) in {elapsed:?}");
                return Ok(false);
            }
            thread::sleep(period.min(self.max_wait - elapsed));
            period = Duration::try_from_secs_f64(period.as_secs_f64() * 1.5)
                .unwrap_or(self.max_period)
                .min(self.max_period);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloudError;

    #[test]
    fn test_condition_met_eventually() {
        let predicate = RetryablePredicate::new(Duration::from_secs(2))
            .with_period(Duration::from_millis(1), Duration::from_millis(5));
        let mut polls = 0;
        let done = predicate
            .apply(|| {
                polls += 1;
                Ok(polls >= 4)
            })
            .unwrap();
        assert!(done);
        assert_eq!(polls, 4);
    }

    #[test]
    fn test_gives_up_after_max_wait() {
        let predicate = RetryablePredicate::new(Duration::from_millis(30))
            .with_period(Duration::from_millis(5), Duration::from_millis(10));
        let start = Instant::now();
        assert!(!predicate.apply(|| Ok(false)).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_huge_period_does_not_overflow() {
        let predicate = RetryablePredicate::new(Duration::from_millis(20))
            .with_period(Duration::MAX, Duration::MAX);
        let mut polls = 0;
        let done = predicate
            .apply(|| {
                polls += 1;
                Ok(false)
            })
            .unwrap();
        assert!(!done);
        assert_eq!(polls, 2);
    }

    #[test]
    fn test_timeouts_keep_polling_other_errors_stop() {
        let predicate = RetryablePredicate::new(Duration::from_secs(2))
            .with_period(Duration::from_millis(1), Duration::from_millis(1));

        let mut polls = 0;
        let done = predicate
            .apply(|| {
                polls += 1;
                if polls < 3 {
                    Err(CloudError::timeout("status call timed out").into())
                } else {
                    Ok(true)
                }
            })
            .unwrap();
        assert!(done);
        assert_eq!(polls, 3);

        let mut polls = 0;
        let err = predicate
            .apply(|| -> Result<bool> {
                polls += 1;
                Err(CloudError::authorization("token revoked").into())
            })
            .unwrap_err();
        assert_eq!(polls, 1);
        assert_eq!(classify(&err), FailureClass::Authorization);
    }
}
