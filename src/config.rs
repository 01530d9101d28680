//! Retry and aggregation configuration.
//!
//! Both structs deserialize with `#[serde(default)]`, so a config file only has
//! to name what it changes:
//!
//! ```
//! use cloudgather::config::{AggregatorConfig, RetryOn};
//!
//! let cfg = AggregatorConfig::from_json_str(
//!     r#"{ "threads": 4, "timeout_ms": 30000, "retry": { "max_attempts": 2 } }"#,
//! ).unwrap();
//! assert_eq!(cfg.threads, Some(4));
//! assert_eq!(cfg.retry.max_attempts, 2);
//! assert_eq!(cfg.retry.retry_on, RetryOn::AnyExceptAuthorization);
//! ```

use crate::error::FailureClass;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Retry
// ============================================================================

/// Which failures a retry policy re-attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryOn {
    /// Only timeout-class failures.
    Timeout,
    /// Everything except authorization-class failures.
    AnyExceptAuthorization,
}

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub retry_on: RetryOn,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::for_batches()
    }
}

impl RetryConfig {
    /// Three attempts, no delay, timeouts only.
    #[must_use]
    pub const fn on_timeout() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
            retry_on: RetryOn::Timeout,
        }
    }

    /// Five attempts with exponential backoff from 50ms, anything but
    /// authorization failures. Used when re-dispatching failed keys of a batch.
    #[must_use]
    pub const fn for_batches() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 50,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
            retry_on: RetryOn::AnyExceptAuthorization,
        }
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub const fn without_delay(mut self) -> Self {
        self.initial_delay_ms = 0;
        self.max_delay_ms = 0;
        self
    }

    /// Whether a failure of `class` may be re-attempted under this policy.
    /// Authorization failures never are.
    #[must_use]
    pub const fn should_retry(&self, class: FailureClass) -> bool {
        match (self.retry_on, class) {
            (_, FailureClass::Authorization) => false,
            (RetryOn::Timeout, FailureClass::Timeout) => true,
            (RetryOn::Timeout, FailureClass::Other) => false,
            (RetryOn::AnyExceptAuthorization, _) => true,
        }
    }

    /// Whether another attempt is allowed after `attempt` attempts failed.
    #[must_use]
    pub const fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the attempt following `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.initial_delay_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let growth = self.backoff_multiplier.max(1.0).powi(exponent);
        let scaled = (self.initial_delay_ms as f64) * growth;
        let capped = scaled.min(self.max_delay_ms.max(self.initial_delay_ms) as f64);
        Duration::from_millis(capped as u64)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            bail!(
                "retry.backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            );
        }
        Ok(())
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// Settings for one aggregator and its worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Worker threads; `None` means one per CPU.
    pub threads: Option<usize>,
    /// Batch deadline; `None` waits as long as it takes.
    pub timeout_ms: Option<u64>,
    /// Policy for re-dispatching failed keys.
    pub retry: RetryConfig,
    /// How long memoized session and reference data stays valid.
    pub session_interval_secs: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            threads: None,
            timeout_ms: None,
            retry: RetryConfig::for_batches(),
            session_interval_secs: 60,
        }
    }
}

impl AggregatorConfig {
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub const fn session_interval(&self) -> Duration {
        Duration::from_secs(self.session_interval_secs)
    }

    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the values are out of range.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json).context("parse aggregator config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not hold a valid config.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("load {}", path.display()))
    }

    /// Overlay settings from environment variables starting with `prefix`,
    /// e.g. `CLOUDGATHER_THREADS`, `CLOUDGATHER_TIMEOUT_MS`,
    /// `CLOUDGATHER_MAX_ATTEMPTS`, `CLOUDGATHER_INITIAL_DELAY_MS`,
    /// `CLOUDGATHER_SESSION_INTERVAL_SECS`.
    ///
    /// # Errors
    ///
    /// Returns an error if a recognized variable does not parse.
    pub fn from_env(prefix: &str) -> Result<Self> {
        Self::default().with_env_vars(prefix, std::env::vars())
    }

    /// Overlay settings from `(name, value)` pairs; names are matched after
    /// stripping `prefix`, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns an error if a recognized variable does not parse.
    pub fn with_env_vars<I>(mut self, prefix: &str, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(prefix) else {
                continue;
            };
            let value = value.trim();
            match name.to_lowercase().as_str() {
                "threads" => self.threads = Some(parse_var(&key, value)?),
                "timeout_ms" => self.timeout_ms = Some(parse_var(&key, value)?),
                "max_attempts" => self.retry.max_attempts = parse_var(&key, value)?,
                "initial_delay_ms" => self.retry.initial_delay_ms = parse_var(&key, value)?,
                "max_delay_ms" => self.retry.max_delay_ms = parse_var(&key, value)?,
                "session_interval_secs" => self.session_interval_secs = parse_var(&key, value)?,
                _ => {}
            }
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.threads == Some(0) {
            bail!("threads must be at least 1");
        }
        self.retry.validate()
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("invalid value for {key}: {value:?}"))
}
