//! Provider error type and failure classification.
//!
//! Per-key failures travel as [`anyhow::Error`] so that provider code can attach
//! context freely. The retry and escalation policy only cares about one thing:
//! which [`FailureClass`] a failure belongs to. [`classify`] answers that by
//! walking the cause chain.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Provider Error
// ============================================================================

/// Generic error raised by a cloud provider call.
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct CloudError {
    pub message: String,
    pub kind: ErrorKind,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Authentication,
    Authorization,
    NotFound,
    AlreadyExists,
    InvalidInput,
    Network,
    Timeout,
    ServiceUnavailable,
    RateLimited,
    InternalError,
    Other,
}

impl CloudError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            detail: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, message)
    }

    /// Build an error from an HTTP response status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::from_status(status), message).with_detail(format!("status {status}"))
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub const fn class(&self) -> FailureClass {
        self.kind.class()
    }
}

impl ErrorKind {
    /// Map an HTTP status code onto an error kind.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Authentication,
            403 => Self::Authorization,
            404 | 410 => Self::NotFound,
            409 => Self::AlreadyExists,
            408 | 504 => Self::Timeout,
            429 => Self::RateLimited,
            502 | 503 => Self::ServiceUnavailable,
            400..=499 => Self::InvalidInput,
            500..=599 => Self::InternalError,
            _ => Self::Other,
        }
    }

    #[must_use]
    pub const fn class(self) -> FailureClass {
        match self {
            Self::Authentication | Self::Authorization => FailureClass::Authorization,
            Self::Timeout => FailureClass::Timeout,
            _ => FailureClass::Other,
        }
    }
}

/// Raised by the aggregator when its overall deadline passes with work outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("timed out after {waited:?} with {outstanding} of {total} operations outstanding")]
pub struct BatchTimeout {
    pub waited: Duration,
    pub outstanding: usize,
    pub total: usize,
}

// ============================================================================
// Classification
// ============================================================================

/// The three ways a failure can be treated by retry and escalation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Transient: the operation did not finish in time. Worth a bounded retry.
    Timeout,
    /// Bad credentials or missing permission. Never retried.
    Authorization,
    Other,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::Authorization => f.write_str("authorization"),
            Self::Other => f.write_str("other"),
        }
    }
}

/// Classify a failure by inspecting every error in its cause chain.
///
/// An authorization cause anywhere in the chain wins over a timeout cause.
#[must_use]
pub fn classify(err: &anyhow::Error) -> FailureClass {
    let mut class = FailureClass::Other;
    for cause in err.chain() {
        match class_of(cause) {
            FailureClass::Authorization => return FailureClass::Authorization,
            FailureClass::Timeout => class = FailureClass::Timeout,
            FailureClass::Other => {}
        }
    }
    class
}

/// Find the provider error that made `err` authorization-class, if any.
#[must_use]
pub fn authorization_cause(err: &anyhow::Error) -> Option<&CloudError> {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<CloudError>())
        .find(|cloud| cloud.class() == FailureClass::Authorization)
}

fn class_of(cause: &(dyn StdError + 'static)) -> FailureClass {
    if let Some(cloud) = cause.downcast_ref::<CloudError>() {
        return cloud.class();
    }
    if let Some(io_err) = cause.downcast_ref::<io::Error>()
        && io_err.kind() == io::ErrorKind::TimedOut
    {
        return FailureClass::Timeout;
    }
    if cause.is::<BatchTimeout>()
        || matches!(
            cause.downcast_ref::<RecvTimeoutError>(),
            Some(RecvTimeoutError::Timeout)
        )
    {
        return FailureClass::Timeout;
    }
    FailureClass::Other
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, anyhow};

    #[test]
    fn test_classify_direct_kinds() {
        let timeout = anyhow::Error::new(CloudError::timeout("slow"));
        let denied = anyhow::Error::new(CloudError::authorization("nope"));
        let missing = anyhow::Error::new(CloudError::new(ErrorKind::NotFound, "gone"));

        assert_eq!(classify(&timeout), FailureClass::Timeout);
        assert_eq!(classify(&denied), FailureClass::Authorization);
        assert_eq!(classify(&missing), FailureClass::Other);
        assert_eq!(classify(&anyhow!("plain")), FailureClass::Other);
    }

    #[test]
    fn test_classify_walks_context() {
        let err = Err::<(), _>(CloudError::timeout("read timed out"))
            .context("fetching vdc")
            .context("listing orgs")
            .unwrap_err();
        assert_eq!(classify(&err), FailureClass::Timeout);
    }

    #[test]
    fn test_classify_io_and_channel_timeouts() {
        let io_err = anyhow::Error::new(io::Error::new(io::ErrorKind::TimedOut, "socket"));
        assert_eq!(classify(&io_err), FailureClass::Timeout);

        let refused = anyhow::Error::new(io::Error::new(io::ErrorKind::ConnectionRefused, "x"));
        assert_eq!(classify(&refused), FailureClass::Other);

        let recv = anyhow::Error::new(RecvTimeoutError::Timeout);
        assert_eq!(classify(&recv), FailureClass::Timeout);
        let disconnected = anyhow::Error::new(RecvTimeoutError::Disconnected);
        assert_eq!(classify(&disconnected), FailureClass::Other);
    }

    #[test]
    fn test_authorization_wins_over_timeout() {
        let err = anyhow::Error::new(CloudError::authorization("expired token"))
            .context(CloudError::timeout("login timed out"));
        assert_eq!(classify(&err), FailureClass::Authorization);
        assert_eq!(
            authorization_cause(&err).map(|c| c.message.as_str()),
            Some("expired token")
        );
    }

    #[test]
    fn test_from_status() {
        assert_eq!(ErrorKind::from_status(401), ErrorKind::Authentication);
        assert_eq!(ErrorKind::from_status(403), ErrorKind::Authorization);
        assert_eq!(ErrorKind::from_status(404), ErrorKind::NotFound);
        assert_eq!(ErrorKind::from_status(408), ErrorKind::Timeout);
        assert_eq!(ErrorKind::from_status(504), ErrorKind::Timeout);
        assert_eq!(ErrorKind::from_status(429), ErrorKind::RateLimited);
        assert_eq!(ErrorKind::from_status(503), ErrorKind::ServiceUnavailable);
        assert_eq!(ErrorKind::from_status(422), ErrorKind::InvalidInput);
        assert_eq!(ErrorKind::from_status(500), ErrorKind::InternalError);
        assert_eq!(ErrorKind::from_status(302), ErrorKind::Other);

        let err = CloudError::from_status(401, "bad credentials");
        assert_eq!(err.class(), FailureClass::Authorization);
        assert_eq!(err.detail.as_deref(), Some("status 401"));
    }
}
