//! Structured failure taxonomy for the collection pipeline.
//!
//! Every failure that can occur between "request scheduled" and "bar
//! emitted" is expressed as a `CollectorError` variant. The scheduler
//! uses the classification helpers below to decide between retrying
//! a target and failing it terminally.

use thiserror::Error;

/// Invariant checks performed on every bar before emission,
/// listed in evaluation order. The first violated check wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCheck {
    /// `low <= open <= high`, `low <= close <= high`, prices non-negative.
    OhlcInconsistent,

    /// `volume >= 0`
    NegativeVolume,

    /// Bar-open timestamp must land exactly on a timeframe boundary.
    TimestampNotAligned,

    /// Bar-open timestamp must not be ahead of the pipeline clock
    /// beyond the configured skew tolerance.
    TimestampInFuture,
}

impl std::fmt::Display for ValidationCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::OhlcInconsistent => "OHLCInconsistent",
            Self::NegativeVolume => "NegativeVolume",
            Self::TimestampNotAligned => "TimestampNotAligned",
            Self::TimestampInFuture => "TimestampInFuture",
        };
        f.write_str(name)
    }
}

/// Errors raised by connectors, the normalizer, the validator and the
/// scheduler itself.
///
/// CLASSIFICATION:
/// - `Config` / `Auth`: terminal for the affected target, never retried
/// - `Network` / `RateLimit` / `Timeout`: transient, retried with backoff
/// - `MalformedData`: one re-fetch is allowed, then terminal
/// - `Validation`: drops the single bar, the target itself continues
/// - `Cancelled`: shutdown path, not a failure
#[derive(Debug, Clone, Error)]
pub enum CollectorError {
    /// Unrecognized exchange, unrepresentable timeframe, missing
    /// credential reference and similar startup-time mistakes.
    #[error("configuration error: {0}")]
    Config(String),

    /// Credentials rejected by the remote side.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Transport-level failure (DNS, connect, reset, 5xx).
    #[error("network error: {0}")]
    Network(String),

    /// The remote side rejected the request for exceeding its limits.
    /// Carries the server-provided retry hint when one was sent.
    #[error("rate limited by remote (retry-after: {retry_after_ms:?} ms)")]
    RateLimit { retry_after_ms: Option<u64> },

    /// No response within the configured deadline.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Response body that could not be mapped onto the expected shape.
    #[error("malformed response data: {0}")]
    MalformedData(String),

    /// A bar violated one of the final invariant checks.
    #[error("validation failed: {check}")]
    Validation { check: ValidationCheck },

    /// The pipeline is shutting down; in-flight work was abandoned.
    #[error("operation cancelled")]
    Cancelled,
}

impl CollectorError {
    /// Creates a rate limit error from an optional `Retry-After` hint.
    pub fn rate_limited(retry_after_ms: Option<u64>) -> Self {
        Self::RateLimit { retry_after_ms }
    }

    /// True for error kinds the scheduler may retry with backoff.
    ///
    /// `MalformedData` is intentionally excluded here: it gets exactly
    /// one re-fetch, which the scheduler tracks separately.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimit { .. } | Self::Timeout(_)
        )
    }

    /// Server-suggested retry delay, if the error carries one.
    ///
    /// When present this overrides the computed exponential backoff.
    #[must_use]
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimit { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CollectorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else {
            Self::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_and_timeout_are_retryable() {
        assert!(CollectorError::Network("reset".into()).is_retryable());
        assert!(CollectorError::Timeout("30s".into()).is_retryable());
    }

    #[test]
    fn rate_limit_is_retryable_and_carries_hint() {
        let err = CollectorError::rate_limited(Some(2_500));
        assert!(err.is_retryable());
        assert_eq!(err.retry_after_ms(), Some(2_500));
    }

    #[test]
    fn auth_and_config_are_terminal() {
        assert!(!CollectorError::Auth("bad key".into()).is_retryable());
        assert!(!CollectorError::Config("unknown exchange".into()).is_retryable());
    }

    #[test]
    fn malformed_data_is_not_blanket_retryable() {
        assert!(!CollectorError::MalformedData("truncated row".into()).is_retryable());
    }

    #[test]
    fn no_hint_without_rate_limit() {
        assert_eq!(CollectorError::Network("x".into()).retry_after_ms(), None);
    }

    #[test]
    fn validation_error_names_the_check() {
        let err = CollectorError::Validation {
            check: ValidationCheck::OhlcInconsistent,
        };
        assert!(err.to_string().contains("OHLCInconsistent"));
    }
}
