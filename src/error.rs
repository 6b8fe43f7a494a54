//! Error taxonomy and engine error types
//!
//! The engine does not produce the errors it retries; it consumes them. A
//! wrapped operation fails with any error type that can report an
//! [`ErrorKind`] tag through [`ErrorClassification`], and the per-destination
//! policy decides which tags are retryable.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::budget::BudgetStatus;

/// Shared taxonomy of failure kinds reported by wrapped operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimit,
    Authentication,
    Validation,
    Unknown,
}

impl ErrorKind {
    /// All kinds, in taxonomy order.
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::Network,
        ErrorKind::Timeout,
        ErrorKind::RateLimit,
        ErrorKind::Authentication,
        ErrorKind::Validation,
        ErrorKind::Unknown,
    ];

    /// The kinds a lazily-created default policy treats as retryable.
    /// Authentication and validation failures are permanent by default.
    pub fn default_retryable() -> HashSet<ErrorKind> {
        [ErrorKind::Network, ErrorKind::Timeout, ErrorKind::RateLimit, ErrorKind::Unknown]
            .into_iter()
            .collect()
    }

    /// Stable snake_case name used in summaries and events.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Validation => "validation",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification hook the wrapped operation's error type implements
pub trait ErrorClassification {
    /// The taxonomy tag for this error.
    fn error_kind(&self) -> ErrorKind;
}

/// Concrete classified error
///
/// Used by the failed-request queue's type-erased stored operations, and by
/// callers that do not carry their own error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct QueryError {
    pub kind: ErrorKind,
    pub message: String,
}

impl QueryError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimit, message)
    }
}

impl ErrorClassification for QueryError {
    fn error_kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Invalid configuration supplied to a builder
#[derive(Debug, Clone, Error)]
#[error("invalid configuration: {message}")]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Errors surfaced to the caller of `execute_with_retry`
///
/// Only two conditions reach the caller besides the operation's own error:
/// exhaustion (which still carries the last operation error) and budget
/// denial. Everything else is handled internally and observed through events
/// and statistics.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// All retry attempts were exhausted; the last operation error is attached.
    #[error("all retry attempts exhausted after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// The operation failed with a kind the policy does not retry.
    #[error("operation failed with non-retryable error: {source}")]
    NonRetryable {
        #[source]
        source: E,
    },

    /// The global retry budget has no capacity; raised without waiting.
    #[error(
        "retry budget exhausted ({} used this minute, {} this hour)",
        status.minute_count,
        status.hour_count
    )]
    BudgetExhausted { status: BudgetStatus },
}

impl<E> RetryError<E> {
    /// The operation's own last error, when one was observed.
    pub fn source_error(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::NonRetryable { source } => {
                Some(source)
            }
            RetryError::BudgetExhausted { .. } => None,
        }
    }

    /// Consume the error, returning the operation's last error if present.
    pub fn into_source(self) -> Option<E> {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::NonRetryable { source } => {
                Some(source)
            }
            RetryError::BudgetExhausted { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_display_names() {
        assert_eq!(ErrorKind::RateLimit.to_string(), "rate_limit");
        assert_eq!(ErrorKind::Authentication.to_string(), "authentication");
        assert_eq!(ErrorKind::Network.to_string(), "network");
    }

    #[test]
    fn test_error_kind_serde_round_trip() {
        let json = serde_json::to_string(&ErrorKind::RateLimit).unwrap();
        assert_eq!(json, "\"rate_limit\"");
        let kind: ErrorKind = serde_json::from_str(&json).unwrap();
        assert_eq!(kind, ErrorKind::RateLimit);
    }

    #[test]
    fn test_default_retryable_excludes_permanent_kinds() {
        let retryable = ErrorKind::default_retryable();
        assert!(retryable.contains(&ErrorKind::Network));
        assert!(retryable.contains(&ErrorKind::Unknown));
        assert!(!retryable.contains(&ErrorKind::Authentication));
        assert!(!retryable.contains(&ErrorKind::Validation));
    }

    #[test]
    fn test_query_error_classification() {
        let err = QueryError::timeout("page load exceeded 30s");
        assert_eq!(err.error_kind(), ErrorKind::Timeout);
        assert_eq!(err.to_string(), "timeout: page load exceeded 30s");
    }

    #[test]
    fn test_retry_error_source_access() {
        let err: RetryError<QueryError> = RetryError::Exhausted {
            attempts: 4,
            source: QueryError::network("connection reset"),
        };
        assert!(err.to_string().contains("4 attempts"));
        assert_eq!(err.into_source().unwrap().kind, ErrorKind::Network);
    }
}
