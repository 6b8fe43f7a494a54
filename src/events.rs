//! Typed observation records emitted by the orchestrator
//!
//! The engine never talks to a logging transport directly; it publishes
//! [`RetryEvent`]s on a broadcast channel that logging and alerting
//! collaborators subscribe to.

use std::time::Duration;

use crate::error::ErrorKind;

/// One observation of retry activity
#[derive(Debug, Clone, PartialEq)]
pub enum RetryEvent {
    /// A retry was scheduled: the operation failed and will re-attempt after
    /// `delay`.
    Retry {
        destination: String,
        /// 1-based attempt number that just failed.
        attempt: u32,
        delay: Duration,
        error_kind: ErrorKind,
        error: String,
    },
    /// A call succeeded after at least one retry.
    RetrySuccess { destination: String, attempts: u32, total_delay: Duration },
    /// A call gave up: retries exhausted or the error was not retryable.
    RetryFailed { destination: String, attempts: u32, error_kind: ErrorKind, error: String },
}

impl RetryEvent {
    pub fn destination(&self) -> &str {
        match self {
            RetryEvent::Retry { destination, .. }
            | RetryEvent::RetrySuccess { destination, .. }
            | RetryEvent::RetryFailed { destination, .. } => destination,
        }
    }
}
