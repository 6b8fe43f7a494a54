//! Retry orchestration for fallible destination calls.
//!
//! This crate coordinates retries across named destinations with:
//! - **Policies**: per-destination backoff strategy, jitter, and retryable
//!   error kinds ([`RetryPolicy`])
//! - **Budget**: a global cap on retries per minute and per hour so a storm of
//!   failures cannot amplify itself ([`RetryBudget`])
//! - **Deferred queue**: operations that exhaust their inline retries are
//!   parked and re-attempted out of band ([`FailedRequestQueue`])
//! - **Statistics and events**: aggregate counters plus a broadcast stream of
//!   retry observations ([`RetryStatistics`], [`RetryEvent`])
//!
//! [`RetryOrchestrator`] ties the four together behind one `async` entry
//! point:
//!
//! ```no_run
//! use promptrelay_retry::{QueryError, RetryOrchestrator};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = RetryOrchestrator::with_defaults();
//! let answer: String = orchestrator
//!     .execute_with_retry("claude", || async {
//!         Err::<String, _>(QueryError::network("connection reset"))
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod budget;
pub mod constants;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod policy;
pub mod queue;
pub mod stats;
pub mod time;

pub use budget::{BudgetStatus, RetryBudget};
pub use error::{ConfigError, ErrorClassification, ErrorKind, QueryError, RetryError};
pub use events::RetryEvent;
pub use orchestrator::{
    DenyReason, DrainReport, OrchestratorConfig, OrchestratorConfigBuilder, RetryContext,
    RetryDecision, RetryOrchestrator,
};
pub use policy::{BackoffStrategy, JitterKind, RetryPolicy, RetryPolicyBuilder};
pub use queue::{FailedQueueStats, FailedRequest, FailedRequestQueue};
pub use stats::{OutcomeCounts, RetryStatistics, StatisticsSummary};
pub use time::{Clock, MockClock, SystemClock};
