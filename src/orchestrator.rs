//! Retry orchestration: the coordinator over policy, budget, queue, and stats
//!
//! [`RetryOrchestrator`] owns one policy registry, one global budget, one
//! failed-request queue, and one statistics aggregator. Callers hand it an
//! opaque fallible operation plus a destination name; it decides whether,
//! when, and how often to re-attempt, and publishes every outcome as a
//! [`RetryEvent`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::budget::{BudgetStatus, RetryBudget};
use crate::constants::{
    DEFAULT_EVENT_CAPACITY, DEFAULT_MAX_RETRIES_PER_HOUR, DEFAULT_MAX_RETRIES_PER_MINUTE,
    DEFAULT_QUEUE_CAPACITY,
};
use crate::error::{ConfigError, ErrorClassification, ErrorKind, QueryError, RetryError};
use crate::events::RetryEvent;
use crate::policy::RetryPolicy;
use crate::queue::{FailedQueueStats, FailedRequestQueue, StoredOperation};
use crate::stats::{RetryStatistics, StatisticsSummary};
use crate::time::{Clock, SystemClock};

/// Orchestrator-wide configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_retries_per_minute: u32,
    pub max_retries_per_hour: u32,
    pub queue_capacity: usize,
    pub event_capacity: usize,
    /// Policy handed to destinations that were never configured.
    pub default_policy: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries_per_minute: DEFAULT_MAX_RETRIES_PER_MINUTE,
            max_retries_per_hour: DEFAULT_MAX_RETRIES_PER_HOUR,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            default_policy: RetryPolicy::conservative(),
        }
    }
}

impl OrchestratorConfig {
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::new("queue_capacity must be greater than 0"));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::new("event_capacity must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`OrchestratorConfig`]
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_retries_per_minute(mut self, max: u32) -> Self {
        self.config.max_retries_per_minute = max;
        self
    }

    pub fn max_retries_per_hour(mut self, max: u32) -> Self {
        self.config.max_retries_per_hour = max;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn default_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.default_policy = policy;
        self
    }

    pub fn build(self) -> Result<OrchestratorConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Inputs to the side-effect-free [`RetryOrchestrator::should_retry`] oracle
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub destination: String,
    /// 0-based retry index the caller is about to spend.
    pub attempt: u32,
    /// Delay applied before the previous retry, for decorrelated jitter.
    pub previous_delay: Option<Duration>,
}

/// Why a retry was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    MaxRetriesExceeded,
    ErrorNotRetryable,
    BudgetExceeded,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DenyReason::MaxRetriesExceeded => "max_retries_exceeded",
            DenyReason::ErrorNotRetryable => "error_not_retryable",
            DenyReason::BudgetExceeded => "budget_exceeded",
        };
        f.write_str(name)
    }
}

/// Decision record returned by [`RetryOrchestrator::should_retry`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Option<Duration>,
    pub reason: Option<DenyReason>,
}

impl RetryDecision {
    fn retry(delay: Duration) -> Self {
        Self { should_retry: true, delay: Some(delay), reason: None }
    }

    fn deny(reason: DenyReason) -> Self {
        Self { should_retry: false, delay: None, reason: Some(reason) }
    }
}

/// Outcome of one failed-queue drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Coordinator for retry policy, budget, deferred queue, and statistics
pub struct RetryOrchestrator<C: Clock = SystemClock> {
    policies: DashMap<String, Arc<RetryPolicy>>,
    default_policy: RetryPolicy,
    budget: RetryBudget<C>,
    queue: FailedRequestQueue<C>,
    stats: RetryStatistics,
    events: broadcast::Sender<RetryEvent>,
}

impl RetryOrchestrator<SystemClock> {
    /// Create an orchestrator with the system clock.
    pub fn new(config: OrchestratorConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, SystemClock)
    }

    /// Create an orchestrator with default configuration.
    pub fn with_defaults() -> Self {
        // Default config always passes validation.
        Self::new(OrchestratorConfig::default()).unwrap_or_else(|_| unreachable!())
    }
}

impl<C: Clock + Clone> RetryOrchestrator<C> {
    /// Create an orchestrator with a custom clock (for testing).
    pub fn with_clock(config: OrchestratorConfig, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        Ok(Self {
            policies: DashMap::new(),
            default_policy: config.default_policy,
            budget: RetryBudget::with_clock(
                config.max_retries_per_minute,
                config.max_retries_per_hour,
                clock.clone(),
            ),
            queue: FailedRequestQueue::with_clock(config.queue_capacity, clock),
            stats: RetryStatistics::new(),
            events,
        })
    }
}

impl<C: Clock> RetryOrchestrator<C> {
    /// Run `operation` against `destination`, retrying per the destination's
    /// policy under the global budget.
    ///
    /// The first attempt is free. On failure the error's kind is consulted:
    /// non-retryable kinds fail immediately; retryable kinds re-attempt after
    /// a computed backoff until the policy's ceiling, at which point the
    /// operation is queued for deferred retry and the last error is returned.
    /// Budget exhaustion raises [`RetryError::BudgetExhausted`] without
    /// waiting.
    pub async fn execute_with_retry<F, Fut, T, E>(
        &self,
        destination: &str,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: ErrorClassification + fmt::Display + Send + Sync + 'static,
    {
        let policy = self.get_policy(destination);
        let operation = Arc::new(operation);

        let mut attempt: u32 = 0;
        let mut previous_delay: Option<Duration> = None;
        let mut total_delay = Duration::ZERO;
        let mut last_kind: Option<ErrorKind> = None;

        loop {
            match (*operation)().await {
                Ok(value) => {
                    if attempt > 0 {
                        self.stats.record(
                            destination,
                            last_kind,
                            attempt,
                            previous_delay.unwrap_or_default(),
                            true,
                        );
                        debug!(
                            destination,
                            attempts = attempt + 1,
                            total_delay = ?total_delay,
                            "operation succeeded after retries"
                        );
                        self.emit(RetryEvent::RetrySuccess {
                            destination: destination.to_owned(),
                            attempts: attempt + 1,
                            total_delay,
                        });
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let kind = error.error_kind();

                    if !policy.is_retryable(kind) {
                        debug!(
                            destination,
                            error_kind = %kind,
                            error = %error,
                            "error kind is not retryable"
                        );
                        self.stats.record(destination, Some(kind), attempt, Duration::ZERO, false);
                        self.emit(RetryEvent::RetryFailed {
                            destination: destination.to_owned(),
                            attempts: attempt + 1,
                            error_kind: kind,
                            error: error.to_string(),
                        });
                        return Err(RetryError::NonRetryable { source: error });
                    }

                    if attempt >= policy.max_retries() {
                        warn!(
                            destination,
                            attempts = attempt + 1,
                            error = %error,
                            "retries exhausted, queueing for deferred retry"
                        );
                        self.stats.record(destination, Some(kind), attempt, Duration::ZERO, false);
                        self.emit(RetryEvent::RetryFailed {
                            destination: destination.to_owned(),
                            attempts: attempt + 1,
                            error_kind: kind,
                            error: error.to_string(),
                        });
                        self.enqueue_exhausted(destination, &operation, kind, error.to_string());
                        return Err(RetryError::Exhausted { attempts: attempt + 1, source: error });
                    }

                    if !self.budget.try_consume() {
                        let status = self.budget.status();
                        warn!(
                            destination,
                            minute_count = status.minute_count,
                            hour_count = status.hour_count,
                            "retry budget exhausted, failing without waiting"
                        );
                        self.stats.record(destination, Some(kind), attempt, Duration::ZERO, false);
                        self.emit(RetryEvent::RetryFailed {
                            destination: destination.to_owned(),
                            attempts: attempt + 1,
                            error_kind: kind,
                            error: error.to_string(),
                        });
                        return Err(RetryError::BudgetExhausted { status });
                    }

                    let delay = policy.delay(attempt, previous_delay);
                    self.stats.record(destination, Some(kind), attempt, delay, false);
                    warn!(
                        destination,
                        attempt = attempt + 1,
                        max_retries = policy.max_retries(),
                        delay = ?delay,
                        error = %error,
                        "attempt failed, backing off"
                    );
                    self.emit(RetryEvent::Retry {
                        destination: destination.to_owned(),
                        attempt: attempt + 1,
                        delay,
                        error_kind: kind,
                        error: error.to_string(),
                    });

                    tokio::time::sleep(delay).await;
                    total_delay += delay;
                    previous_delay = Some(delay);
                    last_kind = Some(kind);
                    attempt += 1;
                }
            }
        }
    }

    /// Side-effect-free decision oracle mirroring the `execute_with_retry`
    /// checks, for callers that manage their own loop.
    pub fn should_retry(&self, kind: ErrorKind, ctx: &RetryContext) -> RetryDecision {
        let policy = self.get_policy(&ctx.destination);

        if !policy.is_retryable(kind) {
            return RetryDecision::deny(DenyReason::ErrorNotRetryable);
        }
        if ctx.attempt >= policy.max_retries() {
            return RetryDecision::deny(DenyReason::MaxRetriesExceeded);
        }
        if !self.budget.can_consume() {
            return RetryDecision::deny(DenyReason::BudgetExceeded);
        }
        RetryDecision::retry(policy.delay(ctx.attempt, ctx.previous_delay))
    }

    /// Re-attempt every due entry in the failed-request queue.
    ///
    /// Entries denied by [`RetryOrchestrator::should_retry`] (kind no longer
    /// retryable, deferred attempts over the policy ceiling, or no budget)
    /// are removed and counted failed rather than retried indefinitely.
    pub async fn drain_failed_queue(&self) -> DrainReport {
        let ready = self.queue.ready_for_retry();
        let mut report = DrainReport::default();

        for entry in ready {
            report.processed += 1;

            let ctx = RetryContext {
                destination: entry.destination.clone(),
                attempt: entry.attempts,
                previous_delay: None,
            };
            let decision = self.should_retry(entry.error_kind, &ctx);
            // The decision's budget check is advisory; admission itself goes
            // through try_consume so a concurrent drain or inline caller
            // cannot be granted the same remaining capacity.
            let admitted = decision.should_retry && self.budget.try_consume();
            if !admitted {
                let reason = decision.reason.unwrap_or(DenyReason::BudgetExceeded);
                debug!(
                    id = %entry.id,
                    destination = entry.destination,
                    reason = %reason,
                    "dropping queued request"
                );
                self.queue.remove(entry.id);
                report.failed += 1;
                continue;
            }
            match (entry.operation)().await {
                Ok(()) => {
                    self.queue.update_attempt(entry.id, true, None);
                    self.stats.record(
                        &entry.destination,
                        Some(entry.error_kind),
                        entry.attempts,
                        Duration::ZERO,
                        true,
                    );
                    self.emit(RetryEvent::RetrySuccess {
                        destination: entry.destination.clone(),
                        attempts: entry.attempts + 1,
                        total_delay: Duration::ZERO,
                    });
                    report.successful += 1;
                }
                Err(error) => {
                    let policy = self.get_policy(&entry.destination);
                    let next = policy.delay(entry.attempts, None);
                    debug!(
                        id = %entry.id,
                        destination = entry.destination,
                        next_delay = ?next,
                        error = %error,
                        "deferred retry failed, rescheduling"
                    );
                    self.queue.update_attempt(entry.id, false, Some(next));
                    self.stats.record(
                        &entry.destination,
                        Some(error.kind),
                        entry.attempts,
                        next,
                        false,
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Register or replace the policy for a destination.
    pub fn set_policy(&self, destination: impl Into<String>, policy: RetryPolicy) {
        self.policies.insert(destination.into(), Arc::new(policy));
    }

    /// Look up a destination's policy, lazily creating the configured default
    /// on first reference. Unconfigured destinations never fail; they get
    /// conservative defaults.
    pub fn get_policy(&self, destination: &str) -> Arc<RetryPolicy> {
        if let Some(policy) = self.policies.get(destination) {
            return Arc::clone(&policy);
        }
        let entry = self
            .policies
            .entry(destination.to_owned())
            .or_insert_with(|| {
                debug!(destination, "creating default retry policy");
                Arc::new(self.default_policy.clone())
            });
        Arc::clone(&entry)
    }

    /// Number of registered (or lazily created) policies.
    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }

    /// Subscribe to retry observations.
    pub fn subscribe(&self) -> broadcast::Receiver<RetryEvent> {
        self.events.subscribe()
    }

    pub fn statistics_summary(&self) -> StatisticsSummary {
        self.stats.summary()
    }

    pub fn budget_status(&self) -> BudgetStatus {
        self.budget.status()
    }

    pub fn failed_queue_stats(&self) -> FailedQueueStats {
        self.queue.stats()
    }

    pub fn reset_budget(&self) {
        self.budget.reset()
    }

    pub fn reset_statistics(&self) {
        self.stats.reset()
    }

    fn emit(&self, event: RetryEvent) {
        // Best effort: no subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn enqueue_exhausted<F, Fut, T, E>(
        &self,
        destination: &str,
        operation: &Arc<F>,
        kind: ErrorKind,
        last_error: String,
    ) where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: ErrorClassification + fmt::Display + Send + Sync + 'static,
    {
        let op = Arc::clone(operation);
        let stored: StoredOperation = Arc::new(move || {
            let op = Arc::clone(&op);
            Box::pin(async move {
                (*op)()
                    .await
                    .map(|_| ())
                    .map_err(|e| QueryError::new(e.error_kind(), e.to_string()))
            })
        });
        // Deferred attempts start their own count at zero; the drain loop
        // enforces the policy ceiling against that count.
        self.queue.add(destination, stored, kind, last_error, 0, None);
    }
}

impl<C: Clock + 'static> RetryOrchestrator<C> {
    /// Spawn a background task that drains the failed queue every `interval`.
    /// Abort the returned handle to stop it.
    pub fn spawn_drain_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let report = orchestrator.drain_failed_queue().await;
                if report.processed > 0 {
                    debug!(
                        processed = report.processed,
                        successful = report.successful,
                        failed = report.failed,
                        "drained failed-request queue"
                    );
                }
            }
        })
    }
}
