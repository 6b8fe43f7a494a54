//! Integration tests for the retry orchestrator
//!
//! Exercises the full pipeline: policies, the global budget, the deferred
//! failed-request queue, statistics, and the event stream working together.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use promptrelay_retry::{
    BackoffStrategy, ErrorClassification, ErrorKind, JitterKind, MockClock, OrchestratorConfig,
    QueryError, RetryError, RetryEvent, RetryOrchestrator, RetryPolicy,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("promptrelay_retry=debug").try_init();
}

/// Custom error type for testing the generic operation-error plumbing
#[derive(Debug, Clone)]
struct UpstreamError {
    message: String,
    kind: ErrorKind,
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for UpstreamError {}

impl ErrorClassification for UpstreamError {
    fn error_kind(&self) -> ErrorKind {
        self.kind
    }
}

fn millisecond_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(max_retries)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(10))
        .strategy(BackoffStrategy::Fixed)
        .jitter(JitterKind::None)
        .build()
        .expect("Failed to build policy")
}

/// Validates the undisturbed exponential backoff ladder.
///
/// With a 1s initial delay, 2.0 multiplier, 30s ceiling, and jitter disabled,
/// consecutive retry delays must read 1s, 2s, 4s, 8s, 16s, and then clamp to
/// the 30s ceiling instead of reaching 32s.
#[test]
fn test_exponential_ladder_caps_at_max_delay() {
    let policy = RetryPolicy::builder()
        .max_retries(10)
        .initial_delay(Duration::from_secs(1))
        .max_delay(Duration::from_secs(30))
        .backoff_multiplier(2.0)
        .strategy(BackoffStrategy::Exponential)
        .jitter(JitterKind::None)
        .build()
        .expect("Failed to build policy");

    let expected = [1, 2, 4, 8, 16];
    for (attempt, secs) in expected.iter().enumerate() {
        assert_eq!(policy.delay(attempt as u32, None), Duration::from_secs(*secs));
    }
    assert_eq!(policy.delay(5, None), Duration::from_secs(30));
    assert_eq!(policy.delay(9, None), Duration::from_secs(30));
}

/// Validates the global budget across independent calls.
///
/// # Test Steps
/// 1. Configure a budget of 3 retries per minute
/// 2. Run three flaky operations, each consuming one retry
/// 3. Verify a fourth flaky operation is denied without waiting
/// 4. Advance the mock clock past the minute window
/// 5. Verify capacity is restored
#[tokio::test(flavor = "multi_thread")]
async fn test_budget_spans_calls_and_recovers_with_time() {
    init_tracing();
    let clock = MockClock::new();
    let config = OrchestratorConfig::builder()
        .max_retries_per_minute(3)
        .max_retries_per_hour(100)
        .build()
        .expect("Failed to build config");
    let orch = RetryOrchestrator::with_clock(config, clock.clone()).expect("Failed to build");
    orch.set_policy("claude", millisecond_policy(3));

    let fail_once = || {
        let calls = Arc::new(AtomicU32::new(0));
        move || {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(QueryError::network("transient"))
                } else {
                    Ok(())
                }
            }
        }
    };

    for _ in 0..3 {
        orch.execute_with_retry("claude", fail_once()).await.expect("retry should be admitted");
    }
    assert_eq!(orch.budget_status().minute_count, 3);
    assert_eq!(orch.budget_status().minute_remaining, 0);

    let denied = orch.execute_with_retry("claude", fail_once()).await;
    assert!(matches!(denied, Err(RetryError::BudgetExhausted { .. })));

    clock.advance(Duration::from_secs(61));
    orch.execute_with_retry("claude", fail_once()).await.expect("budget should have recovered");
}

/// Validates bounded queue eviction through the orchestrator.
///
/// With a queue capacity of 2, exhausting three distinct destinations leaves
/// exactly 2 entries and the first one enqueued is gone.
#[tokio::test(flavor = "multi_thread")]
async fn test_failed_queue_evicts_oldest_at_capacity() {
    init_tracing();
    let config = OrchestratorConfig::builder()
        .queue_capacity(2)
        .default_policy(millisecond_policy(0))
        .build()
        .expect("Failed to build config");
    let orch = RetryOrchestrator::new(config).expect("Failed to build");

    for destination in ["alpha", "beta", "gamma"] {
        let result: Result<(), _> = orch
            .execute_with_retry(destination, || async {
                Err(QueryError::timeout("no response"))
            })
            .await;
        assert!(matches!(result, Err(RetryError::Exhausted { .. })));
    }

    let stats = orch.failed_queue_stats();
    assert_eq!(stats.total, 2);
    assert!(!stats.by_destination.contains_key("alpha"));
    assert!(stats.by_destination.contains_key("beta"));
    assert!(stats.by_destination.contains_key("gamma"));
}

/// Validates the full recovery lifecycle with a caller-defined error type.
///
/// # Test Steps
/// 1. Register a fast policy for one destination
/// 2. Fail twice with a retryable kind, succeed on the third attempt
/// 3. Verify the returned value, attempt count, statistics, and events
#[tokio::test(flavor = "multi_thread")]
async fn test_recovery_lifecycle_with_custom_error() {
    init_tracing();
    let orch = RetryOrchestrator::with_defaults();
    orch.set_policy("gemini", millisecond_policy(5));
    let mut events = orch.subscribe();

    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = Arc::clone(&calls);
    let value = orch
        .execute_with_retry("gemini", move || {
            let calls = Arc::clone(&calls_clone);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(UpstreamError {
                        message: "rate limited".to_string(),
                        kind: ErrorKind::RateLimit,
                    })
                } else {
                    Ok("completion")
                }
            }
        })
        .await
        .expect("should recover");

    assert_eq!(value, "completion");
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let summary = orch.statistics_summary();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.successful, 1);
    assert!((summary.success_rate - 1.0 / 3.0).abs() < 1e-9);
    assert_eq!(summary.by_destination["gemini"].failed, 2);
    assert_eq!(summary.by_error_kind[&ErrorKind::RateLimit].successful, 1);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(seen.len(), 3);
    assert!(matches!(seen[0], RetryEvent::Retry { attempt: 1, .. }));
    assert!(matches!(seen[1], RetryEvent::Retry { attempt: 2, .. }));
    assert!(
        matches!(&seen[2], RetryEvent::RetrySuccess { attempts: 3, destination, .. } if destination.as_str() == "gemini")
    );
}

/// Validates that a non-retryable kind bypasses the whole machinery.
#[tokio::test(flavor = "multi_thread")]
async fn test_validation_error_is_not_retried() {
    init_tracing();
    let orch = RetryOrchestrator::with_defaults();
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = Arc::clone(&calls);

    let result: Result<(), _> = orch
        .execute_with_retry("claude", move || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(UpstreamError {
                    message: "prompt too long".to_string(),
                    kind: ErrorKind::Validation,
                })
            }
        })
        .await;

    match result {
        Err(RetryError::NonRetryable { source }) => {
            assert_eq!(source.kind, ErrorKind::Validation)
        }
        other => panic!("expected NonRetryable, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(orch.failed_queue_stats().total == 0);
    assert_eq!(orch.budget_status().minute_count, 0);
}

/// Validates the background drain task end to end.
///
/// # Test Steps
/// 1. Exhaust inline retries for an operation that recovers afterwards
/// 2. Spawn the periodic drain task with a short interval
/// 3. Wait for the deferred attempt to run and succeed
/// 4. Verify the queue empties and the handle can be aborted
#[tokio::test(flavor = "multi_thread")]
async fn test_background_drain_task_recovers_queued_request() {
    init_tracing();
    let orch = Arc::new(RetryOrchestrator::with_defaults());
    orch.set_policy("claude", millisecond_policy(1));

    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = Arc::clone(&calls);
    let result: Result<(), _> = orch
        .execute_with_retry("claude", move || {
            let calls = Arc::clone(&calls_clone);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(QueryError::network("still down"))
                } else {
                    Ok(())
                }
            }
        })
        .await;
    assert!(matches!(result, Err(RetryError::Exhausted { attempts: 2, .. })));
    assert_eq!(orch.failed_queue_stats().total, 1);

    let handle = orch.spawn_drain_task(Duration::from_millis(10));

    let mut drained = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if orch.failed_queue_stats().total == 0 {
            drained = true;
            break;
        }
    }
    handle.abort();

    assert!(drained, "drain task never emptied the queue");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(orch.statistics_summary().successful, 1);
}
