//! Statistics aggregator for attempt outcomes
//!
//! Purely additive: the recorder holds no retry logic and must never panic.
//! Counters run unbounded; the delay and attempt-number samples keep the most
//! recent [`STATS_SAMPLE_CAPACITY`] observations.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::constants::STATS_SAMPLE_CAPACITY;
use crate::error::ErrorKind;

/// `{total, successful, failed}` triple for one breakdown bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
}

impl OutcomeCounts {
    fn record(&mut self, success: bool) {
        self.total = self.total.saturating_add(1);
        if success {
            self.successful = self.successful.saturating_add(1);
        } else {
            self.failed = self.failed.saturating_add(1);
        }
    }
}

/// Serializable snapshot returned by [`RetryStatistics::summary`]
#[derive(Debug, Clone, Serialize)]
pub struct StatisticsSummary {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    /// `successful / total`, 0 when nothing was recorded.
    pub success_rate: f64,
    /// Mean over the bounded delay samples, in milliseconds.
    pub mean_delay_ms: f64,
    /// Mean over the bounded attempt-number samples.
    pub mean_attempts: f64,
    pub by_destination: HashMap<String, OutcomeCounts>,
    pub by_error_kind: HashMap<ErrorKind, OutcomeCounts>,
}

#[derive(Debug, Default)]
struct StatsInner {
    total: u64,
    successful: u64,
    failed: u64,
    by_destination: HashMap<String, OutcomeCounts>,
    by_error_kind: HashMap<ErrorKind, OutcomeCounts>,
    delay_samples: VecDeque<Duration>,
    attempt_samples: VecDeque<u32>,
}

/// Process-wide aggregate of attempt outcomes
#[derive(Debug, Default)]
pub struct RetryStatistics {
    inner: Mutex<StatsInner>,
}

impl RetryStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attempt outcome. `kind` is the error kind observed on
    /// failure, or the last kind a successful call recovered from; `None`
    /// leaves the per-kind breakdown untouched.
    pub fn record(
        &self,
        destination: &str,
        kind: Option<ErrorKind>,
        attempt: u32,
        delay: Duration,
        success: bool,
    ) {
        let mut inner = self.inner.lock();

        inner.total = inner.total.saturating_add(1);
        if success {
            inner.successful = inner.successful.saturating_add(1);
        } else {
            inner.failed = inner.failed.saturating_add(1);
        }

        inner.by_destination.entry(destination.to_owned()).or_default().record(success);
        if let Some(kind) = kind {
            inner.by_error_kind.entry(kind).or_default().record(success);
        }

        if inner.delay_samples.len() >= STATS_SAMPLE_CAPACITY {
            inner.delay_samples.pop_front();
        }
        inner.delay_samples.push_back(delay);

        if inner.attempt_samples.len() >= STATS_SAMPLE_CAPACITY {
            inner.attempt_samples.pop_front();
        }
        inner.attempt_samples.push_back(attempt);
    }

    /// Snapshot of all counters and sample means.
    pub fn summary(&self) -> StatisticsSummary {
        let inner = self.inner.lock();

        let success_rate =
            if inner.total == 0 { 0.0 } else { inner.successful as f64 / inner.total as f64 };
        let mean_delay_ms = if inner.delay_samples.is_empty() {
            0.0
        } else {
            inner.delay_samples.iter().map(|d| d.as_millis() as f64).sum::<f64>()
                / inner.delay_samples.len() as f64
        };
        let mean_attempts = if inner.attempt_samples.is_empty() {
            0.0
        } else {
            inner.attempt_samples.iter().map(|a| f64::from(*a)).sum::<f64>()
                / inner.attempt_samples.len() as f64
        };

        StatisticsSummary {
            total: inner.total,
            successful: inner.successful,
            failed: inner.failed,
            success_rate,
            mean_delay_ms,
            mean_attempts,
            by_destination: inner.by_destination.clone(),
            by_error_kind: inner.by_error_kind.clone(),
        }
    }

    /// Zero every counter and drop all samples.
    pub fn reset(&self) {
        *self.inner.lock() = StatsInner::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_summary() {
        let stats = RetryStatistics::new();
        let summary = stats.summary();

        assert_eq!(summary.total, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.mean_delay_ms, 0.0);
        assert!(summary.by_destination.is_empty());
    }

    #[test]
    fn test_record_updates_totals_and_breakdowns() {
        let stats = RetryStatistics::new();
        stats.record("claude", Some(ErrorKind::Network), 0, Duration::from_millis(100), false);
        stats.record("claude", Some(ErrorKind::Network), 1, Duration::from_millis(200), false);
        stats.record("claude", Some(ErrorKind::Network), 2, Duration::from_millis(200), true);
        stats.record("gemini", Some(ErrorKind::RateLimit), 0, Duration::from_millis(500), false);

        let summary = stats.summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 3);
        assert!((summary.success_rate - 0.25).abs() < f64::EPSILON);

        let claude = summary.by_destination["claude"];
        assert_eq!(claude, OutcomeCounts { total: 3, successful: 1, failed: 2 });

        let network = summary.by_error_kind[&ErrorKind::Network];
        assert_eq!(network, OutcomeCounts { total: 3, successful: 1, failed: 2 });
        assert_eq!(summary.by_error_kind[&ErrorKind::RateLimit].failed, 1);
    }

    #[test]
    fn test_mean_delay_and_attempts() {
        let stats = RetryStatistics::new();
        stats.record("d", None, 0, Duration::from_millis(100), false);
        stats.record("d", None, 2, Duration::from_millis(300), true);

        let summary = stats.summary();
        assert!((summary.mean_delay_ms - 200.0).abs() < f64::EPSILON);
        assert!((summary.mean_attempts - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_samples_bounded_at_capacity() {
        let stats = RetryStatistics::new();
        for i in 0..(STATS_SAMPLE_CAPACITY + 10) {
            stats.record("d", None, i as u32, Duration::from_millis(1), false);
        }

        let inner = stats.inner.lock();
        assert_eq!(inner.delay_samples.len(), STATS_SAMPLE_CAPACITY);
        assert_eq!(inner.attempt_samples.len(), STATS_SAMPLE_CAPACITY);
        // Oldest samples were dropped.
        assert_eq!(*inner.attempt_samples.front().unwrap(), 10);
    }

    #[test]
    fn test_summary_serializes_to_json() {
        let stats = RetryStatistics::new();
        stats.record("claude", Some(ErrorKind::Network), 0, Duration::from_millis(100), false);

        let json = serde_json::to_value(stats.summary()).unwrap();
        assert_eq!(json["total"], 1);
        assert_eq!(json["failed"], 1);
        assert_eq!(json["by_error_kind"]["network"]["failed"], 1);
        assert_eq!(json["by_destination"]["claude"]["total"], 1);
    }

    #[test]
    fn test_reset() {
        let stats = RetryStatistics::new();
        stats.record("d", Some(ErrorKind::Timeout), 0, Duration::from_millis(50), false);
        stats.reset();

        let summary = stats.summary();
        assert_eq!(summary.total, 0);
        assert!(summary.by_error_kind.is_empty());
    }
}
