//! Global retry budget: sliding-window admission control
//!
//! One budget is shared by every destination. It bounds the aggregate retry
//! traffic the whole process may generate, so correlated failures across
//! destinations cannot turn into a retry storm. The windows are deliberately
//! global rather than per-destination: the protection target is downstream
//! load, not per-destination fairness.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::constants::{HOUR_WINDOW, MINUTE_WINDOW};
use crate::time::{Clock, SystemClock};

/// Snapshot of the budget's two windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetStatus {
    pub minute_count: u32,
    pub hour_count: u32,
    pub minute_remaining: u32,
    pub hour_remaining: u32,
}

#[derive(Debug, Default)]
struct Windows {
    minute: VecDeque<u64>,
    hour: VecDeque<u64>,
}

impl Windows {
    fn prune(&mut self, now_millis: u64) {
        let minute_floor = now_millis.saturating_sub(MINUTE_WINDOW.as_millis() as u64);
        while self.minute.front().is_some_and(|ts| *ts <= minute_floor) {
            self.minute.pop_front();
        }
        let hour_floor = now_millis.saturating_sub(HOUR_WINDOW.as_millis() as u64);
        while self.hour.front().is_some_and(|ts| *ts <= hour_floor) {
            self.hour.pop_front();
        }
    }
}

/// Sliding-window retry budget shared across all destinations
///
/// Both the 1-minute and 1-hour windows hold timestamps of past consumptions;
/// a retry is admitted only while both windows are under capacity. All
/// check-then-act sequences run under a single lock, so concurrent callers
/// cannot jointly exceed capacity.
#[derive(Debug, Clone)]
pub struct RetryBudget<C: Clock = SystemClock> {
    max_per_minute: u32,
    max_per_hour: u32,
    windows: Arc<Mutex<Windows>>,
    clock: Arc<C>,
}

impl RetryBudget<SystemClock> {
    /// Create a new budget with the system clock.
    pub fn new(max_per_minute: u32, max_per_hour: u32) -> Self {
        Self::with_clock(max_per_minute, max_per_hour, SystemClock)
    }
}

impl<C: Clock> RetryBudget<C> {
    /// Create a new budget with a custom clock (for testing).
    pub fn with_clock(max_per_minute: u32, max_per_hour: u32, clock: C) -> Self {
        Self {
            max_per_minute,
            max_per_hour,
            windows: Arc::new(Mutex::new(Windows::default())),
            clock: Arc::new(clock),
        }
    }

    /// Whether one more retry fits in both windows right now.
    pub fn can_consume(&self) -> bool {
        let now = self.clock.millis_since_epoch();
        let mut windows = self.windows.lock();
        windows.prune(now);
        windows.minute.len() < self.max_per_minute as usize
            && windows.hour.len() < self.max_per_hour as usize
    }

    /// Record one retry against both windows. Call only after a positive
    /// admission check; [`RetryBudget::try_consume`] does both atomically.
    pub fn consume(&self) {
        let now = self.clock.millis_since_epoch();
        let mut windows = self.windows.lock();
        windows.prune(now);
        windows.minute.push_back(now);
        windows.hour.push_back(now);
    }

    /// Check and consume in one critical section. Returns false (consuming
    /// nothing) when either window is at capacity.
    pub fn try_consume(&self) -> bool {
        let now = self.clock.millis_since_epoch();
        let mut windows = self.windows.lock();
        windows.prune(now);
        if windows.minute.len() >= self.max_per_minute as usize
            || windows.hour.len() >= self.max_per_hour as usize
        {
            debug!(
                minute = windows.minute.len(),
                hour = windows.hour.len(),
                "retry budget denied admission"
            );
            return false;
        }
        windows.minute.push_back(now);
        windows.hour.push_back(now);
        true
    }

    /// Current window counts and remaining capacity.
    pub fn status(&self) -> BudgetStatus {
        let now = self.clock.millis_since_epoch();
        let mut windows = self.windows.lock();
        windows.prune(now);
        let minute_count = windows.minute.len() as u32;
        let hour_count = windows.hour.len() as u32;
        BudgetStatus {
            minute_count,
            hour_count,
            minute_remaining: self.max_per_minute.saturating_sub(minute_count),
            hour_remaining: self.max_per_hour.saturating_sub(hour_count),
        }
    }

    /// Clear both windows.
    pub fn reset(&self) {
        let mut windows = self.windows.lock();
        windows.minute.clear();
        windows.hour.clear();
    }
}
