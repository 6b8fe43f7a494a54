//! Failed-request queue: deferred retry scheduling
//!
//! Operations that exhaust their inline retries while still failing with a
//! retryable kind land here, carrying a type-erased thunk that can re-run the
//! original work out of band. The queue is bounded; insertion beyond capacity
//! evicts the oldest entry regardless of how often it has been retried.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ErrorKind, QueryError};
use crate::time::{Clock, SystemClock};

/// Type-erased re-runnable operation stored with a queue entry
pub type StoredOperation = Arc<dyn Fn() -> BoxFuture<'static, Result<(), QueryError>> + Send + Sync>;

/// One deferred retry
#[derive(Clone)]
pub struct FailedRequest {
    pub id: Uuid,
    pub destination: String,
    pub operation: StoredOperation,
    pub error_kind: ErrorKind,
    pub last_error: String,
    /// Deferred attempts made from this queue; inline attempts before
    /// enqueueing are not counted.
    pub attempts: u32,
    /// Millis since epoch of the most recent attempt.
    pub last_attempt_at: u64,
    /// Millis since epoch of the next eligible retry; `None` means eligible
    /// now.
    pub next_retry_at: Option<u64>,
    pub created_at: u64,
}

impl fmt::Debug for FailedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailedRequest")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("error_kind", &self.error_kind)
            .field("last_error", &self.last_error)
            .field("attempts", &self.attempts)
            .field("next_retry_at", &self.next_retry_at)
            .finish_non_exhaustive()
    }
}

/// Aggregate view of the queue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedQueueStats {
    pub total: usize,
    pub ready: usize,
    pub by_error_kind: HashMap<ErrorKind, usize>,
    pub by_destination: HashMap<String, usize>,
    pub mean_attempts: f64,
}

/// Bounded FIFO of operations awaiting out-of-band retry
pub struct FailedRequestQueue<C: Clock = SystemClock> {
    capacity: usize,
    entries: Mutex<VecDeque<FailedRequest>>,
    clock: Arc<C>,
}

impl FailedRequestQueue<SystemClock> {
    /// Create a queue with the system clock.
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, SystemClock)
    }
}

impl<C: Clock> FailedRequestQueue<C> {
    /// Create a queue with a custom clock (for testing).
    pub fn with_clock(capacity: usize, clock: C) -> Self {
        Self { capacity, entries: Mutex::new(VecDeque::new()), clock: Arc::new(clock) }
    }

    /// Enqueue a failed operation. Evicts the oldest entry when at capacity.
    pub fn add(
        &self,
        destination: impl Into<String>,
        operation: StoredOperation,
        error_kind: ErrorKind,
        last_error: impl Into<String>,
        attempts: u32,
        next_retry_in: Option<Duration>,
    ) -> Uuid {
        let now = self.clock.millis_since_epoch();
        let entry = FailedRequest {
            id: Uuid::new_v4(),
            destination: destination.into(),
            operation,
            error_kind,
            last_error: last_error.into(),
            attempts,
            last_attempt_at: now,
            next_retry_at: next_retry_in.map(|d| now + d.as_millis() as u64),
            created_at: now,
        };
        let id = entry.id;

        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            if let Some(evicted) = entries.pop_front() {
                warn!(
                    id = %evicted.id,
                    destination = evicted.destination,
                    "failed-request queue full, evicting oldest entry"
                );
            }
        }
        debug!(id = %id, destination = entry.destination, "queued failed request for deferred retry");
        entries.push_back(entry);
        id
    }

    /// Entries whose `next_retry_at` is unset or due.
    pub fn ready_for_retry(&self) -> Vec<FailedRequest> {
        let now = self.clock.millis_since_epoch();
        self.entries
            .lock()
            .iter()
            .filter(|e| e.next_retry_at.map_or(true, |at| at <= now))
            .cloned()
            .collect()
    }

    /// Record the outcome of an out-of-band attempt. Success removes the
    /// entry; failure bumps its attempt count and reschedules it `next_delay`
    /// from now (or leaves it immediately eligible when `None`).
    pub fn update_attempt(&self, id: Uuid, success: bool, next_delay: Option<Duration>) {
        let mut entries = self.entries.lock();
        if success {
            entries.retain(|e| e.id != id);
            return;
        }
        let now = self.clock.millis_since_epoch();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
            entry.attempts += 1;
            entry.last_attempt_at = now;
            entry.next_retry_at = next_delay.map(|d| now + d.as_millis() as u64);
        }
    }

    /// Remove an entry outright. Returns whether it existed.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Aggregate counts over the current contents.
    pub fn stats(&self) -> FailedQueueStats {
        let now = self.clock.millis_since_epoch();
        let entries = self.entries.lock();

        let mut by_error_kind: HashMap<ErrorKind, usize> = HashMap::new();
        let mut by_destination: HashMap<String, usize> = HashMap::new();
        let mut ready = 0usize;
        let mut attempt_sum = 0u64;

        for entry in entries.iter() {
            *by_error_kind.entry(entry.error_kind).or_default() += 1;
            *by_destination.entry(entry.destination.clone()).or_default() += 1;
            if entry.next_retry_at.map_or(true, |at| at <= now) {
                ready += 1;
            }
            attempt_sum += u64::from(entry.attempts);
        }

        let total = entries.len();
        FailedQueueStats {
            total,
            ready,
            by_error_kind,
            by_destination,
            mean_attempts: if total == 0 { 0.0 } else { attempt_sum as f64 / total as f64 },
        }
    }
}
