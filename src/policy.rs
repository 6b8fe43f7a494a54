//! Per-destination retry policy: configuration and delay computation
//!
//! A [`RetryPolicy`] is pure data plus a pure `delay` function. It decides
//! which error kinds a destination retries, how many times, and how long to
//! wait between attempts: a base delay per [`BackoffStrategy`], capped at
//! `max_delay`, then randomized per [`JitterKind`] to avoid synchronized
//! retries across independent callers.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES,
    MAX_BACKOFF_EXPONENT,
};
use crate::error::{ConfigError, ErrorKind};

/// Backoff strategy for calculating base retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `initial_delay * backoff_multiplier^attempt`
    Exponential,
    /// `initial_delay * (attempt + 1)`
    Linear,
    /// `initial_delay` for every attempt
    Fixed,
    /// Fibonacci-like sequence seeded with `initial_delay, initial_delay`
    Fibonacci,
    /// No delay between attempts
    Immediate,
}

impl FromStr for BackoffStrategy {
    type Err = std::convert::Infallible;

    /// Unknown names fall back to `Fixed` rather than erroring.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "exponential" => BackoffStrategy::Exponential,
            "linear" => BackoffStrategy::Linear,
            "fixed" => BackoffStrategy::Fixed,
            "fibonacci" => BackoffStrategy::Fibonacci,
            "immediate" => BackoffStrategy::Immediate,
            other => {
                warn!(strategy = other, "unknown backoff strategy, falling back to fixed");
                BackoffStrategy::Fixed
            }
        })
    }
}

/// Jitter applied after the base delay is capped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterKind {
    /// Delay unchanged
    None,
    /// `uniform(0, delay)`
    Full,
    /// `delay/2 + uniform(0, delay/2)`
    Equal,
    /// `uniform(0, previous_delay * 3)`, capped at `max_delay`; first retry
    /// uses `uniform(0, delay)`
    Decorrelated,
}

impl FromStr for JitterKind {
    type Err = std::convert::Infallible;

    /// Unknown names fall back to `None` rather than erroring.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "none" => JitterKind::None,
            "full" => JitterKind::Full,
            "equal" => JitterKind::Equal,
            "decorrelated" => JitterKind::Decorrelated,
            other => {
                warn!(jitter = other, "unknown jitter kind, falling back to none");
                JitterKind::None
            }
        })
    }
}

/// Retry policy for one destination
///
/// Immutable once built; the orchestrator replaces the whole policy on
/// administrative update.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    strategy: BackoffStrategy,
    jitter: JitterKind,
    retryable_kinds: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            strategy: BackoffStrategy::Exponential,
            jitter: JitterKind::Equal,
            retryable_kinds: ErrorKind::default_retryable(),
        }
    }
}

impl RetryPolicy {
    /// Create a configuration builder.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// The safe default handed to destinations that were never configured.
    pub fn conservative() -> Self {
        Self::default()
    }

    /// Fast, short retries for destinations that recover quickly.
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            strategy: BackoffStrategy::Exponential,
            jitter: JitterKind::Full,
            ..Self::default()
        }
    }

    /// Long fixed waits for destinations that throttle hard.
    pub fn rate_limited() -> Self {
        Self {
            max_retries: 6,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(120),
            backoff_multiplier: 1.0,
            strategy: BackoffStrategy::Fixed,
            jitter: JitterKind::Equal,
            retryable_kinds: [ErrorKind::RateLimit, ErrorKind::Network, ErrorKind::Timeout]
                .into_iter()
                .collect(),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn strategy(&self) -> BackoffStrategy {
        self.strategy
    }

    pub fn jitter(&self) -> JitterKind {
        self.jitter
    }

    /// Membership test against the policy's retryable kinds.
    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable_kinds.contains(&kind)
    }

    /// Compute the delay before retry `attempt` (0-based: the first retry is
    /// attempt 0). `previous` is the delay applied before the prior retry and
    /// only feeds the decorrelated jitter sequence.
    pub fn delay(&self, attempt: u32, previous: Option<Duration>) -> Duration {
        let capped = self.base_delay(attempt).min(self.max_delay);
        self.apply_jitter(capped, previous)
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;

        let millis = match self.strategy {
            BackoffStrategy::Immediate => 0,
            BackoffStrategy::Fixed => initial,
            BackoffStrategy::Linear => initial.saturating_mul(u64::from(attempt) + 1),
            BackoffStrategy::Exponential => {
                let exponent = attempt.min(MAX_BACKOFF_EXPONENT);
                let factor = self.backoff_multiplier.powi(exponent as i32);
                let scaled = initial as f64 * factor;
                if scaled >= u64::MAX as f64 {
                    u64::MAX
                } else {
                    scaled as u64
                }
            }
            BackoffStrategy::Fibonacci => {
                let (mut current, mut next) = (initial, initial);
                for _ in 0..attempt {
                    let sum = current.saturating_add(next);
                    current = next;
                    next = sum;
                    if current >= max {
                        break;
                    }
                }
                current
            }
        };

        Duration::from_millis(millis)
    }

    fn apply_jitter(&self, delay: Duration, previous: Option<Duration>) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let mut rng = rand::thread_rng();

        match self.jitter {
            JitterKind::None => delay,
            JitterKind::Full => Duration::from_millis(rng.gen_range(0..=delay_ms)),
            JitterKind::Equal => {
                let half = delay_ms / 2;
                Duration::from_millis(half + rng.gen_range(0..=half))
            }
            JitterKind::Decorrelated => match previous {
                None => Duration::from_millis(rng.gen_range(0..=delay_ms)),
                Some(prev) => {
                    let upper = (prev.as_millis() as u64).saturating_mul(3);
                    Duration::from_millis(rng.gen_range(0..=upper)).min(self.max_delay)
                }
            },
        }
    }
}

/// Builder for [`RetryPolicy`] with validation
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self { policy: RetryPolicy::default() }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.policy.max_retries = retries;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.policy.backoff_multiplier = multiplier;
        self
    }

    pub fn strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.policy.strategy = strategy;
        self
    }

    pub fn jitter(mut self, jitter: JitterKind) -> Self {
        self.policy.jitter = jitter;
        self
    }

    /// Replace the retryable set.
    pub fn retryable_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.policy.retryable_kinds = kinds.into_iter().collect();
        self
    }

    /// Add a single kind to the retryable set.
    pub fn retry_on(mut self, kind: ErrorKind) -> Self {
        self.policy.retryable_kinds.insert(kind);
        self
    }

    /// Validate and build. An `initial_delay` above `max_delay` is not an
    /// error; it is capped.
    pub fn build(mut self) -> Result<RetryPolicy, ConfigError> {
        if self.policy.backoff_multiplier < 1.0 {
            return Err(ConfigError::new(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.policy.backoff_multiplier
            )));
        }
        if self.policy.max_delay.is_zero() && !self.policy.initial_delay.is_zero() {
            return Err(ConfigError::new("max_delay must be greater than zero"));
        }
        self.policy.initial_delay = self.policy.initial_delay.min(self.policy.max_delay);
        Ok(self.policy)
    }
}
