// Default tunables for the retry engine
use std::time::Duration;

/// Default ceiling on retry attempts (not counting the first try)
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default initial delay before the first retry
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Default cap on any computed delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default multiplier for the exponential strategy
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Maximum exponent for exponential backoff calculation to prevent overflow
pub const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Budget: default retries admitted per sliding minute
pub const DEFAULT_MAX_RETRIES_PER_MINUTE: u32 = 30;

/// Budget: default retries admitted per sliding hour
pub const DEFAULT_MAX_RETRIES_PER_HOUR: u32 = 500;

/// Budget: sliding window spans
pub const MINUTE_WINDOW: Duration = Duration::from_secs(60);
pub const HOUR_WINDOW: Duration = Duration::from_secs(3600);

/// Failed-request queue: default capacity before FIFO eviction
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Statistics: most-recent-N bound on delay and attempt samples
pub const STATS_SAMPLE_CAPACITY: usize = 1024;

/// Event channel: default broadcast capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;
