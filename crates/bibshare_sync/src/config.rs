//! Per-session tunables.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for reconnection behavior.
///
/// Delays grow exponentially and are capped; the attempt budget is
/// always bounded — a synchronizer that cannot reconnect within the
/// budget closes instead of retrying forever.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of reconnection attempts.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a configuration with the given attempt budget.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    /// A configuration that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// The delay before a given attempt (1-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.initial_delay.min(self.max_delay);
        }
        let delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Options for one shared session.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// How often the remote change log is polled.
    pub poll_interval: Duration,
    /// Maximum number of changes fetched per poll.
    pub poll_batch_size: u32,
    /// Deadline applied to every remote operation.
    pub request_timeout: Duration,
    /// Reconnection behavior after a transient failure.
    pub retry: RetryConfig,
    /// Path of the local mirror written at session open, if requested.
    pub autosave: Option<PathBuf>,
}

impl SyncOptions {
    /// Creates options with the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            poll_batch_size: 100,
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            autosave: None,
        }
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the poll batch size.
    #[must_use]
    pub fn with_poll_batch_size(mut self, size: u32) -> Self {
        self.poll_batch_size = size;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Requests an autosave mirror at the given path.
    #[must_use]
    pub fn with_autosave(mut self, path: impl Into<PathBuf>) -> Self {
        self.autosave = Some(path.into());
        self
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::new()
    }
}
