//! Configuration for the reconciler and the integrity auditor.

use std::time::Duration;

/// Configuration for a reconciler.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound on concurrently uploading entities. Defaults to 1 to
    /// respect remote rate limits; same-entity ordering holds regardless.
    pub worker_concurrency: usize,
    /// Page size for pull requests.
    pub pull_batch_size: u32,
    /// Deadline for each remote call; an elapsed deadline is treated as
    /// a network failure.
    pub request_timeout: Duration,
    /// Retry behavior for transient failures.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            worker_concurrency: 1,
            pull_batch_size: 100,
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the worker pool size.
    pub fn with_worker_concurrency(mut self, workers: usize) -> Self {
        self.worker_concurrency = workers.max(1);
        self
    }

    /// Sets the pull page size.
    pub fn with_pull_batch_size(mut self, size: u32) -> Self {
        self.pull_batch_size = size;
        self
    }

    /// Sets the per-call deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior on transient failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a retry configuration with the given attempt cap.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }

    /// Creates a configuration that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the delay cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay before the given attempt (0-indexed; the
    /// first attempt has no delay).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Configuration for scheduled integrity audits.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Delay before the startup audit, letting the store finish
    /// initializing.
    pub startup_delay: Duration,
    /// Optional periodic re-audit interval.
    pub interval: Option<Duration>,
}

impl AuditConfig {
    /// Creates the default configuration: one audit two seconds after
    /// startup, no periodic re-runs.
    pub fn new() -> Self {
        Self {
            startup_delay: Duration::from_secs(2),
            interval: None,
        }
    }

    /// Sets the startup delay.
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Enables periodic re-audits.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_worker_concurrency(4)
            .with_pull_batch_size(50)
            .with_request_timeout(Duration::from_secs(10));

        assert_eq!(config.worker_concurrency, 4);
        assert_eq!(config.pull_batch_size, 50);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn concurrency_never_drops_below_one() {
        let config = SyncConfig::new().with_worker_concurrency(0);
        assert_eq!(config.worker_concurrency, 1);
    }

    #[test]
    fn backoff_schedule() {
        let retry = RetryConfig::default();

        assert_eq!(retry.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(retry.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(retry.delay_for_attempt(4), Duration::from_secs(8));
    }

    #[test]
    fn backoff_respects_cap() {
        let retry = RetryConfig::new(20)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(60));

        assert_eq!(retry.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn no_retry_is_single_attempt() {
        assert_eq!(RetryConfig::no_retry().max_attempts, 1);
    }
}
