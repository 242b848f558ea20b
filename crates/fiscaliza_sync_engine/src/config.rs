//! Configuration for queueing and replay.

use std::time::Duration;

/// Prefix of ids minted while offline.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Maximum number of remote deletes issued concurrently.
pub const MAX_DELETE_BATCH: usize = 20;

/// Configuration for the replicated store and the replay loop.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Identifies this device in logs.
    pub device_id: String,
    /// Prefix of ids minted while offline.
    pub local_id_prefix: String,
    /// Remote deletes issued concurrently per chunk.
    pub delete_batch_size: usize,
    /// Retry policy of [`crate::SyncEngine::sync_with_retry`].
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration for a device.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            local_id_prefix: LOCAL_ID_PREFIX.to_string(),
            delete_batch_size: MAX_DELETE_BATCH,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the delete chunk size, clamped to `1..=20`.
    #[must_use]
    pub fn with_delete_batch_size(mut self, size: usize) -> Self {
        self.delete_batch_size = size.clamp(1, MAX_DELETE_BATCH);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns true if `id` was minted while offline.
    pub fn is_local_id(&self, id: &str) -> bool {
        id.starts_with(&self.local_id_prefix)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("device")
    }
}

/// Exponential backoff between replay attempts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound of any delay.
    pub max_delay: Duration,
    /// Growth factor between attempts.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% jitter.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a policy with the given number of attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// A policy making a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
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

    /// Disables jitter.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Returns the delay before attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay = base.min(self.max_delay.as_secs_f64());
        if self.add_jitter {
            Duration::from_secs_f64(delay + delay * 0.25 * jitter_fraction())
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// A fraction in `[0, 1)` taken from the clock's sub-second part.
fn jitter_fraction() -> f64 {
    let nanos = chrono::Utc::now().timestamp_subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("tablet-07")
            .with_delete_batch_size(50)
            .with_retry(RetryConfig::no_retry());
        assert_eq!(config.device_id, "tablet-07");
        assert_eq!(config.delete_batch_size, MAX_DELETE_BATCH);
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(SyncConfig::default().with_delete_batch_size(0).delete_batch_size, 1);
    }

    #[test]
    fn local_ids() {
        let config = SyncConfig::default();
        assert!(config.is_local_id("local-8f0c"));
        assert!(!config.is_local_id("8f0c"));
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .without_jitter();
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);
        assert!(config.delay_for_attempt(5) <= Duration::from_millis(6250));
    }
}
