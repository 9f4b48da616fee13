//! Configuration for sync connections.

use std::time::Duration;

/// Configuration for a sync session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum operations per outbound batch.
    pub batch_ops: usize,
    /// Maximum payload bytes per outbound batch. The batch ends early
    /// once adding another operation would exceed this.
    pub batch_bytes: usize,
    /// Capacity of the live-tail event subscription per connection.
    pub event_buffer: usize,
    /// Whether to accept peers whose user is not already trusted.
    /// When off, an unknown user fails authentication.
    pub auto_register: bool,
    /// Reconnect backoff.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Sets the per-batch operation cap.
    #[must_use]
    pub fn with_batch_ops(mut self, batch_ops: usize) -> Self {
        self.batch_ops = batch_ops;
        self
    }

    /// Sets the per-batch byte budget.
    #[must_use]
    pub fn with_batch_bytes(mut self, batch_bytes: usize) -> Self {
        self.batch_bytes = batch_bytes;
        self
    }

    /// Sets the auto-registration policy.
    #[must_use]
    pub fn with_auto_register(mut self, auto_register: bool) -> Self {
        self.auto_register = auto_register;
        self
    }

    /// Sets the reconnect backoff.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_ops: 300,
            batch_bytes: 1024 * 1024,
            event_buffer: 1024,
            auto_register: false,
            retry: RetryConfig::default(),
        }
    }
}

/// Exponential backoff for reconnect attempts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Ceiling on the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failure.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to each delay.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Backoff suitable for tests: immediate, no jitter.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
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

    /// Sets the delay ceiling.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// The delay before attempt `attempt` (1-indexed; attempt 0 is the
    /// initial connection and waits nothing).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        if self.add_jitter {
            let jitter = capped * 0.25 * rand::random::<f64>();
            Duration::from_secs_f64(capped + jitter)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builders() {
        let config = SyncConfig::default()
            .with_batch_ops(10)
            .with_batch_bytes(4096)
            .with_auto_register(true);
        assert_eq!(config.batch_ops, 10);
        assert_eq!(config.batch_bytes, 4096);
        assert!(config.auto_register);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let retry = RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            add_jitter: false,
        };
        assert_eq!(retry.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(200));
        // 100ms * 2^9 would be 51.2s; the ceiling holds it at 1s.
        assert_eq!(retry.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let retry = RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            add_jitter: true,
        };
        for _ in 0..32 {
            let delay = retry.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(125));
        }
    }
}
