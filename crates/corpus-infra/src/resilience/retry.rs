//! Retry policies
//!
//! Bounded retry with exponential backoff and symmetric jitter.

use rand::Rng;
use std::time::Duration;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (0 means no retries)
    pub max_retries: u32,
    /// Base delay before the first retry
    pub base_delay: Duration,
    /// Cap on the computed delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Whether to add random jitter
    pub jitter: bool,
    /// Jitter factor (0.0 to 1.0); 0.5 gives the ±50% band
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            jitter_factor: 0.5,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// No retries, for non-idempotent operations.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }
}

/// Retry policy implementation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn exponential(max_retries: u32) -> Self {
        Self::new(RetryConfig::new(max_retries))
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay for a specific attempt (1-indexed):
    /// `min(base * multiplier^(attempt-1), max)`, jittered.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self
            .config
            .base_delay
            .mul_f64(self.config.multiplier.powi((attempt - 1) as i32));

        let delay = base_delay.min(self.config.max_delay);

        if self.config.jitter {
            self.add_jitter(delay)
        } else {
            delay
        }
    }

    fn add_jitter(&self, delay: Duration) -> Duration {
        if delay.is_zero() {
            return delay;
        }
        let mut rng = rand::thread_rng();
        let jitter_range = delay.mul_f64(self.config.jitter_factor);
        let jitter = rng.gen_range(Duration::ZERO..=jitter_range);

        if rng.gen_bool(0.5) {
            delay + jitter
        } else {
            delay.saturating_sub(jitter)
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.config.max_retries
    }
}

/// Iterator over backoff delays; yields `None` once retries are exhausted.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    policy: RetryPolicy,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(max_retries: u32) -> Self {
        Self {
            policy: RetryPolicy::exponential(max_retries),
            current_attempt: 0,
        }
    }

    pub fn with_config(config: RetryConfig) -> Self {
        Self {
            policy: RetryPolicy::new(config),
            current_attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        self.current_attempt += 1;
        if self.policy.should_retry(self.current_attempt) {
            Some(self.policy.delay_for_attempt(self.current_attempt))
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_delay()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay, Duration::from_millis(100));
        assert!(config.jitter);
        assert!((config.jitter_factor - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::new(RetryConfig {
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: false,
            ..Default::default()
        });

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = RetryPolicy::new(RetryConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 10.0,
            jitter: false,
            ..Default::default()
        });

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::new(RetryConfig {
            base_delay: Duration::from_secs(1),
            multiplier: 1.0,
            jitter: true,
            jitter_factor: 0.5,
            ..Default::default()
        });

        for _ in 0..200 {
            let delay = policy.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_backoff_iterator_exhausts() {
        let mut backoff = ExponentialBackoff::with_config(RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: false,
            ..Default::default()
        });

        assert_eq!(backoff.next(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(400)));
        assert_eq!(backoff.next(), None);
    }

    #[test]
    fn test_should_retry_bounds() {
        let policy = RetryPolicy::exponential(3);
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }
}
