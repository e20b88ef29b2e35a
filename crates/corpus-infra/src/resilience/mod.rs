//! Resilience patterns for outbound provider calls
//!
//! Combines a per-dependency circuit breaker with bounded retry/backoff and
//! a per-call timeout.

pub mod circuit_breaker;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{ExponentialBackoff, RetryConfig, RetryPolicy};
pub use timeout::{with_timeout, TimeoutError};

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use corpus_core::{CorpusError, DependencySettings, Result};

/// Wraps every call to one external dependency.
///
/// Gate order per attempt: circuit breaker first, then the call under a
/// timeout; success and failure both feed back into the breaker. Retries are
/// bounded and only happen for retryable failures.
#[derive(Clone)]
pub struct DependencyGuard {
    name: String,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl DependencyGuard {
    pub fn new(name: &str, settings: &DependencySettings) -> Self {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::new(name)
                .with_failure_threshold(settings.failure_threshold)
                .with_open_timeout(settings.open_timeout())
                .with_half_open_max_calls(settings.half_open_max_calls),
        );
        let retry = RetryPolicy::new(
            RetryConfig::new(settings.max_retries)
                .with_base_delay(settings.base_delay())
                .with_max_delay(settings.max_delay()),
        );
        Self {
            name: name.to_string(),
            breaker,
            retry,
            call_timeout: settings.call_timeout(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Execute an operation under this guard.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let mut attempt: u32 = 0;

        loop {
            if !self.breaker.can_attempt() {
                return Err(CorpusError::provider_fatal(
                    &self.name,
                    format!("circuit open, rejecting '{}'", operation_name),
                ));
            }

            let outcome = match with_timeout(self.call_timeout, operation_name, &operation).await {
                Ok(result) => result,
                Err(timeout) => Err(CorpusError::provider(&self.name, timeout.to_string())),
            };

            match outcome {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(e) => {
                    self.breaker.record_failure();

                    if e.is_retryable() && self.retry.should_retry(attempt + 1) {
                        attempt += 1;
                        let delay = self.retry.delay_for_attempt(attempt);
                        debug!(
                            dependency = %self.name,
                            operation = operation_name,
                            attempt = attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Retrying after failure"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    warn!(
                        dependency = %self.name,
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %e,
                        "Dependency call failed"
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn settings(max_retries: u32, failure_threshold: u32) -> DependencySettings {
        DependencySettings {
            failure_threshold,
            open_timeout_secs: 30,
            half_open_max_calls: 2,
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 5,
            call_timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let guard = DependencyGuard::new("embedding", &settings(3, 5));
        let result = guard.execute("embed", || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let guard = DependencyGuard::new("embedding", &settings(3, 10));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();

        let result = guard
            .execute("embed", move || {
                let calls = calls_ref.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(CorpusError::provider("embedding", "transient"))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let guard = DependencyGuard::new("embedding", &settings(3, 10));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();

        let result: Result<()> = guard
            .execute("embed", move || {
                let calls = calls_ref.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CorpusError::provider_fatal("embedding", "bad request"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_circuit_opens_and_rejects() {
        // threshold 2, one call per execute (no retries)
        let guard = DependencyGuard::new("embedding", &settings(0, 2));

        for _ in 0..2 {
            let _: Result<()> = guard
                .execute("embed", || async {
                    Err(CorpusError::provider("embedding", "down"))
                })
                .await;
        }

        assert_eq!(guard.breaker().state(), CircuitState::Open);

        // Next call is rejected without invoking the operation.
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();
        let result: Result<()> = guard
            .execute("embed", move || {
                let calls = calls_ref.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_a_provider_failure() {
        let mut s = settings(0, 5);
        s.call_timeout_secs = 0; // rounds down to an immediate timeout
        let guard = DependencyGuard::new("vector_store", &s);

        let result: Result<()> = guard
            .execute("insert", || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })
            .await;

        match result {
            Err(CorpusError::Provider { dependency, .. }) => {
                assert_eq!(dependency, "vector_store")
            }
            other => panic!("expected provider error, got {:?}", other.err()),
        }
    }
}
