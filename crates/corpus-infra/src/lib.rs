//! Resilience layer for the corpus ingestion core.
//!
//! Every outbound dependency (embedding, LLM, vector store) is wrapped by an
//! independent circuit breaker plus bounded retry with backoff, so one flaky
//! provider cannot hang the whole pipeline.

pub mod resilience;

pub use resilience::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    retry::{ExponentialBackoff, RetryConfig, RetryPolicy},
    timeout::{with_timeout, TimeoutError},
    DependencyGuard,
};
