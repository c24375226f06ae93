//! Resilience patterns for provider clients.
//!
//! Provides retry logic, circuit breaker, and rate limiting functionality.

mod circuit_breaker;
mod rate_limiter;
mod retry;

pub use circuit_breaker::{CallGuard, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limiter::{local_rate_limit, RateLimiter, RateLimiterConfig, TokenBucketLimiter};
pub use retry::{RetryConfig, RetryContext, RetryExecutor, RetryObserver, TracingRetryObserver};
