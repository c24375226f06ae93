//! Rate limiter implementation using token bucket algorithm.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

use crate::errors::{GatewayError, RateLimitOrigin};

/// Configuration for a token bucket.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum tokens the bucket holds.
    pub capacity: u32,
    /// Tokens added per refill period. Defaults to `capacity`.
    pub refill_rate: Option<f64>,
    /// Length of one refill period.
    pub refill_period: Duration,
}

impl RateLimiterConfig {
    /// A bucket sized for `rpm` requests per minute.
    pub fn per_minute(rpm: u32) -> Self {
        Self {
            capacity: rpm,
            refill_rate: None,
            refill_period: Duration::from_secs(60),
        }
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

/// Admission control for outbound calls.
///
/// Implementations never wait: a refused admission is returned to the caller,
/// who decides whether to back off. The trait is async so a limiter backed by
/// a shared external store can be swapped in.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Takes `cost` tokens if available.
    async fn try_consume(&self, cost: u32) -> bool;

    /// Whole tokens currently available.
    async fn remaining_tokens(&self) -> u32;

    /// Time until one more token is available; zero when the bucket is full.
    async fn next_refill_in(&self) -> Duration;

    /// Time until `cost` tokens are available.
    async fn time_until_available(&self, cost: u32) -> Duration;
}

/// Builds the error for a refused local admission.
pub fn local_rate_limit(provider: &str, retry_after: Duration) -> GatewayError {
    GatewayError::RateLimit {
        provider: provider.to_string(),
        message: "local request budget exhausted".to_string(),
        retry_after: Some(retry_after),
        origin: RateLimitOrigin::Local,
    }
}

/// Token bucket state.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    refill_period: Duration,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(config: &RateLimiterConfig, now: Instant) -> Self {
        let capacity = f64::from(config.capacity);
        Self {
            capacity,
            tokens: capacity,
            refill_rate: config.refill_rate.unwrap_or(capacity),
            refill_period: config.refill_period,
            last_refill: now,
        }
    }

    fn tokens_per_second(&self) -> f64 {
        let period = self.refill_period.as_secs_f64();
        if period <= 0.0 {
            f64::INFINITY
        } else {
            self.refill_rate / period
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.tokens_per_second()).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self, cost: u32, now: Instant) -> bool {
        self.refill(now);
        let cost = f64::from(cost);
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self, cost: u32, now: Instant) -> Duration {
        self.refill(now);
        let cost = f64::from(cost);
        if self.tokens >= cost {
            return Duration::ZERO;
        }
        let rate = self.tokens_per_second();
        if rate <= 0.0 || cost > self.capacity {
            return Duration::MAX;
        }
        Duration::from_secs_f64((cost - self.tokens) / rate)
    }

    fn next_refill_in(&mut self, now: Instant) -> Duration {
        self.refill(now);
        if self.tokens >= self.capacity {
            return Duration::ZERO;
        }
        let target = (self.tokens.floor() + 1.0).min(self.capacity);
        let rate = self.tokens_per_second();
        if rate <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64((target - self.tokens) / rate)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn remaining(&mut self, now: Instant) -> u32 {
        self.refill(now);
        self.tokens.floor().max(0.0) as u32
    }
}

/// In-memory token bucket limiter.
pub struct TokenBucketLimiter {
    bucket: Mutex<TokenBucket>,
}

impl TokenBucketLimiter {
    /// Creates a full bucket.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(&config, Instant::now())),
        }
    }

    /// Bucket allowing `rpm` requests per minute.
    pub fn per_minute(rpm: u32) -> Self {
        Self::new(RateLimiterConfig::per_minute(rpm))
    }

    pub(crate) fn try_consume_at(&self, cost: u32, now: Instant) -> bool {
        self.bucket.lock().try_consume(cost, now)
    }

    pub(crate) fn remaining_at(&self, now: Instant) -> u32 {
        self.bucket.lock().remaining(now)
    }

    pub(crate) fn next_refill_in_at(&self, now: Instant) -> Duration {
        self.bucket.lock().next_refill_in(now)
    }

    pub(crate) fn time_until_available_at(&self, cost: u32, now: Instant) -> Duration {
        self.bucket.lock().time_until_available(cost, now)
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn try_consume(&self, cost: u32) -> bool {
        self.try_consume_at(cost, Instant::now())
    }

    async fn remaining_tokens(&self) -> u32 {
        self.remaining_at(Instant::now())
    }

    async fn next_refill_in(&self) -> Duration {
        self.next_refill_in_at(Instant::now())
    }

    async fn time_until_available(&self, cost: u32) -> Duration {
        self.time_until_available_at(cost, Instant::now())
    }
}
