//! Per-provider usage metrics.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Weight of the newest sample in the response-time moving average.
pub const RESPONSE_TIME_ALPHA: f64 = 0.2;

/// Snapshot of a provider's usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageMetrics {
    /// Network attempts that passed admission.
    pub requests: u64,
    /// Attempts that produced a parsed result.
    pub successes: u64,
    /// Attempts that failed after admission.
    pub failures: u64,
    /// Local or upstream rate limit refusals.
    pub rate_limit_hits: u64,
    /// Transitions of the circuit breaker into Open, as counted by the breaker.
    pub circuit_breaker_trips: u64,
    /// Calls served from cache.
    pub cache_hits: u64,
    /// Accumulated cost in USD.
    pub total_cost: f64,
    /// Moving average of response time.
    pub avg_response_time_ms: f64,
    /// Input tokens consumed.
    pub input_tokens: u64,
    /// Output tokens produced.
    pub output_tokens: u64,
}

impl UsageMetrics {
    /// Fraction of attempts that failed, or zero with no attempts.
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_rate(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            0.0
        } else {
            self.failures as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Averages {
    total_cost: f64,
    avg_response_time_ms: Option<f64>,
}

/// Thread-safe usage counters for one provider client.
#[derive(Debug, Default)]
pub struct UsageTracker {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rate_limit_hits: AtomicU64,
    cache_hits: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    averages: Mutex<Averages>,
}

impl UsageTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a network attempt.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a successful attempt and folds in its latency, cost and tokens.
    pub fn record_success(&self, elapsed: Duration, cost: f64, input_tokens: u64, output_tokens: u64) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.input_tokens.fetch_add(input_tokens, Ordering::Relaxed);
        self.output_tokens.fetch_add(output_tokens, Ordering::Relaxed);

        let mut averages = self.averages.lock();
        averages.total_cost += cost.max(0.0);
        Self::fold_response_time(&mut averages, elapsed);
    }

    /// Counts a failed attempt.
    pub fn record_failure(&self, elapsed: Option<Duration>) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if let Some(elapsed) = elapsed {
            Self::fold_response_time(&mut self.averages.lock(), elapsed);
        }
    }

    /// Counts a rate limit refusal.
    pub fn record_rate_limit(&self) {
        self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds in the cost of a billed attempt that still failed.
    pub fn record_cost(&self, cost: f64, input_tokens: u64, output_tokens: u64) {
        self.input_tokens.fetch_add(input_tokens, Ordering::Relaxed);
        self.output_tokens.fetch_add(output_tokens, Ordering::Relaxed);
        self.averages.lock().total_cost += cost.max(0.0);
    }

    /// Counts a cache hit.
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn fold_response_time(averages: &mut Averages, elapsed: Duration) {
        let sample = elapsed.as_secs_f64() * 1000.0;
        averages.avg_response_time_ms = Some(match averages.avg_response_time_ms {
            None => sample,
            Some(avg) => RESPONSE_TIME_ALPHA * sample + (1.0 - RESPONSE_TIME_ALPHA) * avg,
        });
    }

    /// Returns a snapshot.
    pub fn snapshot(&self) -> UsageMetrics {
        let averages = self.averages.lock();
        UsageMetrics {
            requests: self.requests.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            circuit_breaker_trips: 0,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            total_cost: averages.total_cost,
            avg_response_time_ms: averages.avg_response_time_ms.unwrap_or(0.0),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let tracker = UsageTracker::new();
        assert_eq!(tracker.snapshot(), UsageMetrics::default());
        assert!(tracker.snapshot().failure_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn test_first_sample_sets_average() {
        let tracker = UsageTracker::new();
        tracker.record_success(Duration::from_millis(100), 0.01, 10, 20);

        let metrics = tracker.snapshot();
        assert!((metrics.avg_response_time_ms - 100.0).abs() < 1e-9);
        assert_eq!(metrics.input_tokens, 10);
        assert_eq!(metrics.output_tokens, 20);
        assert!((metrics.total_cost - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_moving_average() {
        let tracker = UsageTracker::new();
        tracker.record_success(Duration::from_millis(100), 0.0, 0, 0);
        tracker.record_success(Duration::from_millis(200), 0.0, 0, 0);

        // 0.2 * 200 + 0.8 * 100
        let metrics = tracker.snapshot();
        assert!((metrics.avg_response_time_ms - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_counters() {
        let tracker = UsageTracker::new();
        tracker.record_request();
        tracker.record_request();
        tracker.record_failure(None);
        tracker.record_success(Duration::from_millis(5), 0.5, 0, 0);
        tracker.record_rate_limit();
        tracker.record_cache_hit();

        let metrics = tracker.snapshot();
        assert_eq!(metrics.requests, 2);
        assert_eq!(metrics.failures, 1);
        assert_eq!(metrics.successes, 1);
        assert_eq!(metrics.rate_limit_hits, 1);
        assert_eq!(metrics.cache_hits, 1);
        assert!((metrics.failure_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_billed_failure_adds_cost_without_success() {
        let tracker = UsageTracker::new();
        tracker.record_failure(Some(Duration::from_millis(10)));
        tracker.record_cost(0.002, 100, 400);

        let metrics = tracker.snapshot();
        assert_eq!(metrics.successes, 0);
        assert_eq!(metrics.failures, 1);
        assert_eq!(metrics.output_tokens, 400);
        assert!((metrics.total_cost - 0.002).abs() < 1e-12);
    }
}
