//! Circuit breaker pattern implementation.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::errors::{GatewayError, GatewayResult};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed - requests are allowed.
    Closed,
    /// Circuit is open - requests are blocked.
    Open,
    /// Circuit is half-open - a single probe is allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        })
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within the monitoring period that open the circuit.
    pub failure_threshold: u32,
    /// Time to wait in Open before allowing a probe.
    pub recovery_timeout: Duration,
    /// Window for counting call outcomes.
    pub monitoring_period: Duration,
    /// Failure rate above which the circuit opens (0.0 to 1.0).
    pub expected_failure_rate: f64,
    /// Calls needed in the window before the failure rate is considered.
    pub minimum_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(60),
            expected_failure_rate: 0.5,
            minimum_calls: 10,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    outcomes: VecDeque<(Instant, bool)>,
    last_transition: Instant,
    probe_in_flight: bool,
    trips: u64,
}

impl BreakerState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some((at, _)) = self.outcomes.front() {
            if now.saturating_duration_since(*at) > window {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    fn counts(&self) -> (u32, u32) {
        let failures = self.outcomes.iter().filter(|(_, ok)| !ok).count();
        let successes = self.outcomes.len() - failures;
        (
            u32::try_from(failures).unwrap_or(u32::MAX),
            u32::try_from(successes).unwrap_or(u32::MAX),
        )
    }
}

/// Per-provider circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a closed circuit breaker for `name`.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                outcomes: VecDeque::new(),
                last_transition: Instant::now(),
                probe_in_flight: false,
                trips: 0,
            }),
        }
    }

    /// Returns the provider this breaker guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current state.
    pub fn state(&self) -> CircuitState {
        self.state_at(Instant::now())
    }

    /// Number of transitions into Open since creation.
    pub fn trips(&self) -> u64 {
        self.inner.lock().trips
    }

    /// `(failures, successes)` recorded in the current window.
    pub fn window_counts(&self) -> (u32, u32) {
        let mut inner = self.inner.lock();
        inner.prune(Instant::now(), self.config.monitoring_period);
        inner.counts()
    }

    /// Returns the time until a probe is allowed, if the circuit is open.
    pub fn time_until_half_open(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        self.remaining_open(&inner, Instant::now())
    }

    /// Asks to make a call.
    ///
    /// The returned guard must be settled with the call's outcome. A guard
    /// dropped without settling counts as a failure.
    pub fn acquire(&self) -> GatewayResult<CallGuard<'_>> {
        self.acquire_at(Instant::now())
    }

    /// Records a successful call. Returns the new state.
    pub fn record_success(&self) -> CircuitState {
        self.record_at(true, false, Instant::now())
    }

    /// Records a failed call. Returns true if this failure opened the circuit.
    pub fn record_failure(&self) -> bool {
        self.record_failure_at(Instant::now())
    }

    pub(crate) fn record_failure_at(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.trips;
        self.record_locked(&mut inner, false, false, now);
        inner.trips > before
    }

    pub(crate) fn state_at(&self, now: Instant) -> CircuitState {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner, now);
        inner.state
    }

    pub(crate) fn acquire_at(&self, now: Instant) -> GatewayResult<CallGuard<'_>> {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner, now);

        match inner.state {
            CircuitState::Closed => Ok(CallGuard::new(self, false)),
            CircuitState::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                tracing::debug!(provider = %self.name, "Circuit half-open, admitting probe");
                Ok(CallGuard::new(self, true))
            }
            CircuitState::HalfOpen => Err(GatewayError::CircuitOpen {
                provider: self.name.clone(),
                retry_after: None,
            }),
            CircuitState::Open => Err(GatewayError::CircuitOpen {
                provider: self.name.clone(),
                retry_after: self.remaining_open(&inner, now),
            }),
        }
    }

    fn record_at(&self, success: bool, probe: bool, now: Instant) -> CircuitState {
        let mut inner = self.inner.lock();
        self.record_locked(&mut inner, success, probe, now);
        inner.state
    }

    fn record_locked(&self, inner: &mut BreakerState, success: bool, probe: bool, now: Instant) {
        self.maybe_half_open(inner, now);

        match inner.state {
            CircuitState::Closed => {
                inner.outcomes.push_back((now, success));
                inner.prune(now, self.config.monitoring_period);
                if !success && self.should_open(inner) {
                    self.transition_to(inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen if probe => {
                inner.probe_in_flight = false;
                let next = if success {
                    CircuitState::Closed
                } else {
                    CircuitState::Open
                };
                self.transition_to(inner, next, now);
            }
            // Late outcomes from calls admitted before the circuit opened.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn release_probe(&self, probe: bool) {
        if probe {
            self.inner.lock().probe_in_flight = false;
        }
    }

    fn should_open(&self, inner: &BreakerState) -> bool {
        let (failures, successes) = inner.counts();
        let calls = failures + successes;
        if failures >= self.config.failure_threshold {
            return true;
        }
        calls >= self.config.minimum_calls
            && calls > 0
            && f64::from(failures) / f64::from(calls) > self.config.expected_failure_rate
    }

    fn maybe_half_open(&self, inner: &mut BreakerState, now: Instant) {
        if inner.state == CircuitState::Open
            && now.saturating_duration_since(inner.last_transition) >= self.config.recovery_timeout
        {
            self.transition_to(inner, CircuitState::HalfOpen, now);
        }
    }

    fn remaining_open(&self, inner: &BreakerState, now: Instant) -> Option<Duration> {
        if inner.state != CircuitState::Open {
            return None;
        }
        let elapsed = now.saturating_duration_since(inner.last_transition);
        Some(self.config.recovery_timeout.saturating_sub(elapsed))
    }

    fn transition_to(&self, inner: &mut BreakerState, next: CircuitState, now: Instant) {
        let previous = inner.state;
        inner.state = next;
        inner.last_transition = now;

        match next {
            CircuitState::Open => {
                inner.trips += 1;
                inner.probe_in_flight = false;
                let (failures, successes) = inner.counts();
                tracing::warn!(
                    provider = %self.name,
                    from = %previous,
                    failures,
                    successes,
                    recovery_timeout_ms = u64::try_from(self.config.recovery_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                tracing::info!(provider = %self.name, "Circuit breaker half-open");
            }
            CircuitState::Closed => {
                inner.outcomes.clear();
                tracing::info!(provider = %self.name, from = %previous, "Circuit breaker closed");
            }
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.inner.lock().state)
            .finish_non_exhaustive()
    }
}

/// Permission to make one call through a circuit breaker.
#[must_use = "a call guard must be settled with success, failure or ignore"]
pub struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> CallGuard<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    /// Whether this guard is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Records a successful call.
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_at(true, self.probe, Instant::now());
    }

    /// Records a failed call. Returns true if this failure opened the circuit.
    pub fn failure(mut self) -> bool {
        self.settled = true;
        let mut inner = self.breaker.inner.lock();
        let before = inner.trips;
        self.breaker
            .record_locked(&mut inner, false, self.probe, Instant::now());
        inner.trips > before
    }

    /// Settles the call without recording an outcome.
    ///
    /// For errors that say nothing about upstream health, such as a rejected
    /// request body.
    pub fn ignore(mut self) {
        self.settled = true;
        self.breaker.release_probe(self.probe);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(provider = %self.breaker.name, "Unsettled call guard, counting as failure");
            self.breaker
                .record_at(false, self.probe, Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_secs(30),
                monitoring_period: Duration::from_secs(60),
                expected_failure_rate: 1.0,
                minimum_calls: 100,
            },
        )
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.trips(), 0);
    }

    #[test]
    fn test_circuit_opens_after_failures() {
        let cb = breaker(3);

        assert!(!cb.record_failure());
        assert!(!cb.record_failure());
        assert_eq!(cb.state(), CircuitState::Closed);

        assert!(cb.record_failure());
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.trips(), 1);
    }

    #[test]
    fn test_circuit_rejects_when_open() {
        let cb = breaker(1);
        cb.record_failure();

        let err = cb.acquire().err().unwrap();
        match err {
            GatewayError::CircuitOpen { retry_after, .. } => {
                let remaining = retry_after.unwrap();
                assert!(remaining <= Duration::from_secs(30));
                assert!(remaining > Duration::from_secs(29));
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }

    #[test]
    fn test_failures_outside_window_are_forgotten() {
        let cb = breaker(2);
        let start = Instant::now();

        assert!(!cb.record_failure_at(start));
        let later = start + Duration::from_secs(61);
        assert!(!cb.record_failure_at(later));
        assert_eq!(cb.state_at(later), CircuitState::Closed);
    }

    #[test]
    fn test_failure_rate_opens_circuit() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 100,
                minimum_calls: 4,
                expected_failure_rate: 0.5,
                ..Default::default()
            },
        );

        cb.record_success();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);

        // 2 of 4 is not above 0.5.
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        // 3 of 5 is.
        assert!(cb.record_failure());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_half_open_after_recovery_timeout() {
        let cb = breaker(1);
        let start = Instant::now();
        cb.acquire_at(start).unwrap().failure();

        assert_eq!(cb.state_at(start + Duration::from_secs(29)), CircuitState::Open);
        assert_eq!(
            cb.state_at(start + Duration::from_secs(31)),
            CircuitState::HalfOpen
        );
    }

    #[test]
    fn test_half_open_admits_single_probe() {
        let cb = breaker(1);
        let start = Instant::now();
        cb.acquire_at(start).unwrap().failure();

        let later = start + Duration::from_secs(31);
        let probe = cb.acquire_at(later).unwrap();
        assert!(probe.is_probe());
        assert!(matches!(
            cb.acquire_at(later),
            Err(GatewayError::CircuitOpen { .. })
        ));

        probe.success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.acquire().is_ok_and(|g| {
            g.ignore();
            true
        }));
    }

    #[test]
    fn test_failed_probe_reopens() {
        let cb = breaker(1);
        let start = Instant::now();
        cb.acquire_at(start).unwrap().failure();

        let later = start + Duration::from_secs(31);
        let probe = cb.acquire_at(later).unwrap();
        assert!(probe.failure());
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.trips(), 2);
    }

    #[test]
    fn test_ignored_probe_frees_slot() {
        let cb = breaker(1);
        let start = Instant::now();
        cb.acquire_at(start).unwrap().failure();

        let later = start + Duration::from_secs(31);
        cb.acquire_at(later).unwrap().ignore();
        let again = cb.acquire_at(later).unwrap();
        assert!(again.is_probe());
        again.success();
    }

    #[test]
    fn test_dropped_guard_counts_as_failure() {
        let cb = breaker(2);
        {
            let _guard = cb.acquire().unwrap();
        }
        {
            let _guard = cb.acquire().unwrap();
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_ignore_records_nothing() {
        let cb = breaker(1);
        cb.acquire().unwrap().ignore();
        assert_eq!(cb.window_counts(), (0, 0));
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
