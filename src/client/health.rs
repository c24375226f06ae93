//! Local health assessment.

use serde::Serialize;
use std::time::Duration;

use crate::config::Operation;
use crate::observability::UsageMetrics;
use crate::resilience::CircuitState;

/// Failure rate above which a provider is reported unhealthy.
const UNHEALTHY_FAILURE_RATE: f64 = 0.5;
/// Attempts needed before the failure rate is judged.
const MIN_CALLS_FOR_RATE: u64 = 10;

/// Health of one provider client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Provider name.
    pub provider: String,
    /// Operation served.
    pub operation: Operation,
    /// True when no issue was found.
    pub healthy: bool,
    /// Human-readable problems.
    pub issues: Vec<String>,
    /// Usage snapshot.
    pub metrics: UsageMetrics,
    /// Circuit breaker state.
    pub circuit_state: CircuitState,
    /// Rate limiter tokens left.
    pub remaining_tokens: u32,
}

impl HealthReport {
    pub(crate) fn assess(
        provider: &str,
        operation: Operation,
        metrics: UsageMetrics,
        circuit_state: CircuitState,
        remaining_tokens: u32,
        timeout: Duration,
    ) -> Self {
        let mut issues = Vec::new();

        match circuit_state {
            CircuitState::Open => issues.push("circuit breaker is open".to_string()),
            CircuitState::HalfOpen => {
                issues.push("circuit breaker is half-open, probing recovery".to_string());
            }
            CircuitState::Closed => {}
        }

        if remaining_tokens == 0 {
            issues.push("rate limit exhausted".to_string());
        }

        let attempts = metrics.successes + metrics.failures;
        let failure_rate = metrics.failure_rate();
        if attempts >= MIN_CALLS_FOR_RATE && failure_rate > UNHEALTHY_FAILURE_RATE {
            issues.push(format!("high failure rate: {:.0}%", failure_rate * 100.0));
        }

        let slow_ms = timeout.as_secs_f64() * 1000.0 / 2.0;
        if metrics.avg_response_time_ms > slow_ms {
            issues.push(format!(
                "slow responses: {:.0} ms average",
                metrics.avg_response_time_ms
            ));
        }

        Self {
            provider: provider.to_string(),
            operation,
            healthy: issues.is_empty(),
            issues,
            metrics,
            circuit_state,
            remaining_tokens,
        }
    }
}
