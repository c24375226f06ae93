//! Breaker and timeout behavior against a slow upstream.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::routed;
use keyword_gateway::mocks::{MockResponse, MockTransport};
use keyword_gateway::providers::DataForSeoMetrics;
use keyword_gateway::resilience::{CircuitBreakerConfig, CircuitState, RetryConfig, RetryExecutor};
use keyword_gateway::{GatewayError, Locale, MetricsQuery, ProviderClient};

fn slow_client(transport: Arc<MockTransport>) -> ProviderClient<DataForSeoMetrics> {
    ProviderClient::new(
        DataForSeoMetrics::new("login", "password").with_base_url("https://dfs.test"),
        transport,
    )
    .with_timeout(Duration::from_millis(20))
    .with_retry(RetryExecutor::new(RetryConfig {
        max_attempts: 1,
        ..RetryConfig::default()
    }))
    .with_circuit_breaker(CircuitBreakerConfig {
        failure_threshold: 3,
        recovery_timeout: Duration::from_secs(60),
        ..CircuitBreakerConfig::default()
    })
}

fn slow_upstream() -> Arc<MockTransport> {
    routed(&[(
        "dfs.test",
        MockResponse::json(serde_json::json!({"status_code": 20000, "tasks": []}))
            .with_delay(Duration::from_millis(200)),
    )])
}

#[tokio::test]
async fn test_timeouts_open_circuit_and_stop_network_calls() {
    let transport = slow_upstream();
    let client = slow_client(transport.clone());
    let query = || MetricsQuery::new(["seo"], Locale::default());

    for _ in 0..3 {
        let err = client.execute(query()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { .. }), "got {err:?}");
    }

    let started = Instant::now();
    let err = client.execute(query()).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, GatewayError::CircuitOpen { .. }), "got {err:?}");
    assert!(elapsed < Duration::from_millis(5), "open circuit took {elapsed:?}");
    assert_eq!(transport.request_count(), 3);
    assert_eq!(client.circuit_breaker().state(), CircuitState::Open);

    let usage = client.usage();
    assert_eq!(usage.requests, 3);
    assert_eq!(usage.failures, 3);
    assert_eq!(usage.circuit_breaker_trips, 1);

    let health = client.health_check().await;
    assert!(!health.healthy);
    assert_eq!(health.circuit_state, CircuitState::Open);
}

#[tokio::test]
async fn test_open_circuit_reports_wait() {
    let client = slow_client(slow_upstream());

    for _ in 0..3 {
        let _ = client.execute(MetricsQuery::new(["seo"], Locale::default())).await;
    }

    match client.execute(MetricsQuery::new(["seo"], Locale::default())).await {
        Err(GatewayError::CircuitOpen { retry_after, .. }) => {
            let wait = retry_after.unwrap();
            assert!(wait > Duration::from_secs(50) && wait <= Duration::from_secs(60));
        }
        other => panic!("expected open circuit, got {other:?}"),
    }
}
