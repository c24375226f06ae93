//! Keyword expansion through the gateway.

mod common;

use std::time::Duration;

use common::routed;
use keyword_gateway::mocks::MockResponse;
use keyword_gateway::resilience::RetryConfig;
use keyword_gateway::{
    ExpansionRequest, GatewayConfig, GatewayError, KeywordGateway, ProviderKind, ProviderSettings,
};
use tokio_util::sync::CancellationToken;

fn openai_config() -> GatewayConfig {
    GatewayConfig::builder()
        .provider(
            ProviderSettings::new(ProviderKind::OpenAi, "sk-test").base_url("https://llm.test/v1"),
        )
        .retry(RetryConfig {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: 0.0,
        })
        .build()
        .unwrap()
}

fn completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": content}, "finish_reason": "length"}],
        "usage": {"prompt_tokens": 300, "completion_tokens": 4000}
    })
}

#[tokio::test]
async fn test_truncated_fenced_output_yields_complete_items() {
    let content = "```json\n[\n  {\"keyword\": \"k1\", \"intent\": \"informational\"},\n  {\"keyword\": \"k2\", \"relevance_score\": 0.4},\n  {\"keyword\": \"k3\", \"reas";
    let transport = routed(&[("llm.test", MockResponse::json(completion(content)))]);
    let gateway = KeywordGateway::with_transport(openai_config(), transport);

    let outcome = gateway
        .expand(ExpansionRequest::new(["seed"], 10))
        .await
        .unwrap();

    let keywords: Vec<_> = outcome.value.iter().map(|s| s.keyword.as_str()).collect();
    assert_eq!(keywords, vec!["k1", "k2"]);
    assert_eq!(outcome.value[1].relevance_score, Some(0.4));
    assert!(outcome.cost > 0.0);
}

#[tokio::test]
async fn test_cancellation_stops_expansion() {
    let transport = routed(&[(
        "llm.test",
        MockResponse::json(completion("[\"k1\"]")).with_delay(Duration::from_secs(5)),
    )]);
    let gateway = KeywordGateway::with_transport(openai_config(), transport.clone());
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let err = gateway
        .expand_with_cancel(ExpansionRequest::new(["seed"], 10), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Cancelled { .. }));
    assert_eq!(transport.request_count(), 1);
}
