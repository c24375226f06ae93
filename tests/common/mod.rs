//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use keyword_gateway::mocks::{MockResponse, MockTransport};

/// A transport answering each URL fragment with a fixed response.
pub fn routed(routes: &[(&str, MockResponse)]) -> Arc<MockTransport> {
    let transport = Arc::new(MockTransport::new());
    for (fragment, response) in routes {
        transport.route(fragment, response.clone());
    }
    transport
}

/// A Keywords Everywhere response for the given `(keyword, volume)` pairs.
pub fn ke_response(rows: &[(&str, u64)]) -> serde_json::Value {
    let data: Vec<_> = rows
        .iter()
        .map(|(keyword, volume)| {
            serde_json::json!({
                "keyword": keyword,
                "vol": volume,
                "cpc": {"currency": "$", "value": "1.10"},
                "competition": 0.25,
                "trend": [
                    {"month": "February", "year": 2024, "value": volume},
                    {"month": "January", "year": 2024, "value": volume}
                ]
            })
        })
        .collect();
    serde_json::json!({"data": data})
}
