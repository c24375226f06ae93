//! Anthropic messages adapter for keyword expansion.

use serde::{Deserialize, Serialize};

use super::prompt::{estimate_input_tokens, expansion_prompt, output_token_budget, SYSTEM_PROMPT};
use super::{expansion_fingerprint, suggestions_from_items, ExpansionRequest, KeywordSuggestion};
use crate::auth::AuthScheme;
use crate::cache::RequestFingerprint;
use crate::client::{CostModel, Parsed, ProviderAdapter, Usage};
use crate::config::{Operation, ProviderSettings};
use crate::errors::{GatewayError, GatewayResult};
use crate::extract::extract_keyword_items;
use crate::transport::{HttpRequest, HttpResponse};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
/// Default model.
pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
/// API version header value.
pub const API_VERSION: &str = "2023-06-01";

const PROVIDER: &str = "anthropic";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: [Message<'a>; 1],
    max_tokens: u64,
    temperature: f32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct UsageOnly {
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct TokenUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Keyword expansion through the Anthropic messages API.
#[derive(Debug, Clone)]
pub struct AnthropicExpander {
    auth: AuthScheme,
    base_url: String,
    model: String,
    pricing: CostModel,
}

impl AnthropicExpander {
    /// Creates an expander with the default model.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            auth: AuthScheme::header("x-api-key", api_key),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            pricing: CostModel::PerToken {
                input_per_million: 0.80,
                output_per_million: 4.00,
            },
        }
    }

    /// Creates an expander from provider settings.
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        let mut expander = Self::new(settings.api_key());
        if let Some(base_url) = &settings.base_url {
            expander = expander.with_base_url(base_url.clone());
        }
        if let Some(model) = &settings.model {
            expander = expander.with_model(model.clone());
        }
        expander
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Overrides token pricing.
    pub fn with_pricing(mut self, pricing: CostModel) -> Self {
        self.pricing = pricing;
        self
    }
}

impl ProviderAdapter for AnthropicExpander {
    type Request = ExpansionRequest;
    type Output = Vec<KeywordSuggestion>;

    fn provider(&self) -> &str {
        PROVIDER
    }

    fn operation(&self) -> Operation {
        Operation::KeywordExpansion
    }

    fn validate(&self, request: &ExpansionRequest) -> GatewayResult<()> {
        self.auth
            .validate()
            .map_err(|message| GatewayError::Authentication {
                provider: PROVIDER.to_string(),
                message,
            })?;
        request.validate()
    }

    fn fingerprint(&self, request: &ExpansionRequest) -> RequestFingerprint {
        expansion_fingerprint(PROVIDER, &self.model, request)
    }

    fn build_request(&self, request: &ExpansionRequest) -> GatewayResult<HttpRequest> {
        let prompt = expansion_prompt(request);
        let body = MessagesRequest {
            model: &self.model,
            system: SYSTEM_PROMPT,
            messages: [Message {
                role: "user",
                content: &prompt,
            }],
            max_tokens: output_token_budget(request.max_suggestions),
            temperature: 0.7,
        };

        let mut http = HttpRequest::post_json(format!("{}/v1/messages", self.base_url), &body)?
            .header("anthropic-version", API_VERSION);
        self.auth.apply(&mut http.headers);
        Ok(http)
    }

    fn parse_response(
        &self,
        request: &ExpansionRequest,
        response: &HttpResponse,
    ) -> GatewayResult<Parsed<Vec<KeywordSuggestion>>> {
        let body: MessagesResponse = serde_json::from_slice(&response.body)
            .map_err(|e| GatewayError::parse(PROVIDER, e.to_string(), &response.text()))?;

        let usage = body
            .usage
            .map(|u| Usage::tokens(u.input_tokens, u.output_tokens))
            .unwrap_or_default();

        if body.stop_reason.as_deref() == Some("max_tokens") {
            tracing::warn!(
                provider = PROVIDER,
                model = %self.model,
                output_tokens = usage.output_tokens,
                "Response truncated at max_tokens"
            );
        }

        let text: String = body
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect();

        let items = extract_keyword_items(PROVIDER, &text)?;
        Ok(Parsed::new(suggestions_from_items(&items, request), usage))
    }

    fn cost_model(&self) -> CostModel {
        self.pricing
    }

    fn billed_usage(&self, response: &HttpResponse) -> Option<Usage> {
        let body: UsageOnly = serde_json::from_slice(&response.body).ok()?;
        body.usage.map(|u| Usage::tokens(u.input_tokens, u.output_tokens))
    }

    fn estimate_usage(&self, item_count: usize) -> Usage {
        Usage::tokens(estimate_input_tokens(1), output_token_budget(item_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ProviderClient;
    use crate::mocks::{MockResponse, MockTransport};
    use crate::providers::SearchIntent;
    use serde_json::json;
    use std::sync::Arc;

    fn message(text: &str, stop_reason: &str) -> serde_json::Value {
        json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": text}],
            "stop_reason": stop_reason,
            "usage": {"input_tokens": 200, "output_tokens": 150}
        })
    }

    #[tokio::test]
    async fn test_expand_sends_headers_and_parses_wrapper() {
        let transport = Arc::new(MockTransport::new());
        transport.enqueue_response(MockResponse::json(message(
            "Here you go:\n{\"keywords\": [{\"keyword\": \"trail shoes\", \"intent\": \"transactional\", \"relevance_score\": 92}]}",
            "end_turn",
        )));
        let client = ProviderClient::new(AnthropicExpander::new("ak-test"), transport.clone());

        let outcome = client.execute(ExpansionRequest::new(["running shoes"], 5)).await.unwrap();

        assert_eq!(outcome.value.len(), 1);
        assert_eq!(outcome.value[0].intent, SearchIntent::Transactional);
        assert_eq!(outcome.value[0].relevance_score, Some(0.92));

        let request = transport.last_request().unwrap();
        assert_eq!(request.url, "https://api.anthropic.com/v1/messages");
        assert_eq!(request.header("x-api-key"), Some("ak-test"));
        assert_eq!(request.header("anthropic-version"), Some(API_VERSION));
        assert!(request.header("authorization").is_none());
    }

    #[tokio::test]
    async fn test_max_tokens_stop_still_returns_complete_items() {
        let transport = Arc::new(MockTransport::new());
        transport.enqueue_response(MockResponse::json(message(
            "```json\n[{\"keyword\": \"x\"}, {\"keyword\": \"y\"}, {\"keyw",
            "max_tokens",
        )));
        let client = ProviderClient::new(AnthropicExpander::new("ak-test"), transport);

        let outcome = client.execute(ExpansionRequest::new(["seed"], 5)).await.unwrap();
        assert_eq!(outcome.value.len(), 2);
    }

    #[tokio::test]
    async fn test_unusable_output_is_parse_error() {
        let transport = Arc::new(MockTransport::new());
        transport.enqueue_response(MockResponse::json(message("I cannot help with that.", "end_turn")));
        let client = ProviderClient::new(AnthropicExpander::new("ak-test"), transport);

        let err = client.execute(ExpansionRequest::new(["seed"], 5)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Parse { .. }));
    }
}
