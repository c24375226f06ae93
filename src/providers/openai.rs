//! OpenAI chat completions adapter for keyword expansion.

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
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Default model.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const PROVIDER: &str = "openai";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct UsageOnly {
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct TokenUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Keyword expansion through OpenAI chat completions.
#[derive(Debug, Clone)]
pub struct OpenAiExpander {
    auth: AuthScheme,
    base_url: String,
    model: String,
    pricing: CostModel,
}

impl OpenAiExpander {
    /// Creates an expander with the default model.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            auth: AuthScheme::bearer(api_key),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            pricing: CostModel::PerToken {
                input_per_million: 0.15,
                output_per_million: 0.60,
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

impl ProviderAdapter for OpenAiExpander {
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
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: 0.7,
            max_tokens: output_token_budget(request.max_suggestions),
        };

        let mut http = HttpRequest::post_json(format!("{}/chat/completions", self.base_url), &body)?;
        self.auth.apply(&mut http.headers);
        Ok(http)
    }

    fn parse_response(
        &self,
        request: &ExpansionRequest,
        response: &HttpResponse,
    ) -> GatewayResult<Parsed<Vec<KeywordSuggestion>>> {
        let body: ChatResponse = serde_json::from_slice(&response.body)
            .map_err(|e| GatewayError::parse(PROVIDER, e.to_string(), &response.text()))?;

        let usage = body
            .usage
            .map(|u| Usage::tokens(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::parse(PROVIDER, "response has no choices", &response.text()))?;

        if choice.finish_reason.as_deref() == Some("length") {
            tracing::warn!(
                provider = PROVIDER,
                model = %self.model,
                output_tokens = usage.output_tokens,
                "Completion truncated at token limit"
            );
        }

        let content = choice.message.content.unwrap_or_default();
        let items = extract_keyword_items(PROVIDER, &content)?;
        Ok(Parsed::new(suggestions_from_items(&items, request), usage))
    }

    fn cost_model(&self) -> CostModel {
        self.pricing
    }

    fn billed_usage(&self, response: &HttpResponse) -> Option<Usage> {
        let body: UsageOnly = serde_json::from_slice(&response.body).ok()?;
        body.usage.map(|u| Usage::tokens(u.prompt_tokens, u.completion_tokens))
    }

    fn estimate_usage(&self, item_count: usize) -> Usage {
        Usage::tokens(estimate_input_tokens(1), output_token_budget(item_count))
    }
}
