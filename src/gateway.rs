//! Gateway facade.
//!
//! [`KeywordGateway`] builds one resilient client per configured provider and
//! exposes the three operations with cross-provider fallback, plus aggregated
//! health and cost estimates.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cascade::{CascadeResult, KeywordDataSource, ProviderCascade};
use crate::client::{CostEstimate, HealthReport, KeywordExpander, ManagedProvider, Outcome, ProviderClient};
use crate::config::{DataMode, GatewayConfig, Operation, ProviderKind, ProviderSettings};
use crate::errors::{GatewayError, GatewayResult};
use crate::providers::firecrawl::DEFAULT_CONCURRENCY;
use crate::providers::{
    scrape_urls, AnthropicExpander, DataForSeoMetrics, ExpansionRequest, FirecrawlScraper,
    KeywordSuggestion, KeywordsEverywhereMetrics, Locale, OpenAiExpander, ScrapeOutcome,
};
use crate::transport::{HttpTransport, ReqwestTransport};

/// Entry point for keyword research calls.
pub struct KeywordGateway {
    config: GatewayConfig,
    expanders: Vec<Arc<dyn KeywordExpander>>,
    cascade: ProviderCascade,
    scraper: Option<Arc<ProviderClient<FirecrawlScraper>>>,
    managed: Vec<Arc<dyn ManagedProvider>>,
}

impl KeywordGateway {
    /// Builds a gateway over the default HTTP transport.
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new()?);
        Ok(Self::with_transport(config, transport))
    }

    /// Builds a gateway from environment variables.
    pub fn from_env() -> GatewayResult<Self> {
        Self::new(GatewayConfig::from_env()?)
    }

    /// Builds a gateway over `transport`.
    pub fn with_transport(config: GatewayConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let mut expanders: Vec<Arc<dyn KeywordExpander>> = Vec::new();
        let mut cascade = ProviderCascade::new(config.data_mode);
        let mut scraper = None;
        let mut managed: Vec<Arc<dyn ManagedProvider>> = Vec::new();

        let mut settings: Vec<&ProviderSettings> = config.providers.iter().collect();
        settings.sort_by_key(|s| (s.kind.operation().as_str(), s.priority));

        for settings in settings {
            let transport = transport.clone();
            match settings.kind {
                ProviderKind::OpenAi => {
                    let client = Arc::new(ProviderClient::from_settings(
                        OpenAiExpander::from_settings(settings),
                        transport,
                        settings,
                        &config,
                    ));
                    managed.push(client.clone());
                    expanders.push(client);
                }
                ProviderKind::Anthropic => {
                    let client = Arc::new(ProviderClient::from_settings(
                        AnthropicExpander::from_settings(settings),
                        transport,
                        settings,
                        &config,
                    ));
                    managed.push(client.clone());
                    expanders.push(client);
                }
                ProviderKind::DataForSeo => {
                    let client = Arc::new(ProviderClient::from_settings(
                        DataForSeoMetrics::from_settings(settings),
                        transport,
                        settings,
                        &config,
                    ));
                    managed.push(client.clone());
                    cascade = cascade.with_source(client as Arc<dyn KeywordDataSource>);
                }
                ProviderKind::KeywordsEverywhere => {
                    let client = Arc::new(ProviderClient::from_settings(
                        KeywordsEverywhereMetrics::from_settings(settings),
                        transport,
                        settings,
                        &config,
                    ));
                    managed.push(client.clone());
                    cascade = cascade.with_source(client as Arc<dyn KeywordDataSource>);
                }
                ProviderKind::Firecrawl => {
                    if scraper.is_some() {
                        tracing::warn!("Ignoring additional Firecrawl configuration");
                        continue;
                    }
                    let client = Arc::new(ProviderClient::from_settings(
                        FirecrawlScraper::from_settings(settings),
                        transport,
                        settings,
                        &config,
                    ));
                    managed.push(client.clone());
                    scraper = Some(client);
                }
            }
        }

        tracing::info!(
            mode = ?config.data_mode,
            expanders = expanders.len(),
            metrics_sources = ?cascade.source_names(),
            scraper = scraper.is_some(),
            "Keyword gateway ready"
        );

        Self {
            config,
            expanders,
            cascade,
            scraper,
            managed,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Expands seed keywords, falling back across LLM providers.
    pub async fn expand(
        &self,
        request: ExpansionRequest,
    ) -> GatewayResult<Outcome<Vec<KeywordSuggestion>>> {
        self.expand_inner(request, None).await
    }

    /// Expands seed keywords; `cancel` aborts the whole fallback chain.
    pub async fn expand_with_cancel(
        &self,
        request: ExpansionRequest,
        cancel: &CancellationToken,
    ) -> GatewayResult<Outcome<Vec<KeywordSuggestion>>> {
        self.expand_inner(request, Some(cancel)).await
    }

    async fn expand_inner(
        &self,
        request: ExpansionRequest,
        cancel: Option<&CancellationToken>,
    ) -> GatewayResult<Outcome<Vec<KeywordSuggestion>>> {
        if self.expanders.is_empty() {
            return Err(GatewayError::configuration("no LLM provider is configured"));
        }
        request.validate()?;

        let mut attempts = Vec::new();
        for expander in &self.expanders {
            let result = match cancel {
                Some(token) => expander.expand_with_cancel(request.clone(), token).await,
                None => expander.expand(request.clone()).await,
            };
            match result {
                Ok(outcome) => return Ok(outcome),
                Err(error @ (GatewayError::Validation { .. } | GatewayError::Cancelled { .. })) => {
                    return Err(error);
                }
                Err(error) => {
                    tracing::warn!(
                        provider = expander.provider_name(),
                        error = %error,
                        "Expansion failed, trying next provider"
                    );
                    attempts.push((expander.provider_name().to_string(), error.to_string()));
                }
            }
        }

        Err(GatewayError::AllProvidersFailed { attempts })
    }

    /// Looks up keyword metrics through the provider cascade.
    pub async fn keyword_metrics(
        &self,
        keywords: &[String],
        locale: &Locale,
    ) -> GatewayResult<CascadeResult> {
        self.cascade.lookup(keywords, locale).await
    }

    /// Scrapes pages with bounded concurrency.
    pub async fn scrape<I, S>(&self, urls: I) -> GatewayResult<Vec<ScrapeOutcome>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scraper = self
            .scraper
            .as_ref()
            .ok_or_else(|| GatewayError::configuration("no scraping provider is configured"))?;
        Ok(scrape_urls(scraper, urls, DEFAULT_CONCURRENCY).await)
    }

    /// Health of every configured provider.
    pub async fn health(&self) -> Vec<HealthReport> {
        let mut reports = Vec::with_capacity(self.managed.len());
        for provider in &self.managed {
            reports.push(provider.health_check().await);
        }
        reports
    }

    /// Cost estimate from the highest-priority provider for `operation`.
    ///
    /// Metrics lookups in demo mode cost nothing.
    pub fn estimate_cost(&self, operation: Operation, item_count: usize) -> GatewayResult<CostEstimate> {
        if operation == Operation::KeywordMetrics && self.config.data_mode == DataMode::Demo {
            return Ok(CostEstimate {
                operation,
                provider: "demo".to_string(),
                item_count,
                estimated_tokens: 0,
                estimated_dollars: 0.0,
                breakdown: Vec::new(),
            });
        }

        self.managed
            .iter()
            .find(|p| p.operation() == operation)
            .map(|p| p.estimate_cost(item_count))
            .ok_or_else(|| {
                GatewayError::configuration(format!("no provider is configured for {operation}"))
            })
    }
}

impl std::fmt::Debug for KeywordGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordGateway")
            .field("mode", &self.config.data_mode)
            .field(
                "expanders",
                &self.expanders.iter().map(|e| e.provider_name()).collect::<Vec<_>>(),
            )
            .field("cascade", &self.cascade)
            .field("scraper", &self.scraper.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockResponse, MockTransport};
    use crate::resilience::RetryConfig;
    use serde_json::json;
    use std::time::Duration;

    fn quick_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: 0.0,
        }
    }

    fn llm_config() -> GatewayConfig {
        GatewayConfig::builder()
            .provider(
                ProviderSettings::new(ProviderKind::OpenAi, "sk")
                    .base_url("https://openai.test/v1")
                    .priority(0),
            )
            .provider(
                ProviderSettings::new(ProviderKind::Anthropic, "ak")
                    .base_url("https://anthropic.test")
                    .priority(1),
            )
            .retry(quick_retry())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_expand_falls_back_to_second_llm() {
        let transport = Arc::new(MockTransport::new());
        transport.route("openai.test", MockResponse::error(503, "unavailable"));
        transport.route(
            "anthropic.test",
            MockResponse::json(json!({
                "content": [{"type": "text", "text": "[\"seo audit\", \"seo checklist\"]"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 10, "output_tokens": 10}
            })),
        );
        let gateway = KeywordGateway::with_transport(llm_config(), transport.clone());

        let outcome = gateway.expand(ExpansionRequest::new(["seo"], 5)).await.unwrap();
        assert_eq!(outcome.value.len(), 2);
        assert_eq!(transport.request_count_for("openai.test"), 1);
        assert_eq!(transport.request_count_for("anthropic.test"), 1);
    }

    #[tokio::test]
    async fn test_expand_all_failing() {
        let transport = Arc::new(MockTransport::new().set_default_response(MockResponse::error(500, "down")));
        let gateway = KeywordGateway::with_transport(llm_config(), transport);

        let err = gateway.expand(ExpansionRequest::new(["seo"], 5)).await.unwrap_err();
        match err {
            GatewayError::AllProvidersFailed { attempts } => {
                let names: Vec<_> = attempts.iter().map(|(p, _)| p.as_str()).collect();
                assert_eq!(names, vec!["openai", "anthropic"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_expansion_is_not_retried_elsewhere() {
        let transport = Arc::new(MockTransport::new());
        let gateway = KeywordGateway::with_transport(llm_config(), transport.clone());

        let err = gateway.expand(ExpansionRequest::new(["seo"], 0)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_providers_are_configuration_errors() {
        let config = GatewayConfig::builder().build().unwrap();
        let gateway = KeywordGateway::with_transport(config, Arc::new(MockTransport::new()));

        assert!(matches!(
            gateway.expand(ExpansionRequest::new(["seo"], 5)).await,
            Err(GatewayError::Configuration { .. })
        ));
        assert!(matches!(
            gateway.scrape(["https://a.test"]).await,
            Err(GatewayError::Configuration { .. })
        ));
        assert!(matches!(
            gateway.keyword_metrics(&["seo".to_string()], &Locale::default()).await,
            Err(GatewayError::Configuration { .. })
        ));
        assert!(gateway.estimate_cost(Operation::ContentScrape, 3).is_err());
    }

    #[tokio::test]
    async fn test_health_lists_every_provider() {
        let gateway = KeywordGateway::with_transport(llm_config(), Arc::new(MockTransport::new()));
        let reports = gateway.health().await;

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.healthy));
    }

    #[test]
    fn test_estimate_cost_uses_first_provider() {
        let gateway = KeywordGateway::with_transport(llm_config(), Arc::new(MockTransport::new()));
        let estimate = gateway.estimate_cost(Operation::KeywordExpansion, 50).unwrap();

        assert_eq!(estimate.provider, "openai");
        assert!(estimate.estimated_tokens > 0);
        assert!(estimate.estimated_dollars > 0.0);
    }

    #[test]
    fn test_demo_metrics_estimate_is_free() {
        let config = GatewayConfig::builder().data_mode(DataMode::Demo).build().unwrap();
        let gateway = KeywordGateway::with_transport(config, Arc::new(MockTransport::new()));

        let estimate = gateway.estimate_cost(Operation::KeywordMetrics, 10).unwrap();
        assert_eq!(estimate.estimated_dollars, 0.0);
    }
}
