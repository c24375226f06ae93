//! Configuration module for the keyword gateway.
//!
//! Provides provider selection, credentials, per-provider cache TTL and rate
//! overrides, resilience settings, and the explicit data-mode flag that
//! separates demo placeholder output from live provider data.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{GatewayError, GatewayResult};
use crate::observability::LoggingConfig;
use crate::resilience::{CircuitBreakerConfig, RetryConfig};

/// Default maximum number of cached responses per provider.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;

/// Whether keyword metrics come from real providers or are demo placeholders.
///
/// This is the only switch that enables placeholder data. A live lookup that
/// comes back partial or empty is never topped up with demo records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataMode {
    /// Query configured providers; missing data is reported as unavailable.
    #[default]
    Live,
    /// Generate deterministic placeholder records without calling providers.
    Demo,
}

impl std::str::FromStr for DataMode {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" | "" => Ok(DataMode::Live),
            "demo" | "mock" => Ok(DataMode::Demo),
            other => Err(GatewayError::configuration(format!(
                "Unknown data mode '{other}' (expected 'live' or 'demo')"
            ))),
        }
    }
}

/// Operation families served by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// LLM keyword expansion.
    KeywordExpansion,
    /// Keyword search metrics lookup.
    KeywordMetrics,
    /// Web page scraping.
    ContentScrape,
}

impl Operation {
    /// Returns the operation label used in fingerprints and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::KeywordExpansion => "keyword_expansion",
            Operation::KeywordMetrics => "keyword_metrics",
            Operation::ContentScrape => "content_scrape",
        }
    }

    /// Default network timeout for one call of this operation.
    pub fn default_timeout(self) -> Duration {
        match self {
            Operation::KeywordExpansion => Duration::from_secs(300),
            Operation::KeywordMetrics => Duration::from_secs(60),
            Operation::ContentScrape => Duration::from_secs(30),
        }
    }

    /// Default cache TTL. Model output is volatile; search volumes move slowly.
    pub fn default_cache_ttl(self) -> Duration {
        match self {
            Operation::KeywordExpansion => Duration::from_secs(12 * 60 * 60),
            Operation::KeywordMetrics => Duration::from_secs(7 * 24 * 60 * 60),
            Operation::ContentScrape => Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported upstream providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// OpenAI chat completions.
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
    /// DataForSEO Labs keyword overview.
    DataForSeo,
    /// Keywords Everywhere keyword data.
    KeywordsEverywhere,
    /// Firecrawl scraping.
    Firecrawl,
}

impl ProviderKind {
    /// Provider name used in records, fingerprints and logs.
    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::DataForSeo => "dataforseo",
            ProviderKind::KeywordsEverywhere => "keywords_everywhere",
            ProviderKind::Firecrawl => "firecrawl",
        }
    }

    /// The operation this provider serves.
    pub fn operation(self) -> Operation {
        match self {
            ProviderKind::OpenAi | ProviderKind::Anthropic => Operation::KeywordExpansion,
            ProviderKind::DataForSeo | ProviderKind::KeywordsEverywhere => {
                Operation::KeywordMetrics
            }
            ProviderKind::Firecrawl => Operation::ContentScrape,
        }
    }

    /// Default requests-per-minute budget for the local token bucket.
    pub fn default_requests_per_minute(self) -> u32 {
        match self {
            ProviderKind::OpenAi => 500,
            ProviderKind::Anthropic => 50,
            ProviderKind::DataForSeo => 600,
            ProviderKind::KeywordsEverywhere => 60,
            ProviderKind::Firecrawl => 20,
        }
    }

    fn env_prefix(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI",
            ProviderKind::Anthropic => "ANTHROPIC",
            ProviderKind::DataForSeo => "DATAFORSEO",
            ProviderKind::KeywordsEverywhere => "KEYWORDS_EVERYWHERE",
            ProviderKind::Firecrawl => "FIRECRAWL",
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "dataforseo" => Ok(ProviderKind::DataForSeo),
            "keywords_everywhere" | "keywordseverywhere" => Ok(ProviderKind::KeywordsEverywhere),
            "firecrawl" => Ok(ProviderKind::Firecrawl),
            other => Err(GatewayError::configuration(format!("Unknown provider '{other}'"))),
        }
    }
}

/// Settings for one configured provider.
#[derive(Clone)]
pub struct ProviderSettings {
    /// Which provider this is.
    pub kind: ProviderKind,
    /// Primary credential (API key, or password for basic auth).
    pub(crate) api_key: SecretString,
    /// Login for providers using HTTP basic auth.
    pub login: Option<String>,
    /// Base URL override.
    pub base_url: Option<String>,
    /// Model override for LLM providers.
    pub model: Option<String>,
    /// Lower runs first within an operation.
    pub priority: u8,
    /// Cache TTL override.
    pub cache_ttl: Option<Duration>,
    /// Local rate budget override.
    pub requests_per_minute: Option<u32>,
    /// Network timeout override.
    pub timeout: Option<Duration>,
}

impl ProviderSettings {
    /// Creates settings for a provider with an API key.
    pub fn new(kind: ProviderKind, api_key: impl Into<String>) -> Self {
        Self {
            kind,
            api_key: SecretString::new(api_key.into()),
            login: None,
            base_url: None,
            model: None,
            priority: 0,
            cache_ttl: None,
            requests_per_minute: None,
            timeout: None,
        }
    }

    /// Sets the basic-auth login.
    pub fn login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }

    /// Sets the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    /// Sets the model.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the priority.
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the cache TTL override.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Sets the requests-per-minute override.
    pub fn requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = Some(rpm);
        self
    }

    /// Sets the timeout override.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the credential.
    pub(crate) fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Effective cache TTL.
    pub fn effective_cache_ttl(&self) -> Duration {
        self.cache_ttl
            .unwrap_or_else(|| self.kind.operation().default_cache_ttl())
    }

    /// Effective network timeout.
    pub fn effective_timeout(&self) -> Duration {
        self.timeout
            .unwrap_or_else(|| self.kind.operation().default_timeout())
    }

    /// Effective requests-per-minute budget.
    pub fn effective_requests_per_minute(&self) -> u32 {
        self.requests_per_minute
            .unwrap_or_else(|| self.kind.default_requests_per_minute())
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("kind", &self.kind)
            .field("api_key", &"[REDACTED]")
            .field("login", &self.login)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("priority", &self.priority)
            .field("cache_ttl", &self.cache_ttl)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Live providers or demo placeholders.
    pub data_mode: DataMode,
    /// Configured providers.
    pub providers: Vec<ProviderSettings>,
    /// Retry settings shared by all clients.
    pub retry: RetryConfig,
    /// Circuit breaker settings shared by all clients.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Maximum cached responses per provider.
    pub cache_max_entries: usize,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::new()
    }

    /// Creates a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `KEYWORD_GATEWAY_MODE`: `live` (default) or `demo`
    /// - `KEYWORD_GATEWAY_LLM_PROVIDER`: `openai` or `anthropic`; when unset
    ///   every LLM provider with a key is configured, OpenAI first
    /// - `KEYWORD_GATEWAY_METRICS_PROVIDERS`: comma-separated priority order,
    ///   default `dataforseo,keywords_everywhere`
    /// - `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `KEYWORDS_EVERYWHERE_API_KEY`,
    ///   `FIRECRAWL_API_KEY`, `DATAFORSEO_LOGIN` + `DATAFORSEO_PASSWORD`
    /// - `<PROVIDER>_MODEL`, `<PROVIDER>_BASE_URL`, `<PROVIDER>_CACHE_TTL_SECS`
    /// - `KEYWORD_GATEWAY_CACHE_MAX_ENTRIES`
    /// - `KEYWORD_GATEWAY_LOG_LEVEL`, `KEYWORD_GATEWAY_LOG_FORMAT`
    pub fn from_env() -> GatewayResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> GatewayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut builder = GatewayConfigBuilder::new();

        if let Some(mode) = var("KEYWORD_GATEWAY_MODE") {
            builder = builder.data_mode(mode.parse()?);
        }

        let llm_order: Vec<ProviderKind> = match var("KEYWORD_GATEWAY_LLM_PROVIDER") {
            Some(selected) => vec![selected.parse()?],
            None => vec![ProviderKind::OpenAi, ProviderKind::Anthropic],
        };
        let metrics_order: Vec<ProviderKind> = match var("KEYWORD_GATEWAY_METRICS_PROVIDERS") {
            Some(list) => list
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(str::parse)
                .collect::<GatewayResult<_>>()?,
            None => vec![ProviderKind::DataForSeo, ProviderKind::KeywordsEverywhere],
        };

        let ordered = llm_order
            .iter()
            .enumerate()
            .chain(metrics_order.iter().enumerate())
            .chain(std::iter::once((0, &ProviderKind::Firecrawl)));

        for (index, kind) in ordered {
            let prefix = kind.env_prefix();
            let credential = match kind {
                ProviderKind::DataForSeo => var("DATAFORSEO_PASSWORD"),
                _ => var(&format!("{prefix}_API_KEY")),
            };
            let Some(credential) = credential else {
                continue;
            };

            let mut settings = ProviderSettings::new(*kind, credential)
                .priority(u8::try_from(index).unwrap_or(u8::MAX));

            if *kind == ProviderKind::DataForSeo {
                let login = var("DATAFORSEO_LOGIN").ok_or_else(|| {
                    GatewayError::configuration(
                        "DATAFORSEO_LOGIN must be set together with DATAFORSEO_PASSWORD",
                    )
                })?;
                settings = settings.login(login);
            }
            if let Some(model) = var(&format!("{prefix}_MODEL")) {
                settings = settings.model(model);
            }
            if let Some(base_url) = var(&format!("{prefix}_BASE_URL")) {
                settings = settings.base_url(base_url);
            }
            if let Some(ttl) = var(&format!("{prefix}_CACHE_TTL_SECS")) {
                let secs = ttl.trim().parse::<u64>().map_err(|_| {
                    GatewayError::configuration(format!("{prefix}_CACHE_TTL_SECS must be an integer"))
                })?;
                settings = settings.cache_ttl(Duration::from_secs(secs));
            }

            builder = builder.provider(settings);
        }

        if let Some(max) = var("KEYWORD_GATEWAY_CACHE_MAX_ENTRIES") {
            let max = max.trim().parse::<usize>().map_err(|_| {
                GatewayError::configuration("KEYWORD_GATEWAY_CACHE_MAX_ENTRIES must be an integer")
            })?;
            builder = builder.cache_max_entries(max);
        }

        builder = builder.logging(LoggingConfig::from_lookup(&var)?);

        builder.build()
    }

    /// Providers serving `operation`, highest priority first.
    pub fn providers_for(&self, operation: Operation) -> Vec<&ProviderSettings> {
        let mut providers: Vec<_> = self
            .providers
            .iter()
            .filter(|p| p.kind.operation() == operation)
            .collect();
        providers.sort_by_key(|p| p.priority);
        providers
    }
}

/// Builder for `GatewayConfig`.
#[derive(Default)]
pub struct GatewayConfigBuilder {
    data_mode: DataMode,
    providers: Vec<ProviderSettings>,
    retry: Option<RetryConfig>,
    circuit_breaker: Option<CircuitBreakerConfig>,
    cache_max_entries: Option<usize>,
    logging: Option<LoggingConfig>,
}

impl GatewayConfigBuilder {
    /// Creates a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the data mode.
    pub fn data_mode(mut self, mode: DataMode) -> Self {
        self.data_mode = mode;
        self
    }

    /// Adds a provider.
    pub fn provider(mut self, settings: ProviderSettings) -> Self {
        self.providers.push(settings);
        self
    }

    /// Sets the retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Sets the circuit breaker configuration.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    /// Sets the per-provider cache size.
    pub fn cache_max_entries(mut self, max: usize) -> Self {
        self.cache_max_entries = Some(max);
        self
    }

    /// Sets the logging configuration.
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> GatewayResult<GatewayConfig> {
        for settings in &self.providers {
            if settings.api_key().is_empty() {
                return Err(GatewayError::configuration(format!(
                    "API key for {} cannot be empty",
                    settings.kind.name()
                )));
            }
            if settings.kind == ProviderKind::DataForSeo && settings.login.is_none() {
                return Err(GatewayError::configuration(
                    "dataforseo requires a login for basic authentication",
                ));
            }
            if let Some(base_url) = &settings.base_url {
                if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                    return Err(GatewayError::configuration(format!(
                        "Base URL for {} must start with http:// or https://",
                        settings.kind.name()
                    )));
                }
            }
            if settings.requests_per_minute == Some(0) {
                return Err(GatewayError::configuration(format!(
                    "requests_per_minute for {} must be positive",
                    settings.kind.name()
                )));
            }
        }

        let cache_max_entries = self.cache_max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES);
        if cache_max_entries == 0 {
            return Err(GatewayError::configuration("cache_max_entries must be positive"));
        }

        let retry = self.retry.unwrap_or_default();
        if retry.max_attempts == 0 {
            return Err(GatewayError::configuration("retry.max_attempts must be at least 1"));
        }

        Ok(GatewayConfig {
            data_mode: self.data_mode,
            providers: self.providers,
            retry,
            circuit_breaker: self.circuit_breaker.unwrap_or_default(),
            cache_max_entries,
            logging: self.logging.unwrap_or_default(),
        })
    }
}
