//! DataForSEO Labs keyword overview adapter.
//!
//! DataForSEO answers most failures with HTTP 200 and an API-level
//! `status_code` (20000 means success), both on the envelope and on each
//! task. Those codes are mapped onto [`GatewayError`] here so that the
//! client's breaker and retry logic see the real outcome.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Locale, MetricsQuery};
use crate::auth::AuthScheme;
use crate::cache::RequestFingerprint;
use crate::client::{CostModel, Parsed, ProviderAdapter, Usage};
use crate::config::{Operation, ProviderSettings};
use crate::errors::{GatewayError, GatewayResult, RateLimitOrigin};
use crate::transport::{HttpRequest, HttpResponse};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.dataforseo.com";
/// Keywords accepted per task.
pub const MAX_KEYWORDS_PER_CALL: usize = 1000;

const PROVIDER: &str = "dataforseo";
const ENDPOINT: &str = "/v3/dataforseo_labs/google/keyword_overview/live";
const STATUS_OK: u32 = 20000;

/// Google Ads location codes for supported markets.
const LOCATION_CODES: [(&str, u32); 7] = [
    ("us", 2840),
    ("gb", 2826),
    ("ca", 2124),
    ("au", 2036),
    ("de", 2276),
    ("fr", 2250),
    ("in", 2356),
];

/// Location code for a country, if supported.
pub fn location_code(country: &str) -> Option<u32> {
    let country = country.trim().to_ascii_lowercase();
    let country = if country == "uk" { "gb".to_string() } else { country };
    LOCATION_CODES
        .iter()
        .find(|(code, _)| *code == country)
        .map(|(_, location)| *location)
}

/// Monthly search volume sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySearch {
    /// Calendar year.
    pub year: i32,
    /// Month, 1-12.
    pub month: u32,
    /// Searches that month.
    #[serde(default)]
    pub search_volume: Option<u64>,
}

/// Metrics for one keyword as DataForSEO reports them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordOverview {
    /// The keyword as echoed by the API.
    pub keyword: String,
    /// Average monthly searches.
    pub search_volume: Option<u64>,
    /// Cost per click in USD.
    pub cpc: Option<f64>,
    /// Paid competition, 0-1.
    pub competition: Option<f64>,
    /// Organic difficulty, 0-100.
    pub keyword_difficulty: Option<f64>,
    /// Recent monthly volumes, newest first as delivered.
    pub monthly_searches: Vec<MonthlySearch>,
}

#[derive(Deserialize)]
struct Envelope {
    status_code: u32,
    #[serde(default)]
    status_message: String,
    #[serde(default)]
    cost: Option<f64>,
    #[serde(default)]
    tasks: Vec<Task>,
}

#[derive(Deserialize)]
struct Task {
    status_code: u32,
    #[serde(default)]
    status_message: String,
    #[serde(default)]
    result: Option<Vec<TaskResult>>,
}

#[derive(Deserialize)]
struct TaskResult {
    #[serde(default)]
    items: Option<Vec<RawItem>>,
}

#[derive(Deserialize)]
struct RawItem {
    keyword: String,
    #[serde(default)]
    keyword_info: Option<KeywordInfo>,
    #[serde(default)]
    keyword_properties: Option<KeywordProperties>,
}

#[derive(Deserialize)]
struct KeywordInfo {
    #[serde(default)]
    search_volume: Option<u64>,
    #[serde(default)]
    cpc: Option<f64>,
    #[serde(default)]
    competition: Option<f64>,
    #[serde(default)]
    monthly_searches: Option<Vec<MonthlySearch>>,
}

#[derive(Deserialize)]
struct KeywordProperties {
    #[serde(default)]
    keyword_difficulty: Option<f64>,
}

impl From<RawItem> for KeywordOverview {
    fn from(item: RawItem) -> Self {
        let info = item.keyword_info;
        Self {
            keyword: item.keyword,
            search_volume: info.as_ref().and_then(|i| i.search_volume),
            cpc: info.as_ref().and_then(|i| i.cpc),
            competition: info.as_ref().and_then(|i| i.competition),
            keyword_difficulty: item.keyword_properties.and_then(|p| p.keyword_difficulty),
            monthly_searches: info.and_then(|i| i.monthly_searches).unwrap_or_default(),
        }
    }
}

/// Maps an API-level status code to an error.
fn status_error(code: u32, message: &str) -> GatewayError {
    let provider = PROVIDER.to_string();
    let message = format!("{message} (status {code})");
    match code {
        40100..=40199 => GatewayError::Authentication { provider, message },
        40202 | 42900..=42999 => GatewayError::RateLimit {
            provider,
            message,
            retry_after: None,
            origin: RateLimitOrigin::Upstream,
        },
        40200..=40299 => GatewayError::Rejected {
            provider,
            status: 402,
            message,
        },
        40000..=40099 | 40400..=40599 => GatewayError::Validation {
            message: format!("{PROVIDER} rejected the request: {message}"),
            field: None,
        },
        50000..=59999 => GatewayError::Upstream {
            provider,
            status: 500,
            message,
            retry_after: None,
        },
        _ => GatewayError::Rejected {
            provider,
            status: 200,
            message,
        },
    }
}

/// Keyword metrics through DataForSEO Labs.
#[derive(Debug, Clone)]
pub struct DataForSeoMetrics {
    auth: AuthScheme,
    base_url: String,
    pricing: CostModel,
}

impl DataForSeoMetrics {
    /// Creates an adapter with basic-auth credentials.
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            auth: AuthScheme::basic(login, password),
            base_url: DEFAULT_BASE_URL.to_string(),
            pricing: CostModel::PerRequest { per_request: 0.0101 },
        }
    }

    /// Creates an adapter from provider settings.
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        let login = settings.login.clone().unwrap_or_default();
        let adapter = Self::new(login, settings.api_key());
        match &settings.base_url {
            Some(base_url) => adapter.with_base_url(base_url.clone()),
            None => adapter,
        }
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

impl ProviderAdapter for DataForSeoMetrics {
    type Request = MetricsQuery;
    type Output = Vec<KeywordOverview>;

    fn provider(&self) -> &str {
        PROVIDER
    }

    fn operation(&self) -> Operation {
        Operation::KeywordMetrics
    }

    fn validate(&self, request: &MetricsQuery) -> GatewayResult<()> {
        self.auth
            .validate()
            .map_err(|message| GatewayError::Authentication {
                provider: PROVIDER.to_string(),
                message,
            })?;
        request.validate(MAX_KEYWORDS_PER_CALL)?;
        if location_code(&request.locale.country).is_none() {
            return Err(GatewayError::invalid_field(
                "locale.country",
                format!("{PROVIDER} does not support country '{}'", request.locale.country),
            ));
        }
        Ok(())
    }

    fn fingerprint(&self, request: &MetricsQuery) -> RequestFingerprint {
        metrics_fingerprint(PROVIDER, request)
    }

    fn build_request(&self, request: &MetricsQuery) -> GatewayResult<HttpRequest> {
        let location = location_code(&request.locale.country).ok_or_else(|| {
            GatewayError::invalid_field("locale.country", "unsupported country")
        })?;
        let body = json!([{
            "keywords": request.cleaned_keywords(),
            "location_code": location,
            "language_code": request.locale.language,
        }]);

        let mut http = HttpRequest::post_json(format!("{}{ENDPOINT}", self.base_url), &body)?;
        self.auth.apply(&mut http.headers);
        Ok(http)
    }

    fn parse_response(
        &self,
        _request: &MetricsQuery,
        response: &HttpResponse,
    ) -> GatewayResult<Parsed<Vec<KeywordOverview>>> {
        let envelope: Envelope = serde_json::from_slice(&response.body)
            .map_err(|e| GatewayError::parse(PROVIDER, e.to_string(), &response.text()))?;

        if envelope.status_code != STATUS_OK {
            return Err(status_error(envelope.status_code, &envelope.status_message));
        }

        let task = envelope
            .tasks
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::parse(PROVIDER, "response has no tasks", &response.text()))?;
        if task.status_code != STATUS_OK {
            return Err(status_error(task.status_code, &task.status_message));
        }

        let overviews: Vec<KeywordOverview> = task
            .result
            .unwrap_or_default()
            .into_iter()
            .flat_map(|result| result.items.unwrap_or_default())
            .map(KeywordOverview::from)
            .collect();

        let rows = u64::try_from(overviews.len()).unwrap_or(u64::MAX);
        Ok(Parsed::new(overviews, Usage::rows(rows)).with_reported_cost(envelope.cost))
    }

    fn cost_model(&self) -> CostModel {
        self.pricing
    }

    fn estimate_usage(&self, item_count: usize) -> Usage {
        Usage::rows(u64::try_from(item_count).unwrap_or(u64::MAX))
    }

    fn max_items_per_call(&self) -> Option<usize> {
        Some(MAX_KEYWORDS_PER_CALL)
    }
}

/// Cache key shared by the metrics adapters.
pub(crate) fn metrics_fingerprint(provider: &str, request: &MetricsQuery) -> RequestFingerprint {
    let Locale { language, country } = &request.locale;
    RequestFingerprint::builder(provider, Operation::KeywordMetrics.as_str())
        .set("keywords", &request.keywords)
        .param("language", language)
        .param("country", country)
        .build()
}
