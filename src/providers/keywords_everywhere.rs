//! Keywords Everywhere keyword data adapter.

use serde::{Deserialize, Deserializer, Serialize};

use super::dataforseo::metrics_fingerprint;
use super::MetricsQuery;
use crate::auth::AuthScheme;
use crate::cache::RequestFingerprint;
use crate::client::{CostModel, Parsed, ProviderAdapter, Usage};
use crate::config::{Operation, ProviderSettings};
use crate::errors::{GatewayError, GatewayResult};
use crate::transport::{HttpRequest, HttpResponse};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.keywordseverywhere.com";
/// Keywords accepted per call.
pub const MAX_KEYWORDS_PER_CALL: usize = 100;

const PROVIDER: &str = "keywords_everywhere";

/// Cost per click as delivered, a currency symbol and a decimal string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cpc {
    /// Currency symbol or code.
    #[serde(default)]
    pub currency: String,
    /// Amount as text, e.g. `"1.20"`.
    #[serde(deserialize_with = "string_or_number")]
    pub value: String,
}

/// Monthly trend point with a month name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendEntry {
    /// Month name, e.g. `"January"`.
    pub month: String,
    /// Calendar year.
    pub year: i32,
    /// Searches that month.
    #[serde(default)]
    pub value: Option<u64>,
}

/// Metrics for one keyword as Keywords Everywhere reports them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordData {
    /// The keyword as echoed by the API.
    pub keyword: String,
    /// Monthly search volume.
    #[serde(default)]
    pub vol: Option<u64>,
    /// Cost per click.
    #[serde(default)]
    pub cpc: Option<Cpc>,
    /// Paid competition, 0-1.
    #[serde(default)]
    pub competition: Option<f64>,
    /// Last twelve months.
    #[serde(default)]
    pub trend: Vec<TrendEntry>,
}

#[derive(Deserialize)]
struct DataResponse {
    #[serde(default)]
    data: Vec<KeywordData>,
    #[serde(default)]
    credits_consumed: Option<u64>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(f64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

/// Keyword metrics through Keywords Everywhere.
#[derive(Debug, Clone)]
pub struct KeywordsEverywhereMetrics {
    auth: AuthScheme,
    base_url: String,
    data_source: String,
    currency: String,
    pricing: CostModel,
}

impl KeywordsEverywhereMetrics {
    /// Creates an adapter.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            auth: AuthScheme::bearer(api_key),
            base_url: DEFAULT_BASE_URL.to_string(),
            data_source: "gkp".to_string(),
            currency: "usd".to_string(),
            // One credit per keyword.
            pricing: CostModel::PerRow {
                per_row: 0.0001,
                base: 0.0,
            },
        }
    }

    /// Creates an adapter from provider settings.
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        let adapter = Self::new(settings.api_key());
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

    /// Sets the data source (`gkp` or `cli`).
    pub fn with_data_source(mut self, data_source: impl Into<String>) -> Self {
        self.data_source = data_source.into();
        self
    }
}

impl ProviderAdapter for KeywordsEverywhereMetrics {
    type Request = MetricsQuery;
    type Output = Vec<KeywordData>;

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
        request.validate(MAX_KEYWORDS_PER_CALL)
    }

    fn fingerprint(&self, request: &MetricsQuery) -> RequestFingerprint {
        metrics_fingerprint(PROVIDER, request)
    }

    fn build_request(&self, request: &MetricsQuery) -> GatewayResult<HttpRequest> {
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        form.append_pair("dataSource", &self.data_source)
            .append_pair("country", &request.locale.country)
            .append_pair("currency", &self.currency);
        for keyword in request.cleaned_keywords() {
            form.append_pair("kw[]", &keyword);
        }

        let mut http = HttpRequest::post_form(
            format!("{}/v1/get_keyword_data", self.base_url),
            form.finish(),
        );
        self.auth.apply(&mut http.headers);
        Ok(http)
    }

    fn parse_response(
        &self,
        _request: &MetricsQuery,
        response: &HttpResponse,
    ) -> GatewayResult<Parsed<Vec<KeywordData>>> {
        let body: DataResponse = serde_json::from_slice(&response.body)
            .map_err(|e| GatewayError::parse(PROVIDER, e.to_string(), &response.text()))?;

        let rows = body
            .credits_consumed
            .unwrap_or_else(|| u64::try_from(body.data.len()).unwrap_or(u64::MAX));
        Ok(Parsed::new(body.data, Usage::rows(rows)))
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
