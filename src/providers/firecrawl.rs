//! Firecrawl scrape adapter and bounded-concurrency fan-out.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::auth::AuthScheme;
use crate::cache::RequestFingerprint;
use crate::client::{CostModel, Parsed, ProviderAdapter, ProviderClient, Usage};
use crate::config::{Operation, ProviderSettings};
use crate::errors::{GatewayError, GatewayResult};
use crate::transport::{HttpRequest, HttpResponse};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.firecrawl.dev";
/// Default fan-out width for [`scrape_urls`].
pub const DEFAULT_CONCURRENCY: usize = 4;

const PROVIDER: &str = "firecrawl";

/// A page to scrape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeRequest {
    /// Absolute http(s) URL.
    pub url: String,
    /// Drop navigation, headers and footers.
    #[serde(default = "default_true")]
    pub only_main_content: bool,
}

fn default_true() -> bool {
    true
}

impl ScrapeRequest {
    /// Scrapes the main content of `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim().to_string(),
            only_main_content: true,
        }
    }
}

/// Scraped page content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedPage {
    /// URL requested.
    pub url: String,
    /// Page title.
    pub title: Option<String>,
    /// Page body as markdown.
    pub content: String,
    /// Links found on the page, in document order.
    #[serde(default)]
    pub links: Vec<String>,
    /// Page metadata as reported by Firecrawl.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ScrapedPage {
    /// Meta description, if the page has one.
    pub fn description(&self) -> Option<&str> {
        self.metadata.get("description").and_then(Value::as_str)
    }

    /// Status the target site answered with.
    pub fn status_code(&self) -> Option<u16> {
        self.metadata
            .get("statusCode")
            .and_then(Value::as_u64)
            .and_then(|code| u16::try_from(code).ok())
    }
}

/// Why a URL could not be scraped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrapeFailure {
    /// Stable error label.
    pub error_kind: &'static str,
    /// Error text.
    pub message: String,
}

impl From<&GatewayError> for ScrapeFailure {
    fn from(error: &GatewayError) -> Self {
        Self {
            error_kind: error.kind().as_str(),
            message: error.to_string(),
        }
    }
}

/// Result for one URL of a fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeOutcome {
    /// URL requested.
    pub url: String,
    /// The page, or why it failed.
    pub result: Result<ScrapedPage, ScrapeFailure>,
    /// Served from cache.
    pub cached: bool,
    /// Cost in USD.
    pub cost: f64,
}

#[derive(Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<ScrapeData>,
}

#[derive(Deserialize)]
struct ScrapeData {
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    links: Vec<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

/// Page scraping through Firecrawl.
#[derive(Debug, Clone)]
pub struct FirecrawlScraper {
    auth: AuthScheme,
    base_url: String,
    pricing: CostModel,
}

impl FirecrawlScraper {
    /// Creates a scraper.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            auth: AuthScheme::bearer(api_key),
            base_url: DEFAULT_BASE_URL.to_string(),
            pricing: CostModel::PerRequest { per_request: 0.001 },
        }
    }

    /// Creates a scraper from provider settings.
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        let scraper = Self::new(settings.api_key());
        match &settings.base_url {
            Some(base_url) => scraper.with_base_url(base_url.clone()),
            None => scraper,
        }
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

impl ProviderAdapter for FirecrawlScraper {
    type Request = ScrapeRequest;
    type Output = ScrapedPage;

    fn provider(&self) -> &str {
        PROVIDER
    }

    fn operation(&self) -> Operation {
        Operation::ContentScrape
    }

    fn validate(&self, request: &ScrapeRequest) -> GatewayResult<()> {
        self.auth
            .validate()
            .map_err(|message| GatewayError::Authentication {
                provider: PROVIDER.to_string(),
                message,
            })?;
        let parsed = url::Url::parse(&request.url)
            .map_err(|e| GatewayError::invalid_field("url", format!("invalid URL: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(GatewayError::invalid_field("url", "only http and https URLs can be scraped"));
        }
        Ok(())
    }

    fn fingerprint(&self, request: &ScrapeRequest) -> RequestFingerprint {
        RequestFingerprint::builder(PROVIDER, Operation::ContentScrape.as_str())
            .param("url", &request.url)
            .param("only_main_content", request.only_main_content)
            .build()
    }

    fn build_request(&self, request: &ScrapeRequest) -> GatewayResult<HttpRequest> {
        let body = json!({
            "url": request.url,
            "formats": ["markdown", "links"],
            "onlyMainContent": request.only_main_content,
        });
        let mut http = HttpRequest::post_json(format!("{}/v1/scrape", self.base_url), &body)?;
        self.auth.apply(&mut http.headers);
        Ok(http)
    }

    fn parse_response(
        &self,
        request: &ScrapeRequest,
        response: &HttpResponse,
    ) -> GatewayResult<Parsed<ScrapedPage>> {
        let body: ScrapeResponse = serde_json::from_slice(&response.body)
            .map_err(|e| GatewayError::parse(PROVIDER, e.to_string(), &response.text()))?;

        if !body.success {
            return Err(GatewayError::Rejected {
                provider: PROVIDER.to_string(),
                status: response.status,
                message: body.error.unwrap_or_else(|| "scrape unsuccessful".to_string()),
            });
        }

        let data = body
            .data
            .ok_or_else(|| GatewayError::parse(PROVIDER, "response has no data", &response.text()))?;
        let title = data
            .metadata
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let page = ScrapedPage {
            url: request.url.clone(),
            title,
            content: data.markdown.unwrap_or_default(),
            links: data.links,
            metadata: data.metadata,
        };
        Ok(Parsed::new(page, Usage::rows(1)))
    }

    fn cost_model(&self) -> CostModel {
        self.pricing
    }

    fn estimate_usage(&self, item_count: usize) -> Usage {
        Usage::rows(u64::try_from(item_count).unwrap_or(u64::MAX))
    }

    fn max_items_per_call(&self) -> Option<usize> {
        Some(1)
    }
}

/// Scrapes `urls` with at most `concurrency` calls in flight.
///
/// Returns one outcome per URL in input order; a failed URL does not stop
/// the others.
pub async fn scrape_urls<I, S>(
    client: &ProviderClient<FirecrawlScraper>,
    urls: I,
    concurrency: usize,
) -> Vec<ScrapeOutcome>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let requests: Vec<ScrapeRequest> = urls.into_iter().map(ScrapeRequest::new).collect();

    stream::iter(requests)
        .map(|request| async move {
            let url = request.url.clone();
            match client.execute(request).await {
                Ok(outcome) => ScrapeOutcome {
                    url,
                    result: Ok(outcome.value),
                    cached: outcome.cached,
                    cost: outcome.cost,
                },
                Err(error) => ScrapeOutcome {
                    url,
                    result: Err(ScrapeFailure::from(&error)),
                    cached: false,
                    cost: 0.0,
                },
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}
