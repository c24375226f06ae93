//! Concrete provider adapters and the request/response types they share.

pub mod anthropic;
pub mod dataforseo;
pub mod firecrawl;
pub mod keywords_everywhere;
pub mod openai;
pub mod prompt;

pub use anthropic::AnthropicExpander;
pub use dataforseo::DataForSeoMetrics;
pub use firecrawl::{scrape_urls, FirecrawlScraper, ScrapeFailure, ScrapeOutcome, ScrapeRequest, ScrapedPage};
pub use keywords_everywhere::KeywordsEverywhereMetrics;
pub use openai::OpenAiExpander;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::{normalize_member, RequestFingerprint};
use crate::config::Operation;
use crate::errors::{GatewayError, GatewayResult};

/// Language and market for a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locale {
    /// ISO 639-1 language code.
    pub language: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country: String,
}

impl Locale {
    /// Creates a locale, lowercasing both codes.
    pub fn new(language: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            language: language.into().trim().to_ascii_lowercase(),
            country: country.into().trim().to_ascii_lowercase(),
        }
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self::new("en", "us")
    }
}

/// Search intent behind a keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchIntent {
    /// Looking for information.
    Informational,
    /// Looking for a specific site.
    Navigational,
    /// Researching before buying.
    Commercial,
    /// Ready to act.
    Transactional,
    /// Not stated or not recognised.
    #[default]
    Unknown,
}

impl SearchIntent {
    /// Lenient parse of model output.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "informational" | "info" => SearchIntent::Informational,
            "navigational" | "navigation" => SearchIntent::Navigational,
            "commercial" | "commercial investigation" => SearchIntent::Commercial,
            "transactional" | "transaction" => SearchIntent::Transactional,
            _ => SearchIntent::Unknown,
        }
    }
}

/// One keyword proposed by an expansion model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordSuggestion {
    /// The keyword.
    pub keyword: String,
    /// Search intent.
    #[serde(default)]
    pub intent: SearchIntent,
    /// Relevance to the seeds, in [0, 1].
    #[serde(default)]
    pub relevance_score: Option<f64>,
    /// Short justification from the model.
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl KeywordSuggestion {
    /// Builds a suggestion from a validated extractor item.
    ///
    /// Scores given on a 0-100 scale are rescaled; anything else is clamped.
    pub fn from_item(item: &Map<String, Value>) -> Option<Self> {
        let keyword = item.get("keyword")?.as_str()?.trim().to_string();
        if keyword.is_empty() {
            return None;
        }

        let intent = item
            .get("intent")
            .or_else(|| item.get("search_intent"))
            .and_then(Value::as_str)
            .map(SearchIntent::parse)
            .unwrap_or_default();

        let relevance_score = item
            .get("relevance_score")
            .or_else(|| item.get("relevance"))
            .or_else(|| item.get("score"))
            .and_then(|v| v.as_f64().or_else(|| v.as_str()?.trim().parse().ok()))
            .filter(|score| score.is_finite())
            .map(|score| if score > 1.0 { score / 100.0 } else { score })
            .map(|score| score.clamp(0.0, 1.0));

        let reasoning = item
            .get("reasoning")
            .or_else(|| item.get("reason"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Some(Self {
            keyword,
            intent,
            relevance_score,
            reasoning,
        })
    }
}

/// Converts extractor items into suggestions, skipping duplicates, seeds and
/// anything past `max`.
pub(crate) fn suggestions_from_items(
    items: &[Map<String, Value>],
    request: &ExpansionRequest,
) -> Vec<KeywordSuggestion> {
    let seeds: std::collections::HashSet<String> = request
        .seed_keywords
        .iter()
        .map(|s| normalize_member(s))
        .collect();
    let mut seen = std::collections::HashSet::new();

    items
        .iter()
        .filter_map(KeywordSuggestion::from_item)
        .filter(|s| {
            let key = normalize_member(&s.keyword);
            !seeds.contains(&key) && seen.insert(key)
        })
        .take(request.max_suggestions)
        .collect()
}

/// Cache key shared by the expansion adapters.
pub(crate) fn expansion_fingerprint(
    provider: &str,
    model: &str,
    request: &ExpansionRequest,
) -> RequestFingerprint {
    RequestFingerprint::builder(provider, Operation::KeywordExpansion.as_str())
        .set("seeds", &request.seed_keywords)
        .param("model", model)
        .param("max_suggestions", request.max_suggestions)
        .param("language", &request.locale.language)
        .param("country", &request.locale.country)
        .opt_param("context", request.context.as_deref())
        .build()
}

/// Request to expand seed keywords with an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionRequest {
    /// Seed keywords.
    pub seed_keywords: Vec<String>,
    /// Target market.
    #[serde(default)]
    pub locale: Locale,
    /// Upper bound on returned suggestions.
    pub max_suggestions: usize,
    /// Free-form business context for the prompt.
    #[serde(default)]
    pub context: Option<String>,
}

/// Largest expansion a single call may request.
pub const MAX_SUGGESTIONS: usize = 500;

impl ExpansionRequest {
    /// Creates a request.
    pub fn new<I, S>(seeds: I, max_suggestions: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seed_keywords: seeds.into_iter().map(Into::into).collect(),
            locale: Locale::default(),
            max_suggestions,
            context: None,
        }
    }

    /// Sets the locale.
    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    /// Sets the business context.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Shared validation for expansion adapters.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.seed_keywords.iter().all(|s| s.trim().is_empty()) {
            return Err(GatewayError::invalid_field(
                "seed_keywords",
                "at least one seed keyword is required",
            ));
        }
        if self.max_suggestions == 0 || self.max_suggestions > MAX_SUGGESTIONS {
            return Err(GatewayError::invalid_field(
                "max_suggestions",
                format!("must be between 1 and {MAX_SUGGESTIONS}"),
            ));
        }
        Ok(())
    }
}

/// Keyword metrics lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsQuery {
    /// Keywords to look up.
    pub keywords: Vec<String>,
    /// Target market.
    #[serde(default)]
    pub locale: Locale,
}

impl MetricsQuery {
    /// Creates a query.
    pub fn new<I, S>(keywords: I, locale: Locale) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            locale,
        }
    }

    /// Validates the query against a per-call limit.
    pub fn validate(&self, limit: usize) -> GatewayResult<()> {
        if self.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(GatewayError::invalid_field("keywords", "at least one keyword is required"));
        }
        if self.keywords.len() > limit {
            return Err(GatewayError::invalid_field(
                "keywords",
                format!("at most {limit} keywords per call, got {}", self.keywords.len()),
            ));
        }
        Ok(())
    }

    /// Trimmed, non-empty keywords.
    pub(crate) fn cleaned_keywords(&self) -> Vec<String> {
        self.keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect()
    }
}
