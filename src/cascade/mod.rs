//! Provider cascade for keyword metrics.
//!
//! Sources are asked in priority order until one returns data for at least
//! one of the requested keywords. The result always holds exactly one record
//! per input keyword, in input order, with the caller's spelling. Keywords a
//! source did not return are marked unavailable; they are never filled in
//! with placeholder numbers.

pub mod demo;
pub mod normalize;

pub use normalize::{IntoUnifiedRecords, RecordSource, TrendPoint, UnifiedRecord};

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::normalize_member;
use crate::client::{ProviderAdapter, ProviderClient};
use crate::config::DataMode;
use crate::errors::{GatewayError, GatewayResult};
use crate::providers::{Locale, MetricsQuery};

/// Records returned by one source.
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    /// Normalized records, in any order.
    pub records: Vec<UnifiedRecord>,
    /// Cost of the lookup in USD.
    pub cost: f64,
}

/// A provider of keyword metrics.
#[async_trait]
pub trait KeywordDataSource: Send + Sync {
    /// Source name.
    fn name(&self) -> &str;

    /// Looks up metrics for `keywords`.
    async fn fetch(&self, keywords: &[String], locale: &Locale) -> GatewayResult<SourceBatch>;
}

#[async_trait]
impl<A> KeywordDataSource for ProviderClient<A>
where
    A: ProviderAdapter<Request = MetricsQuery>,
    A::Output: IntoUnifiedRecords,
{
    fn name(&self) -> &str {
        self.adapter().provider()
    }

    /// Splits the batch at the adapter's per-call limit. Chunks that fail are
    /// left out; the lookup fails only when every chunk does.
    async fn fetch(&self, keywords: &[String], locale: &Locale) -> GatewayResult<SourceBatch> {
        let provider = self.adapter().provider();
        let chunk_size = self.adapter().max_items_per_call().unwrap_or(keywords.len()).max(1);

        let mut batch = SourceBatch::default();
        let mut last_error = None;
        let mut succeeded = 0usize;

        for chunk in keywords.chunks(chunk_size) {
            match self.execute(MetricsQuery::new(chunk.iter().cloned(), locale.clone())).await {
                Ok(outcome) => {
                    succeeded += 1;
                    batch.cost += outcome.cost;
                    batch.records.extend(outcome.value.into_unified(provider));
                }
                Err(error) => {
                    tracing::warn!(
                        provider,
                        chunk_len = chunk.len(),
                        error = %error,
                        "Metrics chunk failed"
                    );
                    last_error = Some(error);
                }
            }
        }

        match last_error {
            Some(error) if succeeded == 0 => Err(error),
            _ => Ok(batch),
        }
    }
}

/// One source consulted during a lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceAttempt {
    /// Source name.
    pub provider: String,
    /// Input keywords the source had data for.
    pub matched: usize,
    /// Error text if the source failed.
    pub error: Option<String>,
}

/// Result of a cascade lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CascadeResult {
    /// One record per input keyword, in input order.
    pub records: Vec<UnifiedRecord>,
    /// Source that supplied the data, if any.
    pub provider: Option<String>,
    /// Sources consulted, in order.
    pub attempts: Vec<SourceAttempt>,
    /// Whether the records are live or demo placeholders.
    pub mode: DataMode,
    /// Cost of the lookup in USD.
    pub cost: f64,
}

impl CascadeResult {
    /// Number of records carrying data.
    pub fn available(&self) -> usize {
        self.records.iter().filter(|r| r.is_available()).count()
    }
}

/// Ordered fallback over keyword data sources.
#[derive(Clone)]
pub struct ProviderCascade {
    sources: Vec<Arc<dyn KeywordDataSource>>,
    mode: DataMode,
}

impl ProviderCascade {
    /// Creates an empty cascade.
    pub fn new(mode: DataMode) -> Self {
        Self {
            sources: Vec::new(),
            mode,
        }
    }

    /// Appends a source; earlier sources are asked first.
    pub fn with_source(mut self, source: Arc<dyn KeywordDataSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Source names in order.
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Data mode.
    pub fn mode(&self) -> DataMode {
        self.mode
    }

    /// Looks up metrics for `keywords`.
    pub async fn lookup(&self, keywords: &[String], locale: &Locale) -> GatewayResult<CascadeResult> {
        if keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(GatewayError::invalid_field("keywords", "at least one keyword is required"));
        }

        if self.mode == DataMode::Demo {
            tracing::info!(keywords = keywords.len(), "Serving demo keyword metrics");
            return Ok(CascadeResult {
                records: keywords.iter().map(|k| demo::placeholder(k, locale)).collect(),
                provider: None,
                attempts: Vec::new(),
                mode: DataMode::Demo,
                cost: 0.0,
            });
        }

        if self.sources.is_empty() {
            return Err(GatewayError::configuration(
                "no keyword metrics provider is configured for live mode",
            ));
        }

        let query = unique_keywords(keywords);
        let mut attempts = Vec::with_capacity(self.sources.len());
        let mut answered = false;
        let mut cost = 0.0;

        for source in &self.sources {
            let name = source.name().to_string();
            let batch = match source.fetch(&query, locale).await {
                Ok(batch) => batch,
                Err(error) => {
                    tracing::warn!(provider = %name, error = %error, "Metrics source failed, trying next");
                    attempts.push(SourceAttempt {
                        provider: name,
                        matched: 0,
                        error: Some(error.to_string()),
                    });
                    continue;
                }
            };

            answered = true;
            cost += batch.cost;
            let (records, matched) = assemble(keywords, batch.records);
            attempts.push(SourceAttempt {
                provider: name.clone(),
                matched,
                error: None,
            });

            if matched == 0 {
                tracing::info!(provider = %name, "Metrics source returned no matching keywords");
                continue;
            }

            tracing::info!(
                provider = %name,
                matched,
                requested = keywords.len(),
                "Keyword metrics resolved"
            );
            return Ok(CascadeResult {
                records,
                provider: Some(name),
                attempts,
                mode: DataMode::Live,
                cost,
            });
        }

        if answered {
            return Ok(CascadeResult {
                records: keywords.iter().map(UnifiedRecord::unavailable).collect(),
                provider: None,
                attempts,
                mode: DataMode::Live,
                cost,
            });
        }

        Err(GatewayError::AllProvidersFailed {
            attempts: attempts
                .into_iter()
                .map(|a| (a.provider, a.error.unwrap_or_default()))
                .collect(),
        })
    }
}

impl std::fmt::Debug for ProviderCascade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCascade")
            .field("sources", &self.source_names())
            .field("mode", &self.mode)
            .finish()
    }
}

/// Trimmed keywords with normalized duplicates removed, first spelling kept.
fn unique_keywords(keywords: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty() && seen.insert(normalize_member(k)))
        .map(str::to_string)
        .collect()
}

/// Aligns source records with the input keywords.
fn assemble(keywords: &[String], records: Vec<UnifiedRecord>) -> (Vec<UnifiedRecord>, usize) {
    let mut by_key: HashMap<String, UnifiedRecord> = HashMap::with_capacity(records.len());
    for record in records {
        by_key.entry(normalize_member(&record.keyword)).or_insert(record);
    }

    let mut matched = 0;
    let aligned = keywords
        .iter()
        .map(|keyword| match by_key.get(&normalize_member(keyword)) {
            Some(record) => {
                matched += 1;
                UnifiedRecord {
                    keyword: keyword.clone(),
                    ..record.clone()
                }
            }
            None => UnifiedRecord::unavailable(keyword.clone()),
        })
        .collect();
    (aligned, matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    struct StaticSource {
        name: &'static str,
        result: Mutex<Option<GatewayResult<Vec<UnifiedRecord>>>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl StaticSource {
        fn ok(name: &'static str, keywords: &[&str]) -> Arc<Self> {
            let records = keywords
                .iter()
                .map(|k| UnifiedRecord {
                    volume: Some(100),
                    source: RecordSource::Provider(name.to_string()),
                    confidence: 0.9,
                    ..UnifiedRecord::unavailable(*k)
                })
                .collect();
            Arc::new(Self {
                name,
                result: Mutex::new(Some(Ok(records))),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: Mutex::new(Some(Err(GatewayError::Connection {
                    message: "refused".to_string(),
                }))),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl KeywordDataSource for StaticSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self, keywords: &[String], _locale: &Locale) -> GatewayResult<SourceBatch> {
            self.calls.lock().push(keywords.to_vec());
            match self.result.lock().take() {
                Some(Ok(records)) => Ok(SourceBatch { records, cost: 0.01 }),
                Some(Err(error)) => Err(error),
                None => Ok(SourceBatch::default()),
            }
        }
    }

    fn keywords(list: &[&str]) -> Vec<String> {
        list.iter().map(|k| (*k).to_string()).collect()
    }

    #[tokio::test]
    async fn test_falls_through_failing_source() {
        let a = StaticSource::failing("a");
        let b = StaticSource::ok("b", &["x", "y"]);
        let cascade = ProviderCascade::new(DataMode::Live)
            .with_source(a.clone())
            .with_source(b.clone());

        let result = cascade.lookup(&keywords(&["x", "y"]), &Locale::default()).await.unwrap();

        assert_eq!(result.provider.as_deref(), Some("b"));
        assert_eq!(result.available(), 2);
        assert!(result.records.iter().all(|r| r.source.as_str() == "b"));
        assert_eq!(result.attempts.len(), 2);
        assert!(result.attempts[0].error.is_some());
        assert_eq!(result.attempts[1].matched, 2);
    }

    #[tokio::test]
    async fn test_partial_batch_keeps_order_and_spelling() {
        let source = StaticSource::ok("a", &["seo tools", "keyword research"]);
        let cascade = ProviderCascade::new(DataMode::Live).with_source(source);

        let input = keywords(&["Keyword Research", "unknown thing", "SEO Tools"]);
        let result = cascade.lookup(&input, &Locale::default()).await.unwrap();

        let names: Vec<_> = result.records.iter().map(|r| r.keyword.as_str()).collect();
        assert_eq!(names, vec!["Keyword Research", "unknown thing", "SEO Tools"]);
        assert_eq!(result.records[0].source, RecordSource::Provider("a".to_string()));
        assert_eq!(result.records[1].source, RecordSource::Unavailable);
        assert_eq!(result.records[1].confidence, 0.0);
        assert_eq!(result.records[2].volume, Some(100));
    }

    #[tokio::test]
    async fn test_no_match_moves_on_then_reports_unavailable() {
        let a = StaticSource::ok("a", &["other"]);
        let b = StaticSource::failing("b");
        let cascade = ProviderCascade::new(DataMode::Live)
            .with_source(a)
            .with_source(b);

        let result = cascade.lookup(&keywords(&["x"]), &Locale::default()).await.unwrap();
        assert_eq!(result.provider, None);
        assert_eq!(result.records, vec![UnifiedRecord::unavailable("x")]);
        assert_eq!(result.attempts.len(), 2);
    }

    #[tokio::test]
    async fn test_all_failing_is_an_error() {
        let cascade = ProviderCascade::new(DataMode::Live)
            .with_source(StaticSource::failing("a"))
            .with_source(StaticSource::failing("b"));

        let err = cascade.lookup(&keywords(&["x"]), &Locale::default()).await.unwrap_err();
        match err {
            GatewayError::AllProvidersFailed { attempts } => {
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[0].0, "a");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_live_without_sources_is_configuration_error() {
        let cascade = ProviderCascade::new(DataMode::Live);
        let err = cascade.lookup(&keywords(&["x"]), &Locale::default()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_demo_mode_never_calls_sources() {
        let source = StaticSource::ok("a", &["x"]);
        let cascade = ProviderCascade::new(DataMode::Demo).with_source(source.clone());

        let result = cascade.lookup(&keywords(&["x", "y"]), &Locale::default()).await.unwrap();
        assert_eq!(result.mode, DataMode::Demo);
        assert!(result.records.iter().all(|r| r.source == RecordSource::Demo));
        assert!(source.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_duplicates_are_queried_once() {
        let source = StaticSource::ok("a", &["x"]);
        let cascade = ProviderCascade::new(DataMode::Live).with_source(source.clone());

        let result = cascade.lookup(&keywords(&["x", " X ", ""]), &Locale::default()).await.unwrap();
        assert_eq!(result.records.len(), 3);
        assert_eq!(source.calls.lock()[0], vec!["x".to_string()]);
    }
}
