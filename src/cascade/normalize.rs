//! Maps provider-specific metrics onto one record shape.

use chrono::Month;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::providers::dataforseo::{KeywordOverview, MonthlySearch};
use crate::providers::keywords_everywhere::{KeywordData, TrendEntry};

/// Confidence of DataForSEO records.
pub const DATAFORSEO_CONFIDENCE: f64 = 0.95;
/// Confidence of Keywords Everywhere records.
pub const KEYWORDS_EVERYWHERE_CONFIDENCE: f64 = 0.8;
/// Confidence of demo placeholders.
pub const DEMO_CONFIDENCE: f64 = 0.1;

/// Where a record's numbers came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordSource {
    /// A named provider.
    Provider(String),
    /// No provider had data.
    Unavailable,
    /// Demo placeholder.
    Demo,
}

impl RecordSource {
    /// Label used in serialized output.
    pub fn as_str(&self) -> &str {
        match self {
            RecordSource::Provider(name) => name,
            RecordSource::Unavailable => "unavailable",
            RecordSource::Demo => "demo",
        }
    }
}

impl Serialize for RecordSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RecordSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(match label.as_str() {
            "unavailable" => RecordSource::Unavailable,
            "demo" => RecordSource::Demo,
            _ => RecordSource::Provider(label),
        })
    }
}

/// One month of search volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendPoint {
    /// `YYYY-MM`.
    pub period: String,
    /// Searches that month.
    pub value: u64,
}

/// Provider-independent keyword metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedRecord {
    /// The keyword.
    pub keyword: String,
    /// Monthly search volume.
    pub volume: Option<u64>,
    /// Organic difficulty, 0-100.
    pub difficulty: Option<f64>,
    /// Cost per click in the provider's currency.
    pub cpc: Option<f64>,
    /// Paid competition, 0-100.
    pub competition: Option<f64>,
    /// Monthly volumes, oldest first.
    pub trend: Option<Vec<TrendPoint>>,
    /// Origin of the numbers.
    pub source: RecordSource,
    /// How far the numbers can be trusted, 0-1.
    pub confidence: f64,
}

impl UnifiedRecord {
    /// A record with no data.
    pub fn unavailable(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            volume: None,
            difficulty: None,
            cpc: None,
            competition: None,
            trend: None,
            source: RecordSource::Unavailable,
            confidence: 0.0,
        }
    }

    /// Returns true if the record carries provider data.
    pub fn is_available(&self) -> bool {
        self.source != RecordSource::Unavailable
    }
}

/// Converts a provider result into unified records.
pub trait IntoUnifiedRecords {
    /// Consumes the result.
    fn into_unified(self, provider: &str) -> Vec<UnifiedRecord>;
}

impl IntoUnifiedRecords for Vec<KeywordOverview> {
    fn into_unified(self, provider: &str) -> Vec<UnifiedRecord> {
        self.iter().map(|item| from_dataforseo(item, provider)).collect()
    }
}

impl IntoUnifiedRecords for Vec<KeywordData> {
    fn into_unified(self, provider: &str) -> Vec<UnifiedRecord> {
        self.iter()
            .map(|item| from_keywords_everywhere(item, provider))
            .collect()
    }
}

/// Normalizes a DataForSEO keyword overview.
pub fn from_dataforseo(item: &KeywordOverview, provider: &str) -> UnifiedRecord {
    UnifiedRecord {
        keyword: item.keyword.clone(),
        volume: item.search_volume,
        difficulty: item.keyword_difficulty.map(|d| d.clamp(0.0, 100.0)),
        cpc: item.cpc.filter(|c| c.is_finite() && *c >= 0.0),
        competition: item.competition.and_then(competition_score),
        trend: numeric_trend(&item.monthly_searches),
        source: RecordSource::Provider(provider.to_string()),
        confidence: DATAFORSEO_CONFIDENCE,
    }
}

/// Normalizes a Keywords Everywhere record.
pub fn from_keywords_everywhere(item: &KeywordData, provider: &str) -> UnifiedRecord {
    UnifiedRecord {
        keyword: item.keyword.clone(),
        volume: item.vol,
        difficulty: None,
        cpc: item.cpc.as_ref().and_then(|c| parse_cpc(&c.value)),
        competition: item.competition.and_then(competition_score),
        trend: named_trend(&item.trend),
        source: RecordSource::Provider(provider.to_string()),
        confidence: KEYWORDS_EVERYWHERE_CONFIDENCE,
    }
}

/// Scales a 0-1 competition index to 0-100.
pub fn competition_score(raw: f64) -> Option<f64> {
    raw.is_finite().then(|| (raw * 100.0).clamp(0.0, 100.0))
}

/// Parses a CPC string such as `"$1,234.50"`.
pub fn parse_cpc(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|c| c.is_finite() && *c >= 0.0)
}

fn period(year: i32, month: u32) -> Option<(i32, u32)> {
    (1..=12).contains(&month).then_some((year, month))
}

fn into_trend(mut points: Vec<((i32, u32), u64)>) -> Option<Vec<TrendPoint>> {
    if points.is_empty() {
        return None;
    }
    points.sort_by_key(|(period, _)| *period);
    points.dedup_by_key(|(period, _)| *period);
    Some(
        points
            .into_iter()
            .map(|((year, month), value)| TrendPoint {
                period: format!("{year:04}-{month:02}"),
                value,
            })
            .collect(),
    )
}

fn numeric_trend(samples: &[MonthlySearch]) -> Option<Vec<TrendPoint>> {
    into_trend(
        samples
            .iter()
            .filter_map(|s| Some((period(s.year, s.month)?, s.search_volume?)))
            .collect(),
    )
}

fn named_trend(entries: &[TrendEntry]) -> Option<Vec<TrendPoint>> {
    into_trend(
        entries
            .iter()
            .filter_map(|e| {
                let month = e.month.trim().parse::<Month>().ok()?;
                Some((period(e.year, month.number_from_month())?, e.value?))
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::keywords_everywhere::Cpc;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dataforseo_record() {
        let item = KeywordOverview {
            keyword: "seo tools".to_string(),
            search_volume: Some(12100),
            cpc: Some(8.4),
            competition: Some(0.62),
            keyword_difficulty: Some(71.0),
            monthly_searches: vec![
                MonthlySearch { year: 2024, month: 2, search_volume: Some(12500) },
                MonthlySearch { year: 2023, month: 12, search_volume: Some(9000) },
                MonthlySearch { year: 2024, month: 1, search_volume: Some(11800) },
                MonthlySearch { year: 2024, month: 13, search_volume: Some(1) },
            ],
        };
        let record = from_dataforseo(&item, "dataforseo");

        assert_eq!(record.competition, Some(62.0));
        assert_eq!(record.confidence, DATAFORSEO_CONFIDENCE);
        assert_eq!(record.source, RecordSource::Provider("dataforseo".to_string()));
        let periods: Vec<_> = record
            .trend
            .unwrap()
            .into_iter()
            .map(|p| p.period)
            .collect();
        assert_eq!(periods, vec!["2023-12", "2024-01", "2024-02"]);
    }

    #[test]
    fn test_keywords_everywhere_record() {
        let item = KeywordData {
            keyword: "espresso".to_string(),
            vol: Some(40500),
            cpc: Some(Cpc { currency: "$".to_string(), value: "$1,201.35".to_string() }),
            competition: Some(1.4),
            trend: vec![
                TrendEntry { month: "March".to_string(), year: 2024, value: Some(3) },
                TrendEntry { month: "january".to_string(), year: 2024, value: Some(1) },
                TrendEntry { month: "Smarch".to_string(), year: 2024, value: Some(9) },
            ],
        };
        let record = from_keywords_everywhere(&item, "keywords_everywhere");

        assert_eq!(record.cpc, Some(1201.35));
        assert_eq!(record.competition, Some(100.0));
        assert_eq!(record.difficulty, None);
        assert_eq!(record.confidence, KEYWORDS_EVERYWHERE_CONFIDENCE);
        assert_eq!(
            record.trend,
            Some(vec![
                TrendPoint { period: "2024-01".to_string(), value: 1 },
                TrendPoint { period: "2024-03".to_string(), value: 3 },
            ])
        );
    }

    #[test]
    fn test_cpc_parsing() {
        assert_eq!(parse_cpc("0.75"), Some(0.75));
        assert_eq!(parse_cpc("€2.10"), Some(2.1));
        assert_eq!(parse_cpc("n/a"), None);
    }

    #[test]
    fn test_source_serialization() {
        let record = UnifiedRecord::unavailable("x");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["source"], "unavailable");
        assert_eq!(value["confidence"], 0.0);

        let source: RecordSource = serde_json::from_str("\"dataforseo\"").unwrap();
        assert_eq!(source, RecordSource::Provider("dataforseo".to_string()));
    }
}
