//! Deterministic cache keys for provider requests.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Cache key of the form `provider:operation:<sha256 hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    /// Starts a fingerprint for `provider` and `operation`.
    pub fn builder(provider: &str, operation: &str) -> FingerprintBuilder {
        FingerprintBuilder {
            provider: provider.to_string(),
            operation: operation.to_string(),
            params: BTreeMap::new(),
        }
    }

    /// The key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RequestFingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Collects request parameters into a canonical form.
#[derive(Debug, Clone)]
pub struct FingerprintBuilder {
    provider: String,
    operation: String,
    params: BTreeMap<String, String>,
}

impl FingerprintBuilder {
    /// Adds a scalar parameter, trimmed but otherwise verbatim.
    pub fn param(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.params
            .insert(name.to_string(), value.to_string().trim().to_string());
        self
    }

    /// Adds an optional scalar parameter.
    pub fn opt_param(self, name: &str, value: Option<impl fmt::Display>) -> Self {
        match value {
            Some(value) => self.param(name, value),
            None => self,
        }
    }

    /// Adds a set-valued parameter.
    ///
    /// Members are trimmed, lowercased and whitespace-collapsed, then
    /// de-duplicated and sorted, so order and casing do not change the key.
    pub fn set<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut members: Vec<String> = values
            .into_iter()
            .map(|v| normalize_member(v.as_ref()))
            .filter(|v| !v.is_empty())
            .collect();
        members.sort();
        members.dedup();
        // normalize_member strips control characters, so the separator is unambiguous.
        self.params.insert(name.to_string(), members.join("\u{1f}"));
        self
    }

    /// Hashes the canonical parameter string.
    pub fn build(self) -> RequestFingerprint {
        let mut hasher = Sha256::new();
        for (name, value) in &self.params {
            for part in [name, value] {
                hasher.update(u64::try_from(part.len()).unwrap_or(u64::MAX).to_le_bytes());
                hasher.update(part.as_bytes());
            }
        }
        let digest = hex::encode(hasher.finalize());
        RequestFingerprint(format!("{}:{}:{digest}", self.provider, self.operation))
    }
}

/// Lowercases, drops control characters and collapses internal whitespace.
pub(crate) fn normalize_member(value: &str) -> String {
    let visible: String = value
        .chars()
        .map(|c| if c.is_control() && !c.is_whitespace() { ' ' } else { c })
        .collect();
    visible
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::{assert_eq, assert_ne};

    fn keywords(provider: &str, list: &[&str]) -> RequestFingerprint {
        RequestFingerprint::builder(provider, "keyword_metrics")
            .set("keywords", list)
            .param("country", "us")
            .build()
    }

    #[test]
    fn test_format() {
        let fp = keywords("dataforseo", &["seo"]);
        let parts: Vec<&str> = fp.as_str().splitn(3, ':').collect();
        assert_eq!(parts[0], "dataforseo");
        assert_eq!(parts[1], "keyword_metrics");
        assert_eq!(parts[2].len(), 64);
    }

    #[test]
    fn test_order_and_case_insensitive_sets() {
        assert_eq!(
            keywords("dataforseo", &["SEO Tools", "keyword  research", "seo tools"]),
            keywords("dataforseo", &["keyword research", " seo tools "])
        );
    }

    #[test]
    fn test_provider_and_operation_distinguish() {
        assert_ne!(
            keywords("dataforseo", &["seo"]),
            keywords("keywords_everywhere", &["seo"])
        );
        let a = RequestFingerprint::builder("openai", "keyword_expansion")
            .set("seeds", ["seo"])
            .build();
        let b = RequestFingerprint::builder("openai", "keyword_metrics")
            .set("seeds", ["seo"])
            .build();
        assert_ne!(a, b);
    }

    #[test]
    fn test_scalar_params_are_verbatim() {
        let lower = RequestFingerprint::builder("firecrawl", "content_scrape")
            .param("url", "https://example.com/Page")
            .build();
        let upper = RequestFingerprint::builder("firecrawl", "content_scrape")
            .param("url", "https://example.com/page")
            .build();
        assert_ne!(lower, upper);
    }

    #[test]
    fn test_param_insertion_order_irrelevant() {
        let a = RequestFingerprint::builder("p", "o")
            .param("x", 1)
            .param("y", 2)
            .build();
        let b = RequestFingerprint::builder("p", "o")
            .param("y", 2)
            .param("x", 1)
            .build();
        assert_eq!(a, b);
    }

    #[test]
    fn test_separator_inside_member_cannot_merge_members() {
        let joined = keywords("dataforseo", &["a\u{1f}b"]);
        let split = keywords("dataforseo", &["a", "b"]);
        assert_ne!(joined, split);
        assert_eq!(normalize_member("a\u{1f}b"), "a b");
    }

    #[test]
    fn test_param_boundaries_are_unambiguous() {
        let a = RequestFingerprint::builder("p", "o").param("x", "1\u{1e}y").build();
        let b = RequestFingerprint::builder("p", "o").param("x", "1").param("y", "").build();
        assert_ne!(a, b);
    }
}
