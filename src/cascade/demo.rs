//! Deterministic placeholder records for demo mode.

use sha2::{Digest, Sha256};

use super::normalize::{RecordSource, UnifiedRecord, DEMO_CONFIDENCE};
use crate::cache::normalize_member;
use crate::providers::Locale;

/// Builds a placeholder record. The same keyword and locale always give the
/// same numbers.
#[allow(clippy::cast_precision_loss)]
pub fn placeholder(keyword: &str, locale: &Locale) -> UnifiedRecord {
    let mut hasher = Sha256::new();
    hasher.update(normalize_member(keyword).as_bytes());
    hasher.update([0x1f]);
    hasher.update(locale.language.as_bytes());
    hasher.update([0x1f]);
    hasher.update(locale.country.as_bytes());
    let digest = hasher.finalize();

    let word = |i: usize| u64::from(u16::from_be_bytes([digest[i], digest[i + 1]]));

    // Longer phrases get less traffic.
    let words = u64::try_from(keyword.split_whitespace().count().max(1)).unwrap_or(1);
    let volume = (word(0) % 50_000 + 10) / words;
    let difficulty = (word(2) % 100) as f64;
    let cpc = (word(4) % 1000) as f64 / 100.0;
    let competition = (word(6) % 101) as f64;

    UnifiedRecord {
        keyword: keyword.to_string(),
        volume: Some(volume),
        difficulty: Some(difficulty),
        cpc: Some(cpc),
        competition: Some(competition),
        trend: None,
        source: RecordSource::Demo,
        confidence: DEMO_CONFIDENCE,
    }
}
