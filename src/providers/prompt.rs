//! Prompt construction for keyword expansion.

use super::ExpansionRequest;

/// Tokens a prompt costs before the seed list.
const PROMPT_OVERHEAD_TOKENS: u64 = 350;
/// Output tokens budgeted per suggestion.
const TOKENS_PER_SUGGESTION: u64 = 40;
/// Upper bound on requested output tokens.
const MAX_OUTPUT_TOKENS: u64 = 16_000;

/// System instruction shared by all expansion models.
pub const SYSTEM_PROMPT: &str = "You are an SEO keyword research assistant. \
Answer with a JSON array only, no prose and no markdown. Each element is an object \
with the fields \"keyword\" (string), \"intent\" (one of informational, navigational, \
commercial, transactional), \"relevance_score\" (number between 0 and 1) and \
\"reasoning\" (one short sentence).";

/// Builds the user message for an expansion request.
pub fn expansion_prompt(request: &ExpansionRequest) -> String {
    let seeds: Vec<&str> = request
        .seed_keywords
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    let mut prompt = format!(
        "Suggest up to {} related search keywords for these seed keywords: {}.\n\
         Target language: {}. Target market: {}.\n\
         Do not repeat the seed keywords. Prefer specific long-tail phrases people actually search for.",
        request.max_suggestions,
        seeds.join(", "),
        request.locale.language,
        request.locale.country.to_ascii_uppercase(),
    );

    if let Some(context) = request.context.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str("\nBusiness context: ");
        prompt.push_str(context);
    }
    prompt
}

/// Output token budget for `max_suggestions` suggestions.
pub fn output_token_budget(max_suggestions: usize) -> u64 {
    let wanted = u64::try_from(max_suggestions).unwrap_or(u64::MAX);
    wanted
        .saturating_mul(TOKENS_PER_SUGGESTION)
        .saturating_add(256)
        .min(MAX_OUTPUT_TOKENS)
}

/// Rough input token count for a prompt.
pub fn estimate_input_tokens(seed_count: usize) -> u64 {
    PROMPT_OVERHEAD_TOKENS + u64::try_from(seed_count).unwrap_or(u64::MAX).saturating_mul(8)
}
