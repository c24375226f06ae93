//! Tolerant extraction of structured data from model output.
//!
//! Language models wrap JSON in markdown fences, surround it with prose and
//! get cut off at their output limit. Extraction runs these stages until one
//! yields a value:
//!
//! 1. strip markdown fences;
//! 2. parse directly;
//! 3. isolate a balanced array (string and escape aware), preferring the first
//!    one that holds keyword items over earlier bracketed prose such as `[5]`;
//! 4. for a truncated array, cut back to the last complete element and close it;
//! 5. salvage every complete top-level object inside the array.
//!
//! The decoded [`LlmPayload`] is then normalized into keyword items by
//! [`normalize_payload`], and items without a usable `keyword` are dropped.

use serde_json::{Map, Value};

use crate::errors::{GatewayError, GatewayResult};

/// Field names checked, in order, for the item array of a wrapper object.
const ITEM_FIELDS: [&str; 4] = ["keywords", "suggestions", "results", "data"];

/// Opening brackets tried before giving up on finding a keyword array.
const MAX_ARRAY_CANDIDATES: usize = 16;

/// Shape of decoded model output.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmPayload {
    /// A JSON array of items.
    Array(Vec<Value>),
    /// A JSON object, either a wrapper or a single item.
    Object(Map<String, Value>),
    /// Text that did not decode as a whole.
    Text(String),
}

/// Removes a markdown code fence, keeping what is inside it.
///
/// An opening fence without a closing one (truncated output) keeps
/// everything after the opening line.
pub fn strip_fences(raw: &str) -> &str {
    let Some(open) = raw.find("```") else {
        return raw.trim();
    };
    let after_open = &raw[open + 3..];
    let body = match after_open.find('\n') {
        Some(newline) => &after_open[newline + 1..],
        None => after_open,
    };
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Decodes model output into a payload.
pub fn decode_payload(raw: &str) -> LlmPayload {
    let text = strip_fences(raw);

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        match value {
            Value::Array(items) => return LlmPayload::Array(items),
            Value::Object(map) => return LlmPayload::Object(map),
            Value::String(inner) => return LlmPayload::Text(inner),
            _ => {}
        }
    }

    let mut first_array = None;
    for (start, _) in text.match_indices('[').take(MAX_ARRAY_CANDIDATES) {
        let Some(items) = recover_array(text, start) else {
            continue;
        };
        if items.iter().any(is_keyword_item) {
            return LlmPayload::Array(items);
        }
        first_array.get_or_insert(items);
    }

    match first_array {
        Some(items) => LlmPayload::Array(items),
        None => LlmPayload::Text(text.to_string()),
    }
}

/// True if `value` would survive item validation.
fn is_keyword_item(value: &Value) -> bool {
    let keyword = match value {
        Value::String(keyword) => Some(keyword.as_str()),
        Value::Object(map) => map.get("keyword").and_then(Value::as_str),
        _ => None,
    };
    keyword.is_some_and(|k| !k.trim().is_empty())
}

/// Recovers a JSON value from model output, or `None`.
pub fn extract_json(raw: &str) -> Option<Value> {
    match decode_payload(raw) {
        LlmPayload::Array(items) => Some(Value::Array(items)),
        LlmPayload::Object(map) => Some(Value::Object(map)),
        LlmPayload::Text(text) => {
            let start = text.find('{')?;
            let end = balanced_end(&text, start)?;
            serde_json::from_str(&text[start..end]).ok()
        }
    }
}

/// Flattens a payload into candidate items.
pub fn normalize_payload(payload: LlmPayload) -> Vec<Value> {
    match payload {
        LlmPayload::Array(items) => items,
        LlmPayload::Object(map) => items_from_object(map),
        LlmPayload::Text(text) => salvage_objects(&text, 0, text.len())
            .into_iter()
            .flat_map(items_from_object)
            .collect(),
    }
}

/// Extracts keyword items from model output.
///
/// Bare strings become `{"keyword": ...}`. Items without a non-empty
/// `keyword` are dropped; only an empty result is an error.
pub fn extract_keyword_items(provider: &str, raw: &str) -> GatewayResult<Vec<Map<String, Value>>> {
    let candidates = normalize_payload(decode_payload(raw));
    let total = candidates.len();

    let items: Vec<Map<String, Value>> = candidates.into_iter().filter_map(validate_item).collect();

    if items.len() < total {
        tracing::debug!(
            provider,
            kept = items.len(),
            dropped = total - items.len(),
            "Dropped invalid keyword items"
        );
    }

    if items.is_empty() {
        return Err(GatewayError::parse(
            provider,
            "no keyword items could be recovered from model output",
            raw,
        ));
    }
    Ok(items)
}

fn validate_item(item: Value) -> Option<Map<String, Value>> {
    match item {
        Value::String(keyword) => {
            let keyword = keyword.trim();
            (!keyword.is_empty()).then(|| {
                let mut map = Map::new();
                map.insert("keyword".to_string(), Value::String(keyword.to_string()));
                map
            })
        }
        Value::Object(mut map) => {
            let keyword = map.get("keyword")?.as_str()?.trim().to_string();
            if keyword.is_empty() {
                return None;
            }
            map.insert("keyword".to_string(), Value::String(keyword));
            Some(map)
        }
        _ => None,
    }
}

fn items_from_object(mut map: Map<String, Value>) -> Vec<Value> {
    for field in ITEM_FIELDS {
        if let Some(Value::Array(_)) = map.get(field) {
            if let Some(Value::Array(items)) = map.remove(field) {
                return items;
            }
        }
    }

    let any_array = map
        .iter()
        .find_map(|(key, value)| value.is_array().then(|| key.clone()));
    if let Some(key) = any_array {
        if let Some(Value::Array(items)) = map.remove(&key) {
            return items;
        }
    }

    if map.contains_key("keyword") {
        vec![Value::Object(map)]
    } else {
        Vec::new()
    }
}

/// Positions found while walking an array from its opening bracket.
#[derive(Debug, Default)]
struct ArrayScan {
    /// Byte offset just past the matching `]`.
    end: Option<usize>,
    /// Byte offset just past the last complete top-level element.
    last_complete: Option<usize>,
}

fn scan_array(text: &str, start: usize) -> ArrayScan {
    let mut scan = ArrayScan::default();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        let idx = start + offset;
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                match depth {
                    0 => {
                        scan.end = Some(idx + 1);
                        break;
                    }
                    1 => scan.last_complete = Some(idx + 1),
                    _ => {}
                }
            }
            // A top-level comma ends the element before it.
            ',' if depth == 1 => scan.last_complete = Some(idx),
            _ => {}
        }
    }
    scan
}

fn recover_array(text: &str, start: usize) -> Option<Vec<Value>> {
    let scan = scan_array(text, start);

    let region_end = match scan.end {
        Some(end) => {
            if let Ok(Value::Array(items)) = serde_json::from_str(&text[start..end]) {
                return Some(items);
            }
            end
        }
        None => {
            if let Some(cut) = scan.last_complete {
                let body = text[start..cut].trim_end().trim_end_matches(',');
                let closed = format!("{body}]");
                if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&closed) {
                    if !items.is_empty() {
                        tracing::debug!(recovered = items.len(), "Closed truncated JSON array");
                        return Some(items);
                    }
                }
            }
            text.len()
        }
    };

    let salvaged: Vec<Value> = salvage_objects(text, start + 1, region_end)
        .into_iter()
        .map(Value::Object)
        .collect();
    (!salvaged.is_empty()).then_some(salvaged)
}

/// Parses every complete, well-formed object in `text[from..to]` that is not
/// nested in another object.
fn salvage_objects(text: &str, from: usize, to: usize) -> Vec<Map<String, Value>> {
    let mut objects = Vec::new();
    let mut pos = from;

    while pos < to {
        let Some(rel) = text[pos..to].find('{') else {
            break;
        };
        let open = pos + rel;
        match balanced_end(&text[..to], open) {
            Some(close) => {
                if let Ok(Value::Object(map)) = serde_json::from_str(&text[open..close]) {
                    objects.push(map);
                }
                pos = close;
            }
            None => break,
        }
    }
    objects
}

/// Byte offset just past the bracket closing the one at `start`.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(start + offset + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}
