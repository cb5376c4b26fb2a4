//! Parsing JSON out of model replies

use serde_json::Value;

/// Parse a model reply as JSON.
///
/// Models often wrap JSON in a Markdown code fence; a single surrounding
/// fence (with or without a language tag) is removed before parsing. Anything
/// else around the payload makes the reply invalid.
pub fn parse_model_json(raw: &str) -> Option<Value> {
    serde_json::from_str(strip_code_fence(raw)).ok()
}

/// Remove one surrounding Markdown code fence, if present
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the language tag line (```json)
    match body.split_once('\n') {
        Some((tag, payload)) if !tag.trim_start().starts_with(['{', '[']) => payload.trim(),
        _ => body.trim(),
    }
}
