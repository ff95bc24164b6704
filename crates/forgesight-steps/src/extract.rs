//! Salvaging structured JSON from conversational model replies.
//!
//! Models asked for "JSON only" still wrap answers in markdown fences or
//! lead-in prose often enough that every structured step funnels replies
//! through the ladder here: strip fences, parse whole, then parse the
//! outermost brace span.

use serde_json::Value;

/// Drop a surrounding markdown code fence, tolerating an info string
/// (```json) on the opening line.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Skip the info string on the opening fence line, if any.
    match body.find('\n') {
        Some(newline) => body[newline + 1..].trim(),
        None => body.trim(),
    }
}

/// The outermost `{ ... }` span of the text, if braces are present.
fn outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Best-effort parse of a JSON object out of a model reply.
///
/// Returns `None` when no object can be recovered; array or scalar
/// replies also count as failures since callers want named fields.
pub fn parse_object(reply: &str) -> Option<Value> {
    let cleaned = strip_code_fences(reply);

    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        if value.is_object() {
            return Some(value);
        }
    }

    let span = outer_object(cleaned)?;
    serde_json::from_str::<Value>(span)
        .ok()
        .filter(Value::is_object)
}
