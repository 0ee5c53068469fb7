//! Response parser for model output.
//!
//! Model text may arrive fenced in Markdown, wrapped in an instruction
//! array (`[{"instruction": .., "output": {..}}]`), as a bare object, or
//! with prose around the JSON. Extraction is attempted in order and the
//! first success wins; when nothing parses the cleaned text is returned as
//! [`AnalysisResult::Raw`] so the round still completes.

use serde_json::Value;
use tracing::debug;

use crate::verdict::{AnalysisResult, Verdict};

/// Nested JSON-in-a-string unwrapping stops after this many levels.
const MAX_UNWRAP_DEPTH: usize = 4;

/// Parse raw model text into a round result.
pub fn parse_response(raw: &str) -> AnalysisResult {
    let cleaned = strip_code_fences(raw);

    match locate_json(&cleaned).and_then(|value| unwrap_output(value, 0)) {
        Some(verdict) => AnalysisResult::Structured(verdict),
        None => {
            debug!(
                preview = %cleaned.chars().take(80).collect::<String>(),
                "No structured verdict found, keeping raw text"
            );
            AnalysisResult::Raw(cleaned)
        }
    }
}

/// Remove Markdown code-fence markers and surrounding whitespace.
pub fn strip_code_fences(raw: &str) -> String {
    raw.replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Find a JSON value in cleaned text: the whole text, then the first
/// balanced object, then the widest `{...}` slice.
fn locate_json(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }

    if let Some(candidate) = first_balanced_object(text) {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return Some(value);
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end]).ok()
}

/// First `{...}` substring whose braces balance, ignoring braces inside
/// JSON string literals.
pub fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

fn unwrap_output(value: Value, depth: usize) -> Option<Verdict> {
    if depth > MAX_UNWRAP_DEPTH {
        return None;
    }

    match value {
        Value::Array(items) => {
            let first = items.into_iter().next()?;
            unwrap_output(first, depth + 1)
        }
        Value::Object(mut object) => match object.remove("output") {
            Some(inner) => unwrap_output(inner, depth + 1),
            None => Some(Verdict::from_object(object)),
        },
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                let nested = serde_json::from_str::<Value>(trimmed).ok()?;
                unwrap_output(nested, depth + 1)
            } else {
                None
            }
        }
        _ => None,
    }
}
