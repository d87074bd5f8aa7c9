//! # Action Parser
//!
//! Extracts an [`AgentAction`] from raw model output inside the reasoning loop.
//!
//! Accepted shapes:
//!
//! - a plain JSON object, optionally wrapped in markdown code fences;
//! - a JSON object preceded or followed by stray prose.
//!
//! ```text
//! {"type": "tool_call", "name": "pricing_lookup", "arguments": {"service": "SEO audit"}, "thought": "..."}
//! {"type": "final", "content": "...", "citations": ["faq-3"]}
//! ```
//!
//! Malformed citation entries (non-strings, blanks) are dropped rather than
//! failing the whole action.

use verity_core::types::AgentAction;

/// Errors that can occur when parsing an [`AgentAction`] from LLM output.
#[derive(Debug, thiserror::Error)]
pub enum ActionParseError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("unknown action type: {0}")]
    UnknownType(String),
}

const KNOWN_TYPES: &[&str] = &["final", "tool_call"];

/// Parse a raw LLM text response into an [`AgentAction`].
pub fn parse_action(content: &str) -> Result<AgentAction, ActionParseError> {
    let candidate = extract_object(strip_code_fences(content));
    let mut value: serde_json::Value = serde_json::from_str(candidate)?;

    let obj =
        value.as_object_mut().ok_or_else(|| ActionParseError::MissingField("type".to_owned()))?;
    let kind = obj
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ActionParseError::MissingField("type".to_owned()))?
        .to_owned();
    if !KNOWN_TYPES.contains(&kind.as_str()) {
        return Err(ActionParseError::UnknownType(kind));
    }

    if kind == "final" {
        let citations = sanitize_citations(obj.remove("citations"));
        obj.insert("citations".to_owned(), serde_json::Value::from(citations));
    }

    Ok(serde_json::from_value(value)?)
}

fn sanitize_citations(raw: Option<serde_json::Value>) -> Vec<String> {
    let items = match raw {
        Some(serde_json::Value::Array(items)) => items,
        Some(serde_json::Value::String(single)) => vec![serde_json::Value::String(single)],
        _ => return Vec::new(),
    };

    let mut out: Vec<String> = Vec::new();
    for item in items {
        let Some(id) = item.as_str().map(str::trim) else {
            continue;
        };
        if !id.is_empty() && !out.iter().any(|seen| seen == id) {
            out.push(id.to_owned());
        }
    }
    out
}

/// Strip optional markdown code fences and surrounding whitespace.
pub(crate) fn strip_code_fences(input: &str) -> &str {
    let trimmed = input.trim();
    let without_opening = trimmed.strip_prefix("```json").or_else(|| trimmed.strip_prefix("```"));
    match without_opening {
        Some(rest) => rest.strip_suffix("```").unwrap_or(rest).trim(),
        None => trimmed,
    }
}

/// Slice from the first `{` to the last `}` when the text has prose around it.
pub(crate) fn extract_object(input: &str) -> &str {
    if input.starts_with('{') {
        return input;
    }
    match (input.find('{'), input.rfind('}')) {
        (Some(start), Some(end)) if start < end => &input[start..=end],
        _ => input,
    }
}
