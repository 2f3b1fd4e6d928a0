//! Structured extraction results and model-answer parsing.
//!
//! Models are asked for a bare JSON object but regularly wrap it in code
//! fences or surround it with prose. [`parse_answer`] strips fences, tries a
//! direct parse, and falls back to the first balanced `{...}` object that
//! parses. [`ExtractionResult::from_value`] then normalizes the object.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{DecoderError, Result};

static LEADING_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_-]*\s*").unwrap());

static TRAILING_FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*```$").unwrap());

/// Maximum characters of a raw answer quoted in error messages.
const ANSWER_PREVIEW_CHARS: usize = 200;

/// Requirements extracted from a job description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractionResult {
    /// Critical required skills and qualifications.
    pub must_have: Vec<String>,
    /// Preferred or optional skills.
    pub nice_to_have: Vec<String>,
    /// ATS-friendly keywords.
    pub keywords: Vec<String>,
    /// Red flags, culture hints, notable benefits.
    pub insights: Vec<String>,
}

impl ExtractionResult {
    /// Normalize a parsed answer object.
    ///
    /// Missing fields become empty. String items are kept, numbers and
    /// booleans are stringified, nulls and nested values are dropped. A field
    /// that is present but not an array is treated as empty.
    pub fn from_value(value: &Value) -> Self {
        Self {
            must_have: string_list(value, "mustHave"),
            nice_to_have: string_list(value, "niceToHave"),
            keywords: string_list(value, "keywords"),
            insights: string_list(value, "insights"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.must_have.is_empty()
            && self.nice_to_have.is_empty()
            && self.keywords.is_empty()
            && self.insights.is_empty()
    }
}

fn string_list(value: &Value, field: &str) -> Vec<String> {
    match value.get(field) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            })
            .collect(),
        Some(other) => {
            warn!(field, kind = json_kind(other), "Answer field is not an array, ignoring");
            Vec::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Remove surrounding code-fence markers (```` ```json ```` / ```` ``` ````).
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let without_leading = LEADING_FENCE_RE.replace(trimmed, "");
    let without_trailing = TRAILING_FENCE_RE.replace(&without_leading, "");
    without_trailing.trim().to_string()
}

/// Parse a model answer into a JSON object.
pub fn parse_answer(text: &str) -> Result<Value> {
    let cleaned = strip_code_fences(text);

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&cleaned) {
        return Ok(value);
    }

    find_first_object(&cleaned).ok_or_else(|| {
        let preview: String = text.chars().take(ANSWER_PREVIEW_CHARS).collect();
        DecoderError::Extraction(format!("Could not parse JSON from response: {preview}"))
    })
}

/// Scan for the first balanced `{...}` span that parses as a JSON object.
///
/// Braces inside string literals are ignored. If a balanced span does not
/// parse, scanning resumes at the next `{`.
fn find_first_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut start = 0;

    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        if let Some(close) = matching_brace(bytes, open) {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&text[open..=close])
            {
                return Some(value);
            }
        }
        start = open + 1;
    }
    None
}

/// Index of the `}` closing the `{` at `open`, honoring JSON string escapes.
fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ANSWER: &str = r#"{"mustHave":["Go","Kubernetes"],"niceToHave":[],"keywords":["Go"],"insights":[]}"#;

    fn expected() -> ExtractionResult {
        ExtractionResult {
            must_have: vec!["Go".into(), "Kubernetes".into()],
            nice_to_have: vec![],
            keywords: vec!["Go".into()],
            insights: vec![],
        }
    }

    #[test]
    fn test_parse_plain_object() {
        let value = parse_answer(ANSWER).unwrap();
        assert_eq!(ExtractionResult::from_value(&value), expected());
    }

    #[test]
    fn test_fenced_answer_parses_like_unwrapped() {
        let fenced = format!("```json\n{ANSWER}\n```");
        assert_eq!(parse_answer(&fenced).unwrap(), parse_answer(ANSWER).unwrap());

        let bare_fence = format!("```\n{ANSWER}\n```");
        assert_eq!(
            parse_answer(&bare_fence).unwrap(),
            parse_answer(ANSWER).unwrap()
        );
    }

    #[test]
    fn test_prose_around_object_is_recovered() {
        let wrapped = format!("Sure! Here is the analysis:\n{ANSWER}\nLet me know if you need more.");
        let value = parse_answer(&wrapped).unwrap();
        assert_eq!(ExtractionResult::from_value(&value), expected());
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse_scan() {
        let text = r#"note {not json} then {"mustHave":["C++ {templates}"],"insights":["uses \"}\" a lot"]} trailing }"#;
        let value = parse_answer(text).unwrap();
        let result = ExtractionResult::from_value(&value);
        assert_eq!(result.must_have, vec!["C++ {templates}"]);
        assert_eq!(result.insights, vec![r#"uses "}" a lot"#]);
    }

    #[test]
    fn test_unparseable_answer_is_extraction_error() {
        let err = parse_answer("I cannot help with that.").unwrap_err();
        assert!(matches!(err, DecoderError::Extraction(_)));
        assert!(err.to_string().contains("I cannot help"));
    }

    #[test]
    fn test_top_level_array_is_not_an_answer() {
        assert!(parse_answer(r#"["Go", "Rust"]"#).is_err());
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let result = ExtractionResult::from_value(&json!({"mustHave": ["Rust"]}));
        assert_eq!(result.must_have, vec!["Rust"]);
        assert!(result.nice_to_have.is_empty());
        assert!(result.keywords.is_empty());
        assert!(result.insights.is_empty());
    }

    #[test]
    fn test_non_string_items_are_normalized() {
        let result = ExtractionResult::from_value(&json!({
            "keywords": ["Go", 5, true, null, {"nested": 1}],
            "insights": "not a list"
        }));
        assert_eq!(result.keywords, vec!["Go", "5", "true"]);
        assert!(result.insights.is_empty());
    }

    #[test]
    fn test_serializes_with_camel_case_fields() {
        let value = serde_json::to_value(expected()).unwrap();
        assert_eq!(value["mustHave"][1], "Kubernetes");
        assert!(value["niceToHave"].is_array());
        assert!(value.get("must_have").is_none());
    }

    #[test]
    fn test_strip_code_fences_leaves_plain_text() {
        assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json {\"a\":1}```"), "{\"a\":1}");
    }
}
