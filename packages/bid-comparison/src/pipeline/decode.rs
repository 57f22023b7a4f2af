//! Typed decoding of model output.
//!
//! Completion text is expected to be a JSON object, but models wrap it in
//! code fences or prose often enough that every stage goes through here.

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;

use crate::error::{ComparisonError, Result};

/// Decode a stage response into `T`.
///
/// Tries the raw text, then the contents of a ```json fence, then the span
/// from the first `{` to the last `}`.
pub fn decode_response<T: DeserializeOwned>(stage: &'static str, text: &str) -> Result<T> {
    let trimmed = text.trim();

    let first_error = match serde_json::from_str::<T>(trimmed) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    if let Some(fenced) = strip_code_fence(trimmed) {
        if let Ok(value) = serde_json::from_str::<T>(fenced) {
            return Ok(value);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<T>(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(ComparisonError::Decode {
        stage,
        reason: first_error.to_string(),
    })
}

fn strip_code_fence(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.rfind("```")?;
    Some(body[..end].trim())
}

/// Parse a money or quantity amount written loosely ("$1,250.00", "1250").
///
/// Returns `None` for placeholders such as "TBD" or "N/A".
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' ' | '\u{a0}'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Serde helper accepting a number, a numeric string, or null.
pub fn lenient_amount<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
        Other(serde_json::Value),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) if n.is_finite() => Ok(Some(n)),
        Some(Raw::Number(_)) => Ok(None),
        Some(Raw::Text(s)) => Ok(parse_amount(&s)),
        Some(Raw::Other(serde_json::Value::Null)) => Ok(None),
        Some(Raw::Other(v)) => Err(de::Error::custom(format!("expected amount, got {}", v))),
    }
}

/// Serde helper accepting a bool or a "true"/"yes" string.
pub fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Bool(b)) => b,
        Some(Raw::Text(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "y"),
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Shape {
        name: String,
        #[serde(default, deserialize_with = "lenient_amount")]
        price: Option<f64>,
    }

    #[test]
    fn test_decodes_fenced_json() {
        let text = "Here you go:\n```json\n{\"name\": \"a\", \"price\": \"$1,200.50\"}\n```";
        let shape: Shape = decode_response("test", text).unwrap();
        assert_eq!(shape.price, Some(1200.5));
    }

    #[test]
    fn test_decodes_embedded_object() {
        let text = "Result: {\"name\": \"b\", \"price\": null} (end)";
        let shape: Shape = decode_response("test", text).unwrap();
        assert_eq!(shape, Shape { name: "b".into(), price: None });
    }

    #[test]
    fn test_garbage_is_typed_error() {
        let err = decode_response::<Shape>("normalization", "not json at all").unwrap_err();
        assert!(matches!(err, ComparisonError::Decode { stage: "normalization", .. }));
    }

    #[test]
    fn test_parse_amount_placeholders() {
        assert_eq!(parse_amount("TBD"), None);
        assert_eq!(parse_amount(" $42,000 "), Some(42000.0));
        assert_eq!(parse_amount(""), None);
    }
}
