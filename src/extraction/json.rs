//! Pulls the JSON payload out of free-form model output.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no JSON object found in response")]
    NoJsonObject,
    #[error("invalid JSON in response: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("unexpected response shape: {0}")]
    Shape(String),
}

/// Returns the first balanced top-level `{...}` block in `text`.
///
/// Braces inside JSON string literals are ignored, so prose or markdown fences
/// around the object do not matter.
pub fn find_json_object(text: &str) -> Option<&str> {
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
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Extracts and parses the embedded JSON object.
pub fn extract_json_object(text: &str) -> Result<Map<String, Value>, ParseError> {
    let block = find_json_object(text).ok_or(ParseError::NoJsonObject)?;

    match serde_json::from_str::<Value>(block)? {
        Value::Object(map) => Ok(map),
        other => Err(ParseError::Shape(format!("expected object, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_object_surrounded_by_prose() {
        let text = "Ecco i dati:\n```json\n{\"company_name\": \"Rossi Srl\", \"city\": null}\n```\nFine.";
        let map = extract_json_object(text).unwrap();
        assert_eq!(map["company_name"], "Rossi Srl");
        assert!(map["city"].is_null());
    }

    #[test]
    fn test_takes_first_top_level_object_only() {
        let text = r#"{"a": {"b": 1}} and later {"c": 2}"#;
        assert_eq!(find_json_object(text), Some(r#"{"a": {"b": 1}}"#));
    }

    #[test]
    fn test_ignores_braces_inside_strings() {
        let text = r#"{"raw_text": "IMPRESA {ESECUTRICE} \"quoted\" }", "x": 1}"#;
        let map = extract_json_object(text).unwrap();
        assert_eq!(map["x"], 1);
        assert_eq!(map["raw_text"], "IMPRESA {ESECUTRICE} \"quoted\" }");
    }

    #[test]
    fn test_missing_object_is_parse_error() {
        assert!(matches!(
            extract_json_object("Non riesco a leggere il cartello."),
            Err(ParseError::NoJsonObject)
        ));
        assert!(matches!(
            extract_json_object("{\"unterminated\": true"),
            Err(ParseError::NoJsonObject)
        ));
    }

    #[test]
    fn test_malformed_object_is_parse_error() {
        assert!(matches!(
            extract_json_object("{company_name: Rossi}"),
            Err(ParseError::InvalidJson(_))
        ));
    }
}
