//! Pull a JSON object out of generated text and decode it into a typed output.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").unwrap());

/// Locate the JSON object inside a model response.
///
/// Handles bare objects, markdown code fences, and prose around the object.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    if let Some(caps) = FENCED_BLOCK.captures(trimmed) {
        if let Some(inner) = caps.get(1) {
            let inner = inner.as_str().trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// Decode `T` from a model response, or `Err` with the reason it failed.
pub fn parse_output<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let json = extract_json_object(text).ok_or_else(|| "no JSON object found".to_string())?;
    serde_json::from_str(json).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        score: u8,
    }

    #[test]
    fn extract_bare_object() {
        assert_eq!(extract_json_object(" {\"a\":1} "), Some("{\"a\":1}"));
    }

    #[test]
    fn extract_from_markdown() {
        let text = "Here you go:\n```json\n{\"score\": 7}\n```\nThanks";
        assert_eq!(extract_json_object(text), Some("{\"score\": 7}"));
    }

    #[test]
    fn extract_with_surrounding_prose() {
        let text = "Result: {\"score\": 3} hope that helps";
        assert_eq!(parse_output::<Sample>(text).unwrap(), Sample { score: 3 });
    }

    #[test]
    fn missing_object_is_an_error() {
        assert!(parse_output::<Sample>("I cannot help with that").is_err());
        assert!(parse_output::<Sample>("{\"score\": \"high\"}").is_err());
    }
}
