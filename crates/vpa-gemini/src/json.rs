//! Recovering a JSON object from model text.

/// Slice of `text` spanning the outermost `{ ... }`.
///
/// Handles code fences and prose around the object by taking everything from
/// the first `{` to the last `}`. Returns `None` when no such span exists.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Parse model text into `T`, falling back to the whole text when no braces are found.
pub fn parse_model_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    let candidate = extract_json_object(text).unwrap_or_else(|| text.trim());
    serde_json::from_str(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_object() {
        assert_eq!(extract_json_object(r#"{"a":1}"#), Some(r#"{"a":1}"#));
    }

    #[test]
    fn test_code_fence_and_prose() {
        let text = "Here you go:\n```json\n{\"results\": [{\"kpi_name\": \"CTR\"}]}\n```\nThanks";
        assert_eq!(
            extract_json_object(text),
            Some("{\"results\": [{\"kpi_name\": \"CTR\"}]}")
        );
    }

    #[test]
    fn test_no_object() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn test_parse_model_json() {
        let v: serde_json::Value = parse_model_json("```json\n{\"x\": 2}\n```").unwrap();
        assert_eq!(v["x"], 2);
        assert!(parse_model_json::<serde_json::Value>("not json").is_err());
    }
}
