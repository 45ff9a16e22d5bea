//! Flexible JSON unmarshalling for model output (§7 "Model mis-formatted
//! output", §9 "Structured-output flexibility").
//!
//! The model can return almost-JSON: wrapped in a markdown code fence,
//! double-encoded as a JSON string, or with trailing commas / unquoted
//! keys / single quotes. `parse_flexible` tries, in order: direct parse,
//! string-unwrap, a repair pass, then parse again — only after all three
//! fail does the caller see an error.

use serde::de::DeserializeOwned;

/// Attempts direct parse, then string-unwrap, then repair+parse.
pub fn parse_flexible<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    if let Ok(value) = serde_json::from_str::<T>(raw) {
        return Ok(value);
    }

    if let Ok(unwrapped) = serde_json::from_str::<String>(raw) {
        if let Ok(value) = serde_json::from_str::<T>(&unwrapped) {
            return Ok(value);
        }
    }

    let repaired = repair(raw);
    serde_json::from_str::<T>(&repaired)
        .map_err(|e| format!("unparseable after repair: {e} (repaired: {repaired})"))
}

/// Best-effort repair of common malformed-JSON patterns emitted by LLMs:
/// markdown code fences, trailing commas, and single-quoted strings.
/// Idempotent: `repair(repair(x)) == repair(x)` for any `x` (§8).
pub fn repair(raw: &str) -> String {
    let trimmed = strip_code_fence(raw.trim());
    let no_trailing_commas = strip_trailing_commas(trimmed);
    requote_single_quotes(&no_trailing_commas)
}

fn strip_code_fence(s: &str) -> &str {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix("```") {
        let rest = rest
            .strip_prefix("json")
            .or_else(|| rest.strip_prefix("JSON"))
            .unwrap_or(rest);
        let rest = rest.strip_prefix('\n').unwrap_or(rest);
        if let Some(body) = rest.strip_suffix("```") {
            return body.trim();
        }
        return rest.trim();
    }
    s
}

fn strip_trailing_commas(s: &str) -> String {
    lazy_static::lazy_static! {
        static ref TRAILING_COMMA_RE: regex::Regex =
            regex::Regex::new(r",\s*([}\]])").unwrap();
    }
    TRAILING_COMMA_RE.replace_all(s, "$1").into_owned()
}

/// Re-quotes unambiguous single-quoted JSON strings to double quotes.
/// Deliberately conservative: only runs when the text contains no double
/// quotes at all, to avoid mangling apostrophes inside already-valid JSON.
fn requote_single_quotes(s: &str) -> String {
    if s.contains('"') {
        return s.to_string();
    }
    s.replace('\'', "\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Payload {
        duplicates: Vec<String>,
    }

    #[test]
    fn direct_parse_succeeds_on_clean_json() {
        let raw = r#"{"duplicates": ["a", "b"]}"#;
        let parsed: Payload = parse_flexible(raw).unwrap();
        assert_eq!(parsed.duplicates, vec!["a", "b"]);
    }

    #[test]
    fn string_unwrap_handles_double_encoded_json() {
        let inner = r#"{"duplicates": ["a"]}"#;
        let double_encoded = serde_json::to_string(inner).unwrap();
        let parsed: Payload = parse_flexible(&double_encoded).unwrap();
        assert_eq!(parsed.duplicates, vec!["a"]);
    }

    #[test]
    fn repair_strips_code_fence_and_trailing_comma() {
        let raw = "```json\n{\"duplicates\": [\"a\", \"b\",]}\n```";
        let parsed: Payload = parse_flexible(raw).unwrap();
        assert_eq!(parsed.duplicates, vec!["a", "b"]);
    }

    #[test]
    fn repair_is_idempotent() {
        let raw = "```json\n{\"duplicates\": [\"a\",]}\n```";
        let once = repair(raw);
        let twice = repair(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn unparseable_input_errors() {
        let result = parse_flexible::<Payload>("not json at all {{{");
        assert!(result.is_err());
    }
}
