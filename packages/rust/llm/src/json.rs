//! Pull JSON out of model output that may be fenced or wrapped in prose.

use paperfeeder_shared::{PaperFeederError, Result};
use serde::de::DeserializeOwned;

/// Locate the JSON payload in a completion.
///
/// Tries, in order: the whole text, the first fenced code block, then the
/// first balanced `{...}` or `[...]` span.
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Some(trimmed);
    }

    if let Some(fenced) = fenced_block(trimmed) {
        if serde_json::from_str::<serde_json::Value>(fenced).is_ok() {
            return Some(fenced);
        }
    }

    balanced_span(trimmed)
}

/// Extract and deserialize the JSON payload of a completion.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let payload = extract_json(text)
        .ok_or_else(|| PaperFeederError::parse(format!("no JSON found in: {}", preview(text))))?;
    serde_json::from_str(payload)
        .map_err(|e| PaperFeederError::parse(format!("{e}: {}", preview(payload))))
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // Skip an info string such as `json`.
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// First span starting at `{` or `[` whose brackets balance, ignoring string contents.
fn balanced_span(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(rel) = text[search_from..].find(|c: char| c == '{' || c == '[') {
        let start = search_from + rel;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (offset, &b) in bytes[start..].iter().enumerate() {
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
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        let candidate = &text[start..=start + offset];
                        if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                            return Some(candidate);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
        search_from = start + 1;
    }
    None
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        score: f32,
        reason: String,
    }

    #[test]
    fn plain_json() {
        let v: Verdict = parse_json(r#"{"score": 7, "reason": "solid"}"#).expect("parse");
        assert_eq!(v.score, 7.0);
    }

    #[test]
    fn fenced_json() {
        let text = "Here you go:\n```json\n{\"score\": 8.5, \"reason\": \"novel\"}\n```\nThanks";
        let v: Verdict = parse_json(text).expect("parse");
        assert_eq!(v, Verdict { score: 8.5, reason: "novel".into() });
    }

    #[test]
    fn prose_wrapped_json_with_braces_in_strings() {
        let text = r#"My verdict is {"score": 3, "reason": "uses {braces} and \"quotes\""} overall."#;
        let v: Verdict = parse_json(text).expect("parse");
        assert_eq!(v.reason, r#"uses {braces} and "quotes""#);
    }

    #[test]
    fn bare_array() {
        let text = "Ranking:\n[{\"id\": \"arxiv:1\"}]";
        assert_eq!(extract_json(text), Some("[{\"id\": \"arxiv:1\"}]"));
    }

    #[test]
    fn no_json_is_a_parse_error() {
        let err = parse_json::<Verdict>("I cannot score this paper.").unwrap_err();
        assert!(matches!(err, PaperFeederError::Parse { .. }));
    }
}
