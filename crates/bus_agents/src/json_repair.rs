//! Lenient JSON extraction for LLM output.
//!
//! Models wrap JSON in prose or markdown fences, leave trailing commas and
//! occasionally stop mid-document. [`parse_lenient`] tries the raw text,
//! then the extracted JSON, then a repaired version of it.

use serde_json::Value;
use tracing::debug;

use crate::error::{AgentError, AgentResult};

/// Pull the JSON payload out of `text`.
///
/// Prefers a fenced ```json block, then the first balanced object or array,
/// then everything from the first opener to the end of the text.
pub fn extract_json(text: &str) -> Option<String> {
    if let Some(fenced) = fenced_block(text) {
        return Some(fenced);
    }

    let start = text.find(['{', '['])?;
    let candidate = &text[start..];
    match balanced_end(candidate) {
        Some(end) => Some(candidate[..end].to_string()),
        None => Some(candidate.trim_end().to_string()),
    }
}

fn fenced_block(text: &str) -> Option<String> {
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let line_end = after.find('\n')?;
        let lang = after[..line_end].trim().to_lowercase();
        let body = &after[line_end + 1..];
        let close = body.find("```").unwrap_or(body.len());
        let content = body[..close].trim();

        let looks_like_json = content.starts_with('{') || content.starts_with('[');
        if lang == "json" || (lang.is_empty() && looks_like_json) {
            return Some(content.to_string());
        }
        if close == body.len() {
            return None;
        }
        rest = &body[close + 3..];
    }
    None
}

/// Byte offset just past the closer matching the opener at position 0.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Best-effort repair of almost-JSON.
///
/// Normalizes smart quotes, drops trailing commas before closers, closes an
/// unterminated string and appends missing closers in stack order.
pub fn repair_json(text: &str) -> String {
    let normalized: String = text
        .trim()
        .chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect();

    let chars: Vec<char> = normalized.chars().collect();
    let mut out = String::with_capacity(chars.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' => {
                stack.push('}');
                out.push(c);
            }
            '[' => {
                stack.push(']');
                out.push(c);
            }
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
                if !matches!(next, Some('}') | Some(']') | None) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }

    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') {
        out.pop();
    }
    if out.ends_with(':') {
        out.push_str(" null");
    }

    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

/// Parse LLM output as JSON, extracting and repairing as needed.
pub fn parse_lenient(text: &str) -> AgentResult<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return Ok(value);
    }

    let extracted = extract_json(text);
    if let Some(candidate) = &extracted {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            debug!("Parsed JSON after extraction");
            return Ok(value);
        }
    }

    let repaired = repair_json(extracted.as_deref().unwrap_or(text));
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => {
            debug!("Parsed JSON after repair");
            Ok(value)
        }
        Err(e) => {
            let snippet: String = text.chars().take(120).collect();
            Err(AgentError::InvalidResponse(format!(
                "could not parse JSON ({}): {}",
                e, snippet
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_from_fence() {
        let text = "Here is the plan:\n```json\n{\"milestones\": [1, 2]}\n```\nThanks!";
        assert_eq!(extract_json(text).unwrap(), "{\"milestones\": [1, 2]}");
    }

    #[test]
    fn test_extract_skips_non_json_fence() {
        let text = "```bash\ncargo run\n```\nthen {\"ok\": true} done";
        assert_eq!(extract_json(text).unwrap(), "{\"ok\": true}");
    }

    #[test]
    fn test_extract_balanced_respects_strings() {
        let text = r#"Result: {"note": "use } and { freely", "n": [1]} trailing {"x": 1}"#;
        assert_eq!(
            extract_json(text).unwrap(),
            r#"{"note": "use } and { freely", "n": [1]}"#
        );
    }

    #[test]
    fn test_extract_unbalanced_runs_to_end() {
        assert_eq!(extract_json("prefix {\"a\": [1, 2").unwrap(), "{\"a\": [1, 2");
        assert!(extract_json("no json here").is_none());
    }

    #[test]
    fn test_repair_trailing_commas() {
        let repaired = repair_json("{\"a\": [1, 2, ], \"b\": 3, }");
        assert_eq!(serde_json::from_str::<Value>(&repaired).unwrap(), json!({"a": [1, 2], "b": 3}));
    }

    #[test]
    fn test_repair_truncated_document() {
        let repaired = repair_json("{\"title\": \"Todo\", \"features\": [\"login\", \"sync");
        assert_eq!(
            serde_json::from_str::<Value>(&repaired).unwrap(),
            json!({"title": "Todo", "features": ["login", "sync"]})
        );

        let repaired = repair_json("{\"a\": 1, \"b\":");
        assert_eq!(serde_json::from_str::<Value>(&repaired).unwrap(), json!({"a": 1, "b": null}));
    }

    #[test]
    fn test_repair_smart_quotes() {
        let repaired = repair_json("{\u{201C}name\u{201D}: \u{201C}agent\u{201D}}");
        assert_eq!(serde_json::from_str::<Value>(&repaired).unwrap(), json!({"name": "agent"}));
    }

    #[test]
    fn test_parse_lenient_order() {
        assert_eq!(parse_lenient(" {\"a\": 1} ").unwrap(), json!({"a": 1}));
        assert_eq!(
            parse_lenient("Sure! ```json\n{\"a\": [1,]}\n```").unwrap(),
            json!({"a": [1]})
        );
        assert!(matches!(
            parse_lenient("I cannot help with that."),
            Err(AgentError::InvalidResponse(_))
        ));
    }
}
