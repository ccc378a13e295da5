//! Robust JSON extraction and repair for model output.
//!
//! Models wrap JSON in markdown fences, preface it with prose, leave
//! trailing commas, forget to quote keys, or stop mid-object at the token
//! limit. The parser here peels the wrappers, attempts a strict parse, then
//! applies targeted repairs before giving up with a typed error.

use crate::error::{LlmError, Result};
use serde_json::Value;
use tracing::debug;

/// Parse model output into a JSON value, repairing common defects.
///
/// The pipeline: strict parse of the extracted JSON span; on failure,
/// repair (trailing commas, unquoted keys, truncation) and re-parse.
pub fn parse_lenient(output: &str) -> Result<Value> {
    let candidate = extract_json(output)
        .ok_or_else(|| LlmError::ParseFailure("no JSON object or array found".to_string()))?;

    if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
        return Ok(value);
    }

    let repaired = repair_json(&candidate);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => {
            debug!("model output required JSON repair");
            Ok(value)
        }
        Err(e) => Err(LlmError::ParseFailure(format!(
            "JSON unrecoverable after repair: {}",
            e
        ))),
    }
}

/// Extract the JSON span from wrapped output.
///
/// Prefers a fenced block when present; otherwise scans from the first `{`
/// or `[` to its balanced close, string-aware. Returns the span even when
/// unbalanced (truncated output) so the repair pass can close it.
pub fn extract_json(output: &str) -> Option<String> {
    // Fenced block first: ```json ... ``` or bare ``` ... ```.
    if let Some(fence_start) = output.find("```") {
        let after = &output[fence_start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        let body = match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        };
        let trimmed = body.trim();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            return Some(trimmed.to_string());
        }
    }

    let start = output.find(['{', '['])?;
    let bytes = output.as_bytes();
    let open = bytes[start] as char;
    let close = if open == '{' { '}' } else { ']' };

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in output[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            c if !in_string && (c == '{' || c == '[') => depth += 1,
            c if !in_string && (c == '}' || c == ']') => {
                depth -= 1;
                if depth == 0 && c == close {
                    return Some(output[start..start + i + c.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }

    // Unbalanced: hand the truncated tail to the repair pass.
    Some(output[start..].trim_end().to_string())
}

/// Repair common JSON defects: trailing commas, unquoted keys, a trailing
/// comment, and truncation (unclosed strings, objects, arrays).
pub fn repair_json(candidate: &str) -> String {
    let mut repaired = strip_line_comments(candidate);
    repaired = quote_bare_keys(&repaired);
    repaired = strip_trailing_commas(&repaired);
    close_truncated(&repaired)
}

/// Remove `//` comments outside strings.
fn strip_line_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let mut in_string = false;
        let mut escaped = false;
        let mut cut = line.len();
        let mut prev: Option<char> = None;
        for (i, c) in line.char_indices() {
            if escaped {
                escaped = false;
                prev = Some(c);
                continue;
            }
            match c {
                '\\' if in_string => escaped = true,
                '"' => in_string = !in_string,
                '/' if !in_string && prev == Some('/') => {
                    cut = i - 1;
                    break;
                }
                _ => {}
            }
            prev = Some(c);
        }
        out.push_str(line[..cut].trim_end());
        out.push('\n');
    }
    out
}

/// Quote bare object keys (`key:` → `"key":`), outside strings.
fn quote_bare_keys(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    let mut in_string = false;
    let mut escaped = false;
    // A bare key can follow '{' or ',' (ignoring whitespace).
    let mut expecting_key = false;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                expecting_key = false;
                out.push(c);
                i += 1;
            }
            '{' | ',' => {
                expecting_key = true;
                out.push(c);
                i += 1;
            }
            c if c.is_whitespace() => {
                out.push(c);
                i += 1;
            }
            c if expecting_key && (c.is_ascii_alphabetic() || c == '_') => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let mut j = i;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if j < chars.len() && chars[j] == ':' {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else {
                    // Not a key (true/false/null/number in an array slot).
                    out.push_str(&word);
                }
                expecting_key = false;
            }
            _ => {
                expecting_key = false;
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Remove commas that directly precede a closing brace/bracket.
fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                    // Drop the trailing comma.
                } else {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Close an output truncated mid-string or mid-structure.
fn close_truncated(text: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => stack.push(c),
            '}' | ']' if !in_string => {
                stack.pop();
            }
            _ => {}
        }
    }

    if stack.is_empty() && !in_string {
        return text.to_string();
    }

    let mut out = text.trim_end().to_string();
    if in_string {
        out.push('"');
    }
    // A dangling `"key":` or trailing comma would still break the parse.
    let tail: String = out
        .chars()
        .rev()
        .take_while(|c| !matches!(c, '{' | '[' | ',' | '}' | ']' | '"'))
        .collect();
    if out.trim_end().ends_with(':') || tail.trim().ends_with(':') {
        out.push_str("null");
    }
    while out.trim_end().ends_with(',') {
        out = out.trim_end().to_string();
        out.pop();
    }
    while let Some(open) = stack.pop() {
        out.push(if open == '{' { '}' } else { ']' });
    }
    out
}
