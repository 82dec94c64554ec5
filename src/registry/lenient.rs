//! Lenient parser for JavaScript object literals embedded in front-end bundles.
//!
//! Bundles declare the model table as something like
//! `models:[{model:'gpt-4o',name:"GPT-4o",support:'image',/* hot */},]`. This is
//! not JSON: keys are bare, strings may be single-quoted, comments and trailing
//! commas are allowed, and minifiers emit `!0`/`!1` for booleans. [`normalize`]
//! rewrites such a literal into strict JSON so `serde_json` can take it from there.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn models_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"models\s*:\s*\[([^\]]+)\]").ok())
        .as_ref()
}

/// Locate the body of the first `models: [...]` literal in a page.
pub fn find_models_literal(page: &str) -> Option<&str> {
    models_pattern()?
        .captures(page)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Parse the body of a `models: [...]` literal into a list of objects.
///
/// Returns `None` when the literal cannot be repaired into JSON or holds no
/// non-empty object.
pub fn parse_models_literal(body: &str) -> Option<Vec<Value>> {
    let json = format!("[{}]", normalize(body));
    let parsed: Vec<Value> = match serde_json::from_str(&json) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "Models literal is not repairable");
            return None;
        }
    };

    let objects: Vec<Value> = parsed
        .into_iter()
        .filter(|v| v.as_object().is_some_and(|o| !o.is_empty()))
        .collect();

    (!objects.is_empty()).then_some(objects)
}

/// Rewrite a JavaScript object/array literal into strict JSON.
///
/// Comments outside strings are stripped first, then:
/// - bare identifiers followed by `:` become quoted keys
/// - single-quoted strings become double-quoted (inner `"` escaped)
/// - a `,` directly before `]` or `}` is dropped
/// - `!0`/`!1` become `true`/`false`, other bare words become strings
pub fn normalize(src: &str) -> String {
    let chars = strip_comments(src);
    let mut out = String::with_capacity(src.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                i = copy_string(&chars, i, &mut out);
            }
            ',' => {
                let next = next_significant(&chars, i + 1);
                if !matches!(next, Some(']') | Some('}') | None) {
                    out.push(',');
                }
                i += 1;
            }
            '!' if matches!(chars.get(i + 1), Some('0') | Some('1')) => {
                out.push_str(if chars[i + 1] == '0' { "true" } else { "false" });
                i += 2;
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let is_key = next_significant(&chars, i) == Some(':');
                if is_key || !matches!(word.as_str(), "true" | "false" | "null") {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else {
                    out.push_str(&word);
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// Drop `//` and `/* */` comments that sit outside string literals.
fn strip_comments(src: &str) -> Vec<char> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::with_capacity(chars.len());
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(&escaped) = chars.get(i + 1) {
                    out.push(escaped);
                    i += 1;
                }
            } else if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        match (c, chars.get(i + 1)) {
            ('/', Some('/')) => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            ('/', Some('*')) => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            ('"', _) | ('\'', _) => {
                quote = Some(c);
                out.push(c);
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// Copy a quoted string starting at `start` as a double-quoted JSON string.
/// Returns the index just past the closing quote.
fn copy_string(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    out.push('"');
    while i < chars.len() && chars[i] != quote {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                // \' is not a valid JSON escape
                if chars[i + 1] == '\'' {
                    out.push('\'');
                } else {
                    out.push('\\');
                    out.push(chars[i + 1]);
                }
                i += 2;
                continue;
            }
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
        i += 1;
    }
    out.push('"');
    i + 1
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars[from.min(chars.len())..]
        .iter()
        .copied()
        .find(|c| !c.is_whitespace())
}
