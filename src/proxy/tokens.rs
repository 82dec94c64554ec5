//! Approximate token accounting for when the upstream reports no usage.

use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;

use super::types::{Message, Usage};

fn encoder() -> Option<&'static CoreBPE> {
    static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();
    ENCODER
        .get_or_init(|| match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                tracing::warn!(error = %e, "Tokenizer unavailable, using length estimate");
                None
            }
        })
        .as_ref()
}

/// Token count of a string under cl100k, or roughly one token per four chars.
pub fn count_tokens(text: &str) -> u32 {
    match encoder() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len() as u32,
        None => estimate(text),
    }
}

fn estimate(text: &str) -> u32 {
    text.chars().count().div_ceil(4) as u32
}

/// Estimated usage for a request/response pair.
///
/// The prompt side counts the serialized message list, as sent upstream.
pub fn estimate_usage(messages: &[Message], completion: &str) -> Usage {
    let prompt = serde_json::to_string(messages)
        .map(|s| count_tokens(&s))
        .unwrap_or(0);
    Usage::new(prompt, count_tokens(completion))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::types::Role;

    #[test]
    fn test_estimate_fallback() {
        assert_eq!(estimate(""), 0);
        assert_eq!(estimate("abcd"), 1);
        assert_eq!(estimate("abcde"), 2);
    }

    #[test]
    fn test_count_tokens_nonzero() {
        assert_eq!(count_tokens(""), 0);
        assert!(count_tokens("hello world") >= 2);
    }

    #[test]
    fn test_estimate_usage_totals() {
        let usage = estimate_usage(&[Message::text(Role::User, "what is my name")], "Alice");
        assert!(usage.prompt_tokens > 0);
        assert!(usage.completion_tokens > 0);
        assert_eq!(usage.total_tokens, usage.prompt_tokens + usage.completion_tokens);
    }
}
