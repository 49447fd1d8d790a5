//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. The
//! approximation is accurate within ~10% for BPE tokenizers on English
//! text, which is plenty for budget enforcement; the real tokenizer only
//! sees the final prompt inside the model runtime.

use burrow_core::message::Message;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Estimate tokens for a single stored turn including per-turn overhead.
///
/// Each turn costs ~4 tokens of overhead for the role tag line and
/// surrounding newlines in the rendered prompt.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let overhead = 4;
    overhead + estimate_tokens(&message.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::message::{ConversationId, Role};
    use chrono::Utc;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_tokens("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn hundred_chars() {
        let text = "a".repeat(100);
        assert_eq!(estimate_tokens(&text), 25);
    }

    #[test]
    fn message_includes_overhead() {
        let msg = Message {
            id: 1,
            conversation_id: ConversationId::from("chan-1"),
            role: Role::User,
            author_id: Some("42".into()),
            author_name: Some("alice".into()),
            content: "test".into(), // 4 chars → 1 token + 4 overhead = 5
            created_at: Utc::now(),
            token_count: 1,
        };
        assert_eq!(estimate_message_tokens(&msg), 5);
    }
}
