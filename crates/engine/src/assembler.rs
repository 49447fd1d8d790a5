//! Context assembler — builds the model prompt from stored history.
//!
//! The prompt opens with the persona instruction block, then replays as
//! many recent turns as the token budget allows, oldest first, and ends
//! with a bare assistant tag cueing the model to answer.
//!
//! Budget enforcement walks the history newest → oldest, keeping turns
//! until the budget is exhausted; emission is chronological so the model
//! reads the conversation in order. Assembly is deterministic: identical
//! inputs always produce identical prompts.

use burrow_core::message::{Message, Role};
use burrow_core::prompt::{render_turn, ASSISTANT_TAG};

use crate::token::{estimate_message_tokens, estimate_tokens};

/// Smallest slice of the newest turn kept when the budget has no room
/// left for history at all.
const MIN_TURN_CHARS: usize = 16;

/// Builds prompts within a fixed token budget.
pub struct ContextAssembler {
    system_prompt: String,
    /// Tokens available for the whole prompt (context window minus the
    /// headroom reserved for the model's own output).
    budget: usize,
}

/// An assembled prompt plus accounting for logs and tests.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub text: String,
    pub token_estimate: usize,
    pub turns_included: usize,
    pub turns_dropped: usize,
}

impl ContextAssembler {
    pub fn new(system_prompt: &str, budget: usize) -> Self {
        Self {
            system_prompt: system_prompt.to_string(),
            budget,
        }
    }

    /// Assemble a prompt from `history`, assumed oldest-first as returned
    /// by the store.
    pub fn assemble(&self, history: &[Message]) -> AssembledPrompt {
        let system_block = render_turn(Role::System, None, &self.system_prompt);
        let cue_tokens = estimate_tokens(ASSISTANT_TAG) + 1;
        let fixed = estimate_tokens(&system_block) + cue_tokens;
        let history_budget = self.budget.saturating_sub(fixed);

        // Newest → oldest: keep turns while they fit.
        let mut included_rev: Vec<&Message> = Vec::new();
        let mut used = 0usize;
        for message in history.iter().rev() {
            let cost = estimate_message_tokens(message);
            if used + cost > history_budget {
                break;
            }
            used += cost;
            included_rev.push(message);
        }

        let mut text = system_block;
        text.push('\n');

        // A single turn bigger than the whole budget would otherwise leave
        // the prompt with no history at all; truncate its tail instead.
        // The floor keeps the newest turn present even when the
        // instruction block alone consumes the entire budget.
        if included_rev.is_empty() {
            if let Some(newest) = history.last() {
                let keep_chars = history_budget
                    .saturating_sub(4)
                    .saturating_mul(4)
                    .max(MIN_TURN_CHARS);
                let truncated = truncate_chars(&newest.content, keep_chars);
                text.push_str(&render_turn(
                    newest.role,
                    newest.author_name.as_deref(),
                    &truncated,
                ));
                text.push('\n');
                included_rev.push(newest);
            }
        } else {
            for message in included_rev.iter().rev() {
                text.push_str(&render_turn(
                    message.role,
                    message.author_name.as_deref(),
                    &message.content,
                ));
                text.push('\n');
            }
        }

        text.push_str(ASSISTANT_TAG);
        text.push('\n');

        let turns_included = included_rev.len();
        AssembledPrompt {
            token_estimate: estimate_tokens(&text),
            text,
            turns_included,
            turns_dropped: history.len() - turns_included,
        }
    }
}

/// Cut a string to at most `max` bytes on a char boundary.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
