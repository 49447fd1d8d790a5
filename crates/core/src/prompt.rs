//! Prompt tag scheme shared by the context assembler and the runtime.
//!
//! Instruct-tuned GGUF chat models in this family are prompted with plain
//! role tags, one turn per block:
//!
//! ```text
//! ### instruction:
//! You are a helpful assistant named Burrow.
//!
//! ### user: alice
//! hello there
//!
//! ### assistant:
//! ```
//!
//! The trailing bare `### assistant:` cue tells the model whose turn it is.
//! The runtime cuts generation at the first `### user:` the model emits.

use crate::message::Role;

/// Tag opening a system/persona block.
pub const INSTRUCTION_TAG: &str = "### instruction:";

/// Tag opening a user turn; the author name follows on the same line.
pub const USER_TAG: &str = "### user:";

/// Tag opening an assistant turn, and the generation cue.
pub const ASSISTANT_TAG: &str = "### assistant:";

/// Tag for a role, without author suffix.
pub fn tag_for(role: Role) -> &'static str {
    match role {
        Role::System => INSTRUCTION_TAG,
        Role::User => USER_TAG,
        Role::Assistant => ASSISTANT_TAG,
    }
}

/// Render one turn as a tagged block. User turns carry the author name on
/// the tag line so the model can tell speakers apart in group channels.
pub fn render_turn(role: Role, author_name: Option<&str>, content: &str) -> String {
    match (role, author_name) {
        (Role::User, Some(name)) => format!("{USER_TAG} {name}\n{content}\n"),
        (role, _) => format!("{}\n{content}\n", tag_for(role)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_turn_carries_author_on_tag_line() {
        let block = render_turn(Role::User, Some("alice"), "hello");
        assert_eq!(block, "### user: alice\nhello\n");
    }

    #[test]
    fn assistant_turn_has_bare_tag() {
        let block = render_turn(Role::Assistant, None, "hi");
        assert_eq!(block, "### assistant:\nhi\n");
    }

    #[test]
    fn system_turn_uses_instruction_tag() {
        let block = render_turn(Role::System, None, "be terse");
        assert!(block.starts_with("### instruction:\n"));
    }
}
