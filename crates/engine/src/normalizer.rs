//! Message normalizer — turns raw gateway events into stored turns.
//!
//! Every inbound event is either converted to a [`NewMessage`] (with a
//! flag saying whether the agent should reply) or dropped with a reason.
//! The agent listens passively: messages that don't trigger a reply are
//! still persisted so later prompts carry the full channel context.

use burrow_core::gateway::GatewayEvent;
use burrow_core::message::{ConversationId, NewMessage};

use crate::token::estimate_tokens;

/// Result of classifying one inbound event.
#[derive(Debug)]
pub enum Intake {
    /// Persist this turn; reply if `wants_reply`.
    Message {
        message: NewMessage,
        wants_reply: bool,
    },

    /// Discard the event entirely.
    Drop(DropReason),
}

/// Why an event was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The agent's own outbound message echoed back.
    SelfAuthor,
    /// Another automated account.
    BotAuthor,
    /// Nothing left after stripping mention markup.
    Empty,
    /// Sender not on the allowlist.
    DisallowedSender,
    /// Channel excluded by the channel filter.
    FilteredChannel,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::SelfAuthor => "self_author",
            DropReason::BotAuthor => "bot_author",
            DropReason::Empty => "empty",
            DropReason::DisallowedSender => "disallowed_sender",
            DropReason::FilteredChannel => "filtered_channel",
        }
    }
}

/// Classifies inbound events against the agent's identity and filters.
pub struct Normalizer {
    self_id: String,
    allowed_users: Vec<String>,
    channel_filter: Vec<String>,
}

impl Normalizer {
    /// `allowed_users` and `channel_filter` empty mean "no restriction".
    pub fn new(self_id: &str, allowed_users: Vec<String>, channel_filter: Vec<String>) -> Self {
        Self {
            self_id: self_id.to_string(),
            allowed_users,
            channel_filter,
        }
    }

    /// Classify one event.
    pub fn classify(&self, event: &GatewayEvent) -> Intake {
        if event.author_id == self.self_id {
            return Intake::Drop(DropReason::SelfAuthor);
        }
        if event.author_is_bot {
            return Intake::Drop(DropReason::BotAuthor);
        }
        if !self.channel_filter.is_empty()
            && !self.channel_filter.iter().any(|c| c == &event.channel_id)
        {
            return Intake::Drop(DropReason::FilteredChannel);
        }
        if !self.allowed_users.is_empty()
            && !self.allowed_users.iter().any(|u| u == &event.author_id)
        {
            return Intake::Drop(DropReason::DisallowedSender);
        }

        let (content, mentioned) = self.strip_mentions(&event.content);
        if content.is_empty() {
            return Intake::Drop(DropReason::Empty);
        }

        // Reply when addressed directly, or when the user replies to one
        // of the agent's own messages.
        let wants_reply = mentioned
            || event
                .reply_to_author_id
                .as_deref()
                .is_some_and(|id| id == self.self_id);

        let token_count = estimate_tokens(&content);
        let message = NewMessage::user(
            ConversationId(event.channel_id.clone()),
            event.author_id.clone(),
            event.author_name.clone(),
            content,
            event.timestamp,
            token_count,
        );

        Intake::Message {
            message,
            wants_reply,
        }
    }

    /// Remove `<@ID>` / `<@!ID>` mentions of the agent itself. Returns the
    /// cleaned text and whether the agent was mentioned. Mentions of other
    /// users are left in place.
    fn strip_mentions(&self, content: &str) -> (String, bool) {
        let plain = format!("<@{}>", self.self_id);
        let nick = format!("<@!{}>", self.self_id);
        let mentioned = content.contains(&plain) || content.contains(&nick);
        let cleaned = content.replace(&nick, "").replace(&plain, "");
        (cleaned.trim().to_string(), mentioned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn normalizer() -> Normalizer {
        Normalizer::new("99", vec![], vec![])
    }

    fn event(content: &str) -> GatewayEvent {
        GatewayEvent {
            channel_id: "chan-1".into(),
            channel_name: Some("general".into()),
            author_id: "42".into(),
            author_name: "alice".into(),
            author_is_bot: false,
            content: content.into(),
            reply_to_author_id: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn mention_triggers_reply_and_is_stripped() {
        let intake = normalizer().classify(&event("<@99> what's up?"));
        match intake {
            Intake::Message {
                message,
                wants_reply,
            } => {
                assert!(wants_reply);
                assert_eq!(message.content, "what's up?");
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn nickname_mention_form_also_counts() {
        let intake = normalizer().classify(&event("hey <@!99> hello"));
        match intake {
            Intake::Message {
                message,
                wants_reply,
            } => {
                assert!(wants_reply);
                assert_eq!(message.content, "hey  hello");
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn plain_message_is_stored_without_reply() {
        let intake = normalizer().classify(&event("just chatting"));
        match intake {
            Intake::Message {
                message,
                wants_reply,
            } => {
                assert!(!wants_reply);
                assert_eq!(message.content, "just chatting");
                assert!(message.token_count > 0);
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn reply_to_agent_triggers_reply() {
        let mut ev = event("I disagree");
        ev.reply_to_author_id = Some("99".into());
        match normalizer().classify(&ev) {
            Intake::Message { wants_reply, .. } => assert!(wants_reply),
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn reply_to_someone_else_does_not() {
        let mut ev = event("I disagree");
        ev.reply_to_author_id = Some("7".into());
        match normalizer().classify(&ev) {
            Intake::Message { wants_reply, .. } => assert!(!wants_reply),
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn own_messages_are_dropped() {
        let mut ev = event("echo of my own reply");
        ev.author_id = "99".into();
        assert!(matches!(
            normalizer().classify(&ev),
            Intake::Drop(DropReason::SelfAuthor)
        ));
    }

    #[test]
    fn other_bots_are_dropped() {
        let mut ev = event("beep boop");
        ev.author_is_bot = true;
        assert!(matches!(
            normalizer().classify(&ev),
            Intake::Drop(DropReason::BotAuthor)
        ));
    }

    #[test]
    fn bare_mention_is_empty() {
        assert!(matches!(
            normalizer().classify(&event("<@99>")),
            Intake::Drop(DropReason::Empty)
        ));
        assert!(matches!(
            normalizer().classify(&event("   ")),
            Intake::Drop(DropReason::Empty)
        ));
    }

    #[test]
    fn allowlist_filters_senders() {
        let n = Normalizer::new("99", vec!["7".into()], vec![]);
        assert!(matches!(
            n.classify(&event("hi")),
            Intake::Drop(DropReason::DisallowedSender)
        ));

        let mut ev = event("hi");
        ev.author_id = "7".into();
        assert!(matches!(n.classify(&ev), Intake::Message { .. }));
    }

    #[test]
    fn channel_filter_applies() {
        let n = Normalizer::new("99", vec![], vec!["chan-2".into()]);
        assert!(matches!(
            n.classify(&event("hi")),
            Intake::Drop(DropReason::FilteredChannel)
        ));
    }

    #[test]
    fn mentions_of_others_are_kept() {
        let intake = normalizer().classify(&event("<@99> ask <@55> about it"));
        match intake {
            Intake::Message { message, .. } => {
                assert!(message.content.contains("<@55>"));
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }
}
