//! Message and Conversation domain types.
//!
//! These are the value objects that flow through the whole pipeline:
//! gateway event → normalizer → store → context assembler → scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier for a conversation (one channel or thread).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (persona, rules)
    System,
    /// A human participant
    User,
    /// The agent itself
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// A committed turn in a conversation, as read back from the store.
///
/// `id` is assigned by the persistence layer and is monotonically
/// increasing within its conversation; no two messages in the same
/// conversation share an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Per-conversation sequence number (assigned on append).
    pub id: i64,

    /// The conversation this turn belongs to.
    pub conversation_id: ConversationId,

    /// Who produced this turn.
    pub role: Role,

    /// External identity of the sender (absent for system/assistant).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,

    /// Display name of the sender, used when rendering prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,

    /// Text content. Non-empty after normalization.
    pub content: String,

    /// Commit timestamp, non-decreasing within a conversation.
    pub created_at: DateTime<Utc>,

    /// Cached token estimate used by the context assembler.
    pub token_count: usize,
}

/// A turn that has not yet been appended (no sequence id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub token_count: usize,
}

impl NewMessage {
    /// Create a user turn.
    pub fn user(
        conversation_id: ConversationId,
        author_id: impl Into<String>,
        author_name: impl Into<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
        token_count: usize,
    ) -> Self {
        Self {
            conversation_id,
            role: Role::User,
            author_id: Some(author_id.into()),
            author_name: Some(author_name.into()),
            content: content.into(),
            created_at,
            token_count,
        }
    }

    /// Create an assistant turn.
    pub fn assistant(
        conversation_id: ConversationId,
        content: impl Into<String>,
        token_count: usize,
    ) -> Self {
        Self {
            conversation_id,
            role: Role::Assistant,
            author_id: None,
            author_name: None,
            content: content.into(),
            created_at: Utc::now(),
            token_count,
        }
    }
}

/// Conversation metadata. The ordered turns themselves live in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: ConversationId,

    /// Human-readable channel name, if the gateway provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,

    /// Timestamp of the most recent committed turn.
    pub last_active: DateTime<Utc>,
}
