//! ConversationStore trait — the persistence boundary.
//!
//! The store is the single source of truth for conversation history.
//! Append ordering defines reply ordering: a turn is only "real" once the
//! store has committed it.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::message::{Conversation, ConversationId, Message, NewMessage};

/// The persistence boundary.
///
/// Implementations: SQLite for production, in-memory for tests.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append one turn. Assigns the next sequence id for the conversation
    /// and updates its `last_active`; returns the committed message.
    ///
    /// Timestamps are clamped so `created_at` never decreases within a
    /// conversation, even if the gateway delivers events out of order.
    async fn append(&self, message: NewMessage) -> std::result::Result<Message, StorageError>;

    /// Read the most recent `limit` turns of a conversation, returned
    /// oldest-first. An unknown conversation yields an empty vec.
    async fn read_recent(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> std::result::Result<Vec<Message>, StorageError>;

    /// Fetch conversation metadata, if the conversation exists.
    async fn get_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> std::result::Result<Option<Conversation>, StorageError>;

    /// List all known conversations, most recently active first.
    async fn list_conversations(&self) -> std::result::Result<Vec<Conversation>, StorageError>;

    /// Delete turns older than the newest `keep` in a conversation.
    /// Returns the number of rows removed.
    async fn prune(
        &self,
        conversation_id: &ConversationId,
        keep: usize,
    ) -> std::result::Result<u64, StorageError>;

    /// Health check — can we reach the store?
    async fn health_check(&self) -> std::result::Result<bool, StorageError> {
        Ok(true)
    }

    /// Flush buffered writes and release resources. Called once during
    /// shutdown; the store must not be used afterwards.
    async fn flush(&self) -> std::result::Result<(), StorageError> {
        Ok(())
    }
}
