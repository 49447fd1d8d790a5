//! In-memory conversation store for tests.
//!
//! Behaves like the SQLite backend (dense per-conversation sequences,
//! clamped timestamps) and additionally supports failure injection so the
//! engine's retry and halt paths can be exercised deterministically.

use async_trait::async_trait;
use burrow_core::error::StorageError;
use burrow_core::message::{Conversation, ConversationId, Message, NewMessage};
use burrow_core::store::ConversationStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// An in-memory conversation store with failure injection.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<HashMap<ConversationId, Thread>>,
    /// Number of upcoming appends that fail with a Retryable error.
    fail_retryable: AtomicU32,
    /// Number of upcoming appends that fail with a Corrupt error.
    fail_corrupt: AtomicU32,
}

#[derive(Default)]
struct Thread {
    channel_name: Option<String>,
    messages: Vec<Message>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` appends fail with a Retryable error.
    pub fn fail_next_retryable(&self, n: u32) {
        self.fail_retryable.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` appends fail with a Corrupt error.
    pub fn fail_next_corrupt(&self, n: u32) {
        self.fail_corrupt.store(n, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> Option<StorageError> {
        if self
            .fail_retryable
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Some(StorageError::Retryable("injected transient failure".into()));
        }
        if self
            .fail_corrupt
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Some(StorageError::Corrupt("injected corruption".into()));
        }
        None
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConversationId, Thread>> {
        // Lock poisoning only happens if a test panicked mid-append.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl ConversationStore for MemStore {
    async fn append(&self, message: NewMessage) -> Result<Message, StorageError> {
        if let Some(err) = self.take_injected_failure() {
            return Err(err);
        }

        let mut inner = self.lock();
        let thread = inner.entry(message.conversation_id.clone()).or_default();

        let seq = thread.messages.last().map(|m| m.id).unwrap_or(0) + 1;
        let mut created_at = message.created_at;
        if let Some(last) = thread.messages.last() {
            if created_at < last.created_at {
                created_at = last.created_at;
            }
        }

        let committed = Message {
            id: seq,
            conversation_id: message.conversation_id,
            role: message.role,
            author_id: message.author_id,
            author_name: message.author_name,
            content: message.content,
            created_at,
            token_count: message.token_count,
        };
        thread.messages.push(committed.clone());
        Ok(committed)
    }

    async fn read_recent(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        let inner = self.lock();
        Ok(inner
            .get(conversation_id)
            .map(|thread| {
                let start = thread.messages.len().saturating_sub(limit);
                thread.messages[start..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn get_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Conversation>, StorageError> {
        let inner = self.lock();
        Ok(inner.get(conversation_id).and_then(|thread| {
            thread.messages.last().map(|last| Conversation {
                conversation_id: conversation_id.clone(),
                channel_name: thread.channel_name.clone(),
                last_active: last.created_at,
            })
        }))
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, StorageError> {
        let inner = self.lock();
        let mut convs: Vec<Conversation> = inner
            .iter()
            .filter_map(|(id, thread)| {
                thread.messages.last().map(|last| Conversation {
                    conversation_id: id.clone(),
                    channel_name: thread.channel_name.clone(),
                    last_active: last.created_at,
                })
            })
            .collect();
        convs.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        Ok(convs)
    }

    async fn prune(
        &self,
        conversation_id: &ConversationId,
        keep: usize,
    ) -> Result<u64, StorageError> {
        let mut inner = self.lock();
        Ok(inner
            .get_mut(conversation_id)
            .map(|thread| {
                let excess = thread.messages.len().saturating_sub(keep);
                thread.messages.drain(..excess);
                excess as u64
            })
            .unwrap_or(0))
    }
}
