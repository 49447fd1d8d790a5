//! Response dispatcher — persists finished replies and hands them to the
//! gateway.
//!
//! Runs as the scheduler's completion sink, so everything here happens
//! before the conversation's slot frees. Order of operations per reply:
//! persist the assistant turn first, then deliver. A reply that cannot be
//! persisted is never delivered; a reply that cannot be delivered is
//! still in history for later prompts.

use async_trait::async_trait;
use burrow_core::error::StorageError;
use burrow_core::event::{DomainEvent, EventBus};
use burrow_core::gateway::Gateway;
use burrow_core::job::{JobFailure, JobOutcome};
use burrow_core::message::{ConversationId, NewMessage};
use burrow_core::store::ConversationStore;
use burrow_storage::{append_with_retry, RetryPolicy};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::scheduler::CompletionSink;
use crate::token::estimate_tokens;

/// Notice sent when a generation exceeded its deadline.
const TIMEOUT_NOTICE: &str = "Sorry, that reply took too long to generate. Please try again.";

/// Notice sent when the model runtime failed outright.
const FAILURE_NOTICE: &str = "Sorry, something went wrong while generating that reply.";

/// Delivery tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

/// Persists and delivers finished replies.
pub struct ResponseDispatcher {
    store: Arc<dyn ConversationStore>,
    gateway: Arc<dyn Gateway>,
    bus: Arc<EventBus>,
    options: DispatchOptions,
    retry: RetryPolicy,
    /// Conversations halted after storage corruption. Shared with the
    /// intake loop.
    poisoned: Arc<Mutex<HashSet<ConversationId>>>,
}

impl ResponseDispatcher {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        gateway: Arc<dyn Gateway>,
        bus: Arc<EventBus>,
        options: DispatchOptions,
        retry: RetryPolicy,
        poisoned: Arc<Mutex<HashSet<ConversationId>>>,
    ) -> Self {
        Self {
            store,
            gateway,
            bus,
            options,
            retry,
            poisoned,
        }
    }

    fn is_poisoned(&self, conversation_id: &ConversationId) -> bool {
        match self.poisoned.lock() {
            Ok(set) => set.contains(conversation_id),
            Err(poisoned) => poisoned.into_inner().contains(conversation_id),
        }
    }

    fn poison(&self, conversation_id: &ConversationId) {
        match self.poisoned.lock() {
            Ok(mut set) => set.insert(conversation_id.clone()),
            Err(poisoned) => poisoned.into_inner().insert(conversation_id.clone()),
        };
    }

    /// Deliver `content` to the conversation's channel, chunked to the
    /// gateway limit, each chunk retried with backoff. Returns the number
    /// of chunks delivered.
    async fn deliver(&self, conversation_id: &ConversationId, content: &str) -> usize {
        let chunks = chunk_message(content, self.gateway.max_message_len());
        let mut delivered = 0;

        for chunk in &chunks {
            let mut attempt = 0;
            loop {
                match self.gateway.send(&conversation_id.0, chunk).await {
                    Ok(()) => {
                        delivered += 1;
                        break;
                    }
                    Err(err) if attempt < self.options.max_retries => {
                        let backoff = self.options.backoff.saturating_mul(1 << attempt);
                        warn!(
                            conversation = %conversation_id,
                            attempt = attempt + 1,
                            error = %err,
                            "delivery failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(err) => {
                        // Give up on this reply; the turn is already in
                        // history, so context stays intact.
                        error!(
                            conversation = %conversation_id,
                            error = %err,
                            "delivery failed permanently, dropping remaining chunks"
                        );
                        self.bus.publish(DomainEvent::ErrorOccurred {
                            context: "delivery".into(),
                            error_message: err.to_string(),
                            timestamp: Utc::now(),
                        });
                        return delivered;
                    }
                }
            }
        }

        delivered
    }

    /// Best-effort single-message notice, no retries.
    async fn notify(&self, conversation_id: &ConversationId, notice: &str) {
        if let Err(err) = self.gateway.send(&conversation_id.0, notice).await {
            warn!(conversation = %conversation_id, error = %err, "failed to send notice");
        }
    }
}

#[async_trait]
impl CompletionSink for ResponseDispatcher {
    async fn complete(&self, outcome: &JobOutcome) {
        let conversation_id = &outcome.conversation_id;
        let duration_ms = match &outcome.result {
            Ok(completion) => completion.duration_ms,
            Err(_) => 0,
        };

        self.bus.publish(DomainEvent::JobFinished {
            job_id: outcome.job_id.to_string(),
            conversation_id: conversation_id.0.clone(),
            status: format!("{:?}", outcome.status()).to_lowercase(),
            duration_ms,
            timestamp: Utc::now(),
        });

        match &outcome.result {
            Ok(completion) => {
                if self.is_poisoned(conversation_id) {
                    warn!(conversation = %conversation_id, "conversation halted, discarding reply");
                    return;
                }

                let turn = NewMessage::assistant(
                    conversation_id.clone(),
                    completion.text.clone(),
                    estimate_tokens(&completion.text),
                );
                match append_with_retry(self.store.as_ref(), turn, self.retry).await {
                    Ok(committed) => {
                        self.bus.publish(DomainEvent::MessageStored {
                            conversation_id: conversation_id.0.clone(),
                            role: "assistant".into(),
                            token_count: committed.token_count,
                            timestamp: Utc::now(),
                        });
                    }
                    Err(StorageError::Corrupt(reason)) => {
                        error!(
                            conversation = %conversation_id,
                            reason,
                            "storage corrupt, halting conversation"
                        );
                        self.poison(conversation_id);
                        self.bus.publish(DomainEvent::ErrorOccurred {
                            context: "persist_reply".into(),
                            error_message: reason.clone(),
                            timestamp: Utc::now(),
                        });
                        // Never deliver what we could not persist.
                        return;
                    }
                    Err(err) => {
                        error!(
                            conversation = %conversation_id,
                            error = %err,
                            "could not persist reply, dropping it"
                        );
                        self.bus.publish(DomainEvent::ErrorOccurred {
                            context: "persist_reply".into(),
                            error_message: err.to_string(),
                            timestamp: Utc::now(),
                        });
                        return;
                    }
                }

                let chunks = self.deliver(conversation_id, &completion.text).await;
                if chunks > 0 {
                    self.bus.publish(DomainEvent::ReplyDelivered {
                        conversation_id: conversation_id.0.clone(),
                        chunks,
                        timestamp: Utc::now(),
                    });
                }
            }
            Err(JobFailure::Timeout) => {
                debug!(conversation = %conversation_id, "sending timeout notice");
                self.notify(conversation_id, TIMEOUT_NOTICE).await;
            }
            Err(JobFailure::Runtime(reason)) => {
                error!(conversation = %conversation_id, reason, "generation failed");
                self.bus.publish(DomainEvent::ErrorOccurred {
                    context: "generation".into(),
                    error_message: reason.clone(),
                    timestamp: Utc::now(),
                });
                self.notify(conversation_id, FAILURE_NOTICE).await;
            }
            Err(JobFailure::Cancelled) => {
                // Cancelled jobs are silent; they never produced anything.
            }
        }
    }
}

/// Split `content` into chunks of at most `max_len` bytes, preferring to
/// break on a newline, then a space, falling back to a hard cut on a char
/// boundary.
pub fn chunk_message(content: &str, max_len: usize) -> Vec<String> {
    if content.len() <= max_len {
        return vec![content.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = content;
    while rest.len() > max_len {
        let window = floor_char_boundary(rest, max_len);
        if window == 0 {
            // max_len is narrower than the next character; emit the
            // character whole rather than looping without progress.
            let width = rest.chars().next().map_or(1, char::len_utf8);
            chunks.push(rest[..width].to_string());
            rest = &rest[width..];
            continue;
        }
        let cut = rest[..window]
            .rfind('\n')
            .or_else(|| rest[..window].rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(window);
        chunks.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start();
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
