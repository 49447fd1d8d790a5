//! Bounded retry for transient storage failures.
//!
//! Only [`StorageError::Retryable`] is retried; a Corrupt error is
//! returned immediately so the engine can halt the conversation.

use burrow_core::error::StorageError;
use burrow_core::message::{Message, NewMessage};
use burrow_core::store::ConversationStore;
use std::time::Duration;
use tracing::warn;

/// Retry policy for append operations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after the first failure.
    pub max_retries: u32,

    /// Backoff before the first retry; doubles each retry.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        // Saturating doubling keeps pathological configs from overflowing.
        self.initial_backoff
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
    }
}

/// Append a turn, retrying transient failures with exponential backoff.
pub async fn append_with_retry<S: ConversationStore + ?Sized>(
    store: &S,
    message: NewMessage,
    policy: RetryPolicy,
) -> Result<Message, StorageError> {
    let mut attempt = 0;
    loop {
        match store.append(message.clone()).await {
            Ok(committed) => return Ok(committed),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let backoff = policy.backoff_for(attempt);
                warn!(
                    conversation = %message.conversation_id,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "transient append failure, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
