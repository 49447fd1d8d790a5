//! Error types for the Burrow domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level `Error`
//! wraps them for callers that cross context boundaries.

use thiserror::Error;

/// The top-level error type for Burrow operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Scheduling error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway not configured: {0}")]
    NotConfigured(String),

    #[error("Gateway connection lost: {0}")]
    ConnectionLost(String),
}

/// Failure to hand a finished reply back to the gateway.
///
/// Distinct from [`GatewayError`]: delivery errors are retried a bounded
/// number of times by the dispatcher and then dropped, while gateway
/// errors affect the inbound connection itself.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Delivery failed to {conversation_id}: {reason}")]
    Failed {
        conversation_id: String,
        reason: String,
    },

    #[error("Gateway rejected message: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Model failed to load: {0}")]
    LoadFailed(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Storage failures split by how the caller must react.
///
/// `Retryable` is transient (lock contention, I/O hiccup): retry with
/// backoff. `Corrupt` means the store itself is damaged: halt the affected
/// conversation and surface to an operator, never retry.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Retryable storage error: {0}")]
    Retryable(String),

    #[error("Corrupt storage: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Retryable(_))
    }
}

/// Admission errors from the inference scheduler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    /// The global wait queue is at capacity; the caller should inform the
    /// user that a reply is delayed, not retry immediately.
    #[error("Scheduler saturated: queue depth {queue_depth} reached")]
    Saturated { queue_depth: usize },

    /// Shutdown has begun; no new work is accepted.
    #[error("Scheduler is shutting down")]
    ShuttingDown,
}
