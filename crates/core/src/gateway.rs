//! Gateway trait — the abstraction over the chat platform.
//!
//! A Gateway connects Burrow to a real-time messaging platform. It yields
//! raw inbound events and accepts outbound text; everything else (history,
//! prompts, scheduling) is the engine's business.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, GatewayError};

/// A raw inbound event, exactly as the platform delivered it.
///
/// Nothing here has been filtered or rewritten; the normalizer decides
/// whether this becomes a stored turn, a triggered turn, or a drop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    /// Platform channel/thread identifier — becomes the conversation id.
    pub channel_id: String,

    /// Human-readable channel name, if the platform exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,

    /// Platform identifier of the sender.
    pub author_id: String,

    /// Display name of the sender.
    pub author_name: String,

    /// Whether the sender is an automated account (including ourselves).
    #[serde(default)]
    pub author_is_bot: bool,

    /// The raw text, possibly containing platform mention markup.
    pub content: String,

    /// Author id of the message this one replies to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_author_id: Option<String>,

    /// Platform timestamp of the event.
    pub timestamp: DateTime<Utc>,
}

/// The gateway boundary.
///
/// Implementations handle connection management and platform quirks. The
/// engine only ever sees `GatewayEvent`s in and plain text out.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Platform name (e.g., "discord").
    fn name(&self) -> &str;

    /// The bot's own platform user id, used for mention detection and
    /// self-message filtering.
    fn self_id(&self) -> &str;

    /// Maximum length of a single outbound message; longer replies are
    /// chunked by the dispatcher.
    fn max_message_len(&self) -> usize;

    /// Start receiving events.
    ///
    /// Returns a receiver that yields inbound events until the connection
    /// closes or `stop` is called.
    async fn start(
        &self,
    ) -> std::result::Result<tokio::sync::mpsc::Receiver<GatewayEvent>, GatewayError>;

    /// Send one message to a channel. `content` must already fit within
    /// `max_message_len`.
    async fn send(
        &self,
        channel_id: &str,
        content: &str,
    ) -> std::result::Result<(), DeliveryError>;

    /// Stop the gateway gracefully.
    async fn stop(&self) -> std::result::Result<(), GatewayError> {
        Ok(())
    }

    /// Health check — is the gateway connected?
    async fn health_check(&self) -> std::result::Result<bool, GatewayError> {
        Ok(true)
    }
}
