//! Discord gateway adapter (stub).
//!
//! Implements the Gateway trait for the Discord Bot API. In production
//! this would use `serenity` for the WebSocket gateway; currently a stub
//! with in-process event injection for testing, plus a log of outbound
//! sends so tests can assert on delivery.

use async_trait::async_trait;
use burrow_config::DiscordConfig;
use burrow_core::error::{DeliveryError, GatewayError};
use burrow_core::gateway::{Gateway, GatewayEvent};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::info;

/// Discord's hard cap on message length.
const DISCORD_MAX_MESSAGE_LEN: usize = 2000;

/// Discord gateway adapter.
pub struct DiscordGateway {
    config: DiscordConfig,
    inject_tx: tokio::sync::Mutex<Option<mpsc::Sender<GatewayEvent>>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl DiscordGateway {
    pub fn new(config: DiscordConfig) -> Self {
        Self {
            config,
            inject_tx: tokio::sync::Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Inject an event as if it came from Discord (for testing).
    pub async fn inject_event(&self, event: GatewayEvent) -> Result<(), GatewayError> {
        let guard = self.inject_tx.lock().await;
        match guard.as_ref() {
            Some(tx) => tx
                .send(event)
                .await
                .map_err(|_| GatewayError::ConnectionLost("Event channel closed".into())),
            None => Err(GatewayError::ConnectionLost("Gateway not started".into())),
        }
    }

    /// Outbound messages recorded so far, as `(channel_id, content)` pairs.
    pub fn sent_messages(&self) -> Vec<(String, String)> {
        match self.sent.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl std::fmt::Debug for DiscordGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordGateway")
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl Gateway for DiscordGateway {
    fn name(&self) -> &str {
        "discord"
    }

    fn self_id(&self) -> &str {
        &self.config.bot_user_id
    }

    fn max_message_len(&self) -> usize {
        DISCORD_MAX_MESSAGE_LEN
    }

    async fn start(&self) -> Result<mpsc::Receiver<GatewayEvent>, GatewayError> {
        if self.config.bot_token.is_none() {
            return Err(GatewayError::NotConfigured(
                "No bot token: set DISCORD_BOT_TOKEN or discord.bot_token".into(),
            ));
        }
        info!("Discord gateway starting (stub mode)");
        let (tx, rx) = mpsc::channel(64);
        *self.inject_tx.lock().await = Some(tx);
        Ok(rx)
    }

    async fn send(&self, channel_id: &str, content: &str) -> Result<(), DeliveryError> {
        if content.len() > DISCORD_MAX_MESSAGE_LEN {
            return Err(DeliveryError::Rejected(format!(
                "message of {} bytes exceeds the {DISCORD_MAX_MESSAGE_LEN} byte limit",
                content.len()
            )));
        }
        info!(
            channel_id = %channel_id,
            content_len = content.len(),
            "Discord send (stub)"
        );
        match self.sent.lock() {
            Ok(mut guard) => guard.push((channel_id.to_string(), content.to_string())),
            Err(poisoned) => poisoned
                .into_inner()
                .push((channel_id.to_string(), content.to_string())),
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        info!("Discord gateway stopping");
        *self.inject_tx.lock().await = None;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, GatewayError> {
        Ok(self.config.bot_token.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_config() -> DiscordConfig {
        DiscordConfig {
            enabled: true,
            bot_token: Some("test-discord-token".into()),
            bot_user_id: "99".into(),
            allowed_users: vec![],
            channel_filter: vec![],
        }
    }

    fn test_event(content: &str) -> GatewayEvent {
        GatewayEvent {
            channel_id: "123".into(),
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
    fn gateway_identity() {
        let gw = DiscordGateway::new(test_config());
        assert_eq!(gw.name(), "discord");
        assert_eq!(gw.self_id(), "99");
        assert_eq!(gw.max_message_len(), 2000);
    }

    #[tokio::test]
    async fn start_inject_and_receive() {
        let gw = DiscordGateway::new(test_config());
        let mut rx = gw.start().await.unwrap();

        gw.inject_event(test_event("Hey from Discord!")).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.content, "Hey from Discord!");
    }

    #[tokio::test]
    async fn start_requires_token() {
        let gw = DiscordGateway::new(DiscordConfig {
            bot_token: None,
            ..test_config()
        });
        assert!(matches!(
            gw.start().await,
            Err(GatewayError::NotConfigured(_))
        ));
        assert!(!gw.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn send_records_and_enforces_limit() {
        let gw = DiscordGateway::new(test_config());
        gw.send("chan-1", "Hello!").await.unwrap();
        assert_eq!(gw.sent_messages(), vec![("chan-1".into(), "Hello!".into())]);

        let oversized = "x".repeat(2001);
        assert!(matches!(
            gw.send("chan-1", &oversized).await,
            Err(DeliveryError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn inject_before_start_fails() {
        let gw = DiscordGateway::new(test_config());
        assert!(gw.inject_event(test_event("early")).await.is_err());
    }
}
