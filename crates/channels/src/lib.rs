//! Gateway adapters for Burrow.
//!
//! One platform today: Discord. The adapter translates platform events
//! into [`burrow_core::gateway::GatewayEvent`]s and plain-text sends; all
//! conversation logic lives in burrow-engine.

pub mod discord;

pub use discord::DiscordGateway;
