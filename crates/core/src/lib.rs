//! Core domain types and boundary traits for Burrow.
//!
//! Burrow bridges a real-time messaging gateway with a locally hosted
//! language model. This crate holds the vocabulary shared by every other
//! crate: the Message/Conversation data model, the InferenceJob lifecycle,
//! the error taxonomy, and the three traits that mark the system's
//! external boundaries (gateway, model runtime, conversation store).

pub mod error;
pub mod event;
pub mod gateway;
pub mod job;
pub mod message;
pub mod prompt;
pub mod runtime;
pub mod store;

pub use error::{Error, Result};
pub use message::{Conversation, ConversationId, Message, NewMessage, Role};
