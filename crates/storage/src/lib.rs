//! Persistence layer for Burrow conversation history.
//!
//! The store is the single source of truth for conversation turns. Append
//! order defines reply order: the engine treats a turn as real only once
//! a backend here has committed it.
//!
//! Backends:
//! - [`SqliteStore`] — production, WAL-mode pooled SQLite
//! - [`MemStore`] — in-memory, with failure injection for tests

pub mod mem;
pub mod retry;
pub mod sqlite;

pub use mem::MemStore;
pub use retry::{append_with_retry, RetryPolicy};
pub use sqlite::SqliteStore;
