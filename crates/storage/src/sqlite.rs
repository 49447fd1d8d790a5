//! SQLite conversation store.
//!
//! Two tables:
//! - `conversations` — one row per channel/thread, tracks `last_active`
//! - `messages` — ordered turns, keyed by `(conversation_id, seq)`
//!
//! `seq` is assigned inside the append transaction as `MAX(seq) + 1`, so
//! it is dense and gap-free per conversation. `created_at` is clamped
//! non-decreasing within a conversation; gateways occasionally deliver
//! events out of order and prompt assembly relies on chronology.

use async_trait::async_trait;
use burrow_core::error::StorageError;
use burrow_core::message::{Conversation, ConversationId, Message, NewMessage, Role};
use burrow_core::store::ConversationStore;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A production SQLite conversation store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database
    /// (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StorageError::Corrupt(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Corrupt(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite conversation store initialized at {path}");
        Ok(store)
    }

    /// Run schema migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                conversation_id TEXT PRIMARY KEY,
                channel_name    TEXT,
                last_active     TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Corrupt(format!("conversations table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                conversation_id TEXT NOT NULL,
                seq             INTEGER NOT NULL,
                role            TEXT NOT NULL,
                author_id       TEXT,
                author_name     TEXT,
                content         TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                token_count     INTEGER NOT NULL,
                PRIMARY KEY (conversation_id, seq)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Corrupt(format!("messages table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Classify a sqlx error into retryable vs corrupt.
    ///
    /// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_IOERR (10) are
    /// transient; SQLITE_CORRUPT (11), SQLITE_NOTADB (26) and anything
    /// else from the database itself mean the file can no longer be
    /// trusted.
    fn classify(e: sqlx::Error) -> StorageError {
        match &e {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => {
                StorageError::Retryable(e.to_string())
            }
            sqlx::Error::Database(db) => {
                let primary = db
                    .code()
                    .and_then(|c| c.parse::<i64>().ok())
                    .map(|c| c & 0xff);
                match primary {
                    Some(5) | Some(6) | Some(10) => StorageError::Retryable(e.to_string()),
                    _ => StorageError::Corrupt(e.to_string()),
                }
            }
            _ => StorageError::Corrupt(e.to_string()),
        }
    }

    /// Parse a `Message` from a SQLite row.
    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StorageError> {
        let seq: i64 = row
            .try_get("seq")
            .map_err(|e| StorageError::Corrupt(format!("seq column: {e}")))?;
        let conversation_id: String = row
            .try_get("conversation_id")
            .map_err(|e| StorageError::Corrupt(format!("conversation_id column: {e}")))?;
        let role_str: String = row
            .try_get("role")
            .map_err(|e| StorageError::Corrupt(format!("role column: {e}")))?;
        let author_id: Option<String> = row
            .try_get("author_id")
            .map_err(|e| StorageError::Corrupt(format!("author_id column: {e}")))?;
        let author_name: Option<String> = row
            .try_get("author_name")
            .map_err(|e| StorageError::Corrupt(format!("author_name column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| StorageError::Corrupt(format!("content column: {e}")))?;
        let created_at_str: String = row
            .try_get("created_at")
            .map_err(|e| StorageError::Corrupt(format!("created_at column: {e}")))?;
        let token_count: i64 = row
            .try_get("token_count")
            .map_err(|e| StorageError::Corrupt(format!("token_count column: {e}")))?;

        let role = Role::parse(&role_str)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown role '{role_str}'")))?;

        let created_at = parse_timestamp(&created_at_str)?;

        Ok(Message {
            id: seq,
            conversation_id: ConversationId(conversation_id),
            role,
            author_id,
            author_name,
            content,
            created_at,
            token_count: token_count.max(0) as usize,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StorageError> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp '{s}': {e}")))
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn append(&self, message: NewMessage) -> Result<Message, StorageError> {
        let mut tx = self.pool.begin().await.map_err(Self::classify)?;

        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(seq), 0) AS max_seq, MAX(created_at) AS max_ts
            FROM messages WHERE conversation_id = ?1
            "#,
        )
        .bind(&message.conversation_id.0)
        .fetch_one(&mut *tx)
        .await
        .map_err(Self::classify)?;

        let max_seq: i64 = row
            .try_get("max_seq")
            .map_err(|e| StorageError::Corrupt(format!("max_seq column: {e}")))?;
        let max_ts: Option<String> = row
            .try_get("max_ts")
            .map_err(|e| StorageError::Corrupt(format!("max_ts column: {e}")))?;

        let seq = max_seq + 1;

        // Clamp so created_at never runs backwards within a conversation.
        let mut created_at = message.created_at;
        if let Some(prev) = max_ts {
            let prev = parse_timestamp(&prev)?;
            if created_at < prev {
                created_at = prev;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO messages
                (conversation_id, seq, role, author_id, author_name, content, created_at, token_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&message.conversation_id.0)
        .bind(seq)
        .bind(message.role.as_str())
        .bind(&message.author_id)
        .bind(&message.author_name)
        .bind(&message.content)
        .bind(created_at.to_rfc3339())
        .bind(message.token_count as i64)
        .execute(&mut *tx)
        .await
        .map_err(Self::classify)?;

        sqlx::query(
            r#"
            INSERT INTO conversations (conversation_id, channel_name, last_active)
            VALUES (?1, NULL, ?2)
            ON CONFLICT(conversation_id) DO UPDATE SET last_active = excluded.last_active
            "#,
        )
        .bind(&message.conversation_id.0)
        .bind(created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(Self::classify)?;

        tx.commit().await.map_err(Self::classify)?;

        debug!(
            conversation = %message.conversation_id,
            seq,
            role = message.role.as_str(),
            "appended turn"
        );

        Ok(Message {
            id: seq,
            conversation_id: message.conversation_id,
            role: message.role,
            author_id: message.author_id,
            author_name: message.author_name,
            content: message.content,
            created_at,
            token_count: message.token_count,
        })
    }

    async fn read_recent(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        // Newest `limit` rows, then flip to chronological order.
        let rows = sqlx::query(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = ?1
            ORDER BY seq DESC
            LIMIT ?2
            "#,
        )
        .bind(&conversation_id.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::classify)?;

        let mut messages: Vec<Message> = rows
            .iter()
            .map(Self::row_to_message)
            .collect::<Result<_, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn get_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Conversation>, StorageError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE conversation_id = ?1")
            .bind(&conversation_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::classify)?;

        match row {
            Some(row) => {
                let channel_name: Option<String> = row
                    .try_get("channel_name")
                    .map_err(|e| StorageError::Corrupt(format!("channel_name column: {e}")))?;
                let last_active: String = row
                    .try_get("last_active")
                    .map_err(|e| StorageError::Corrupt(format!("last_active column: {e}")))?;
                Ok(Some(Conversation {
                    conversation_id: conversation_id.clone(),
                    channel_name,
                    last_active: parse_timestamp(&last_active)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, StorageError> {
        let rows = sqlx::query("SELECT * FROM conversations ORDER BY last_active DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(Self::classify)?;

        rows.iter()
            .map(|row| {
                let conversation_id: String = row
                    .try_get("conversation_id")
                    .map_err(|e| StorageError::Corrupt(format!("conversation_id column: {e}")))?;
                let channel_name: Option<String> = row
                    .try_get("channel_name")
                    .map_err(|e| StorageError::Corrupt(format!("channel_name column: {e}")))?;
                let last_active: String = row
                    .try_get("last_active")
                    .map_err(|e| StorageError::Corrupt(format!("last_active column: {e}")))?;
                Ok(Conversation {
                    conversation_id: ConversationId(conversation_id),
                    channel_name,
                    last_active: parse_timestamp(&last_active)?,
                })
            })
            .collect()
    }

    async fn prune(
        &self,
        conversation_id: &ConversationId,
        keep: usize,
    ) -> Result<u64, StorageError> {
        let result = sqlx::query(
            r#"
            DELETE FROM messages
            WHERE conversation_id = ?1
              AND seq <= (
                  SELECT COALESCE(MAX(seq), 0) - ?2
                  FROM messages WHERE conversation_id = ?1
              )
            "#,
        )
        .bind(&conversation_id.0)
        .bind(keep as i64)
        .execute(&self.pool)
        .await
        .map_err(Self::classify)?;

        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<bool, StorageError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(Self::classify)?;
        Ok(true)
    }

    async fn flush(&self) -> Result<(), StorageError> {
        // Fold the WAL back into the main database file before closing.
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .map_err(Self::classify)?;
        self.pool.close().await;
        Ok(())
    }
}
