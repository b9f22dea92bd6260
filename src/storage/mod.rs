//! Record store: append-only persistence of processed messages.
//!
//! This module contains:
//! - `RecordStore` trait: the seam between the consumer and persistence
//! - `MessageRecord`: one persisted row
//! - Implementations: SQLite, Mock

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;

use crate::message::MessageKind;

pub mod mock;
pub mod schema;
pub mod sqlite;

pub use mock::MockRecordStore;
pub use sqlite::SqliteRecordStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Mock storage failure: {0}")]
    Mock(String),
}

/// A processed message as persisted.
///
/// `id` and `created_at` are assigned by the store on insert. Records are
/// never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    pub id: i64,
    pub message_type: String,
    pub message_content: String,
    pub created_at: NaiveDateTime,
}

/// Append-only store of processed messages.
///
/// Implementations:
/// - `SqliteRecordStore`: SQLite via sqlx
/// - `MockRecordStore`: In-memory mock for testing
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create the record table if it does not exist. Idempotent.
    async fn init(&self) -> Result<()>;

    /// Append one record and return its store-assigned id.
    async fn save(&self, kind: MessageKind, content: &str) -> Result<i64>;

    /// Most recent records, newest first.
    async fn recent(&self, limit: u64) -> Result<Vec<MessageRecord>>;

    /// Release the underlying handle. A later `init` opens a fresh one.
    async fn close(&self);
}
