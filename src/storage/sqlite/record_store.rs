//! SQLite RecordStore implementation.

use std::time::Duration;

use async_trait::async_trait;
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::message::MessageKind;
use crate::storage::schema::{Messages, CREATE_MESSAGES_TABLE};
use crate::storage::{MessageRecord, RecordStore, Result};

const IN_MEMORY: &str = ":memory:";

/// SQLite implementation of RecordStore.
///
/// The pool is opened lazily on first use and released by `close`, after
/// which the next `get` or `init` opens a new one.
pub struct SqliteRecordStore {
    config: StorageConfig,
    pool: RwLock<Option<SqlitePool>>,
}

impl SqliteRecordStore {
    /// Create a store. No connection is made until first use.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
        }
    }

    /// Get the shared pool, opening it if needed.
    pub async fn get(&self) -> Result<SqlitePool> {
        if let Some(pool) = self.pool.read().await.as_ref() {
            return Ok(pool.clone());
        }

        let mut guard = self.pool.write().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.config.path)
            .create_if_missing(true);

        let mut pool_options =
            SqlitePoolOptions::new().max_connections(self.config.max_connections.max(1));
        if self.config.path == IN_MEMORY {
            // Each connection to :memory: is its own database, and it lives
            // only as long as that connection
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>);
        }

        let pool = pool_options.connect_with(options).await?;
        info!(path = %self.config.path, "Record store opened");

        *guard = Some(pool.clone());
        Ok(pool)
    }

    /// Whether a pool is currently held.
    pub async fn is_open(&self) -> bool {
        self.pool.read().await.is_some()
    }

    /// Total number of stored records.
    pub async fn count(&self) -> Result<i64> {
        let pool = self.get().await?;
        let (sql, values) = Query::select()
            .expr(Expr::col(Messages::Id).count())
            .from(Messages::Table)
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values).fetch_one(&pool).await?;
        Ok(row.try_get(0)?)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn init(&self) -> Result<()> {
        let pool = self.get().await?;
        sqlx::query(CREATE_MESSAGES_TABLE).execute(&pool).await?;
        info!("Record store initialized");
        Ok(())
    }

    async fn save(&self, kind: MessageKind, content: &str) -> Result<i64> {
        let pool = self.get().await?;
        let (sql, values) = Query::insert()
            .into_table(Messages::Table)
            .columns([Messages::MessageType, Messages::MessageContent])
            .values_panic([kind.as_str().into(), content.into()])
            .build_sqlx(SqliteQueryBuilder);

        let id = sqlx::query_with(&sql, values)
            .execute(&pool)
            .await?
            .last_insert_rowid();

        debug!(id, kind = %kind, "Saved message record");
        Ok(id)
    }

    async fn recent(&self, limit: u64) -> Result<Vec<MessageRecord>> {
        let pool = self.get().await?;
        let (sql, values) = Query::select()
            .columns([
                Messages::Id,
                Messages::MessageType,
                Messages::MessageContent,
                Messages::CreatedAt,
            ])
            .from(Messages::Table)
            .order_by(Messages::Id, Order::Desc)
            .limit(limit)
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&sql, values).fetch_all(&pool).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(MessageRecord {
                id: row.try_get("id")?,
                message_type: row.try_get("message_type")?,
                message_content: row.try_get("message_content")?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(records)
    }

    async fn close(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
            info!(path = %self.config.path, "Record store closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteRecordStore {
        let store = SqliteRecordStore::new(StorageConfig::in_memory());
        store.init().await.expect("failed to init schema");
        store
    }

    #[tokio::test]
    async fn test_lazy_open() {
        let store = SqliteRecordStore::new(StorageConfig::in_memory());
        assert!(!store.is_open().await);
        store.get().await.unwrap();
        assert!(store.is_open().await);
    }

    #[tokio::test]
    async fn test_in_memory_ignores_configured_pool_size() {
        let config = StorageConfig {
            max_connections: 4,
            ..StorageConfig::in_memory()
        };
        let store = SqliteRecordStore::new(config);
        store.init().await.unwrap();

        // With more than one connection some saves would land in a database
        // without the table
        let saves = (0..8).map(|_| store.save(MessageKind::Log, "burst"));
        for result in futures::future::join_all(saves).await {
            result.unwrap();
        }

        assert_eq!(store.count().await.unwrap(), 8);
        assert_eq!(store.get().await.unwrap().options().get_max_connections(), 1);
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let store = memory_store().await;
        store.init().await.unwrap();
        store.init().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_save_assigns_monotonic_ids() {
        let store = memory_store().await;
        let first = store.save(MessageKind::Log, "one").await.unwrap();
        let second = store.save(MessageKind::Email, "two").await.unwrap();
        let third = store.save(MessageKind::Report, "three").await.unwrap();
        assert!(first < second && second < third);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_recent_returns_newest_first_by_column_name() {
        let store = memory_store().await;
        store.save(MessageKind::Log, "hello").await.unwrap();
        store
            .save(MessageKind::DataProcessing, "batch 7")
            .await
            .unwrap();

        let records = store.recent(10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message_type, "data_process");
        assert_eq!(records[0].message_content, "batch 7");
        assert_eq!(records[1].message_type, "log");
        assert_eq!(records[1].message_content, "hello");

        let limited = store.recent(1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].message_content, "batch 7");
    }

    #[tokio::test]
    async fn test_empty_and_unicode_content() {
        let store = memory_store().await;
        store.save(MessageKind::Notification, "").await.unwrap();
        store.save(MessageKind::Email, "안녕 👋").await.unwrap();

        let records = store.recent(10).await.unwrap();
        assert_eq!(records[0].message_content, "안녕 👋");
        assert_eq!(records[1].message_content, "");
    }

    #[tokio::test]
    async fn test_created_at_defaults_to_write_time() {
        let store = memory_store().await;
        let before = chrono::Utc::now().naive_utc() - chrono::Duration::seconds(5);
        store.save(MessageKind::Log, "stamped").await.unwrap();
        let after = chrono::Utc::now().naive_utc() + chrono::Duration::seconds(5);

        let record = &store.recent(1).await.unwrap()[0];
        assert!(record.created_at >= before && record.created_at <= after);
    }

    #[tokio::test]
    async fn test_close_resets_and_reinit_starts_fresh() {
        let store = memory_store().await;
        store.save(MessageKind::Log, "gone after close").await.unwrap();

        store.close().await;
        assert!(!store.is_open().await);
        // Closing twice is harmless
        store.close().await;

        store.init().await.unwrap();
        assert!(store.is_open().await);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_store_survives_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");
        let config = StorageConfig {
            path: path.to_string_lossy().into_owned(),
            max_connections: 2,
        };

        let store = SqliteRecordStore::new(config.clone());
        store.init().await.unwrap();
        store.save(MessageKind::Report, "quarterly").await.unwrap();
        store.close().await;

        let reopened = SqliteRecordStore::new(config);
        reopened.init().await.unwrap();
        let records = reopened.recent(10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message_type, "report");
        reopened.close().await;
    }
}
