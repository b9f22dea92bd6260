//! Mock record store for testing.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{MessageRecord, RecordStore, Result, StorageError};
use crate::message::MessageKind;

/// Mock record store that keeps records in memory.
#[derive(Default)]
pub struct MockRecordStore {
    records: RwLock<Vec<MessageRecord>>,
    fail_on_save: RwLock<bool>,
    closed: RwLock<bool>,
}

impl MockRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_save(&self, fail: bool) {
        *self.fail_on_save.write().await = fail;
    }

    pub async fn saved_count(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn records(&self) -> Vec<MessageRecord> {
        self.records.read().await.clone()
    }

    pub async fn is_closed(&self) -> bool {
        *self.closed.read().await
    }
}

#[async_trait]
impl RecordStore for MockRecordStore {
    async fn init(&self) -> Result<()> {
        *self.closed.write().await = false;
        Ok(())
    }

    async fn save(&self, kind: MessageKind, content: &str) -> Result<i64> {
        if *self.fail_on_save.read().await {
            return Err(StorageError::Mock("Mock save failure".to_string()));
        }
        let mut records = self.records.write().await;
        let id = records.len() as i64 + 1;
        records.push(MessageRecord {
            id,
            message_type: kind.to_string(),
            message_content: content.to_string(),
            created_at: chrono::Utc::now().naive_utc(),
        });
        Ok(id)
    }

    async fn recent(&self, limit: u64) -> Result<Vec<MessageRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().rev().take(limit as usize).cloned().collect())
    }

    async fn close(&self) {
        *self.closed.write().await = true;
    }
}
