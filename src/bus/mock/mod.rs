//! Mock publisher implementation for testing.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::MessagePublisher;
use crate::message::{MessageEnvelope, MessageKind};

/// Mock publisher that records envelopes instead of sending them.
#[derive(Default)]
pub struct MockPublisher {
    published: RwLock<Vec<MessageEnvelope>>,
    fail_on_publish: RwLock<bool>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn take_published(&self) -> Vec<MessageEnvelope> {
        std::mem::take(&mut *self.published.write().await)
    }
}

#[async_trait]
impl MessagePublisher for MockPublisher {
    async fn publish(&self, kind: MessageKind, content: Option<&str>) -> bool {
        if *self.fail_on_publish.read().await {
            return false;
        }
        self.published
            .write()
            .await
            .push(MessageEnvelope::new(kind, content.unwrap_or_default()));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_envelopes() {
        let publisher = MockPublisher::new();
        assert!(publisher.publish(MessageKind::Email, Some("hi")).await);
        assert!(publisher.publish(MessageKind::Log, None).await);

        let published = publisher.take_published().await;
        assert_eq!(published[0], MessageEnvelope::new(MessageKind::Email, "hi"));
        assert_eq!(published[1].content, "");
        assert_eq!(publisher.published_count().await, 0);
    }

    #[tokio::test]
    async fn test_mock_fail_on_publish() {
        let publisher = MockPublisher::new();
        publisher.set_fail_on_publish(true).await;
        assert!(!publisher.publish(MessageKind::Report, Some("q3")).await);
        assert_eq!(publisher.published_count().await, 0);
    }
}
