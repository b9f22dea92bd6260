//! Type-specific message handlers.
//!
//! Each message kind maps to an action with its own latency. The actions are
//! simulated: they log and sleep without blocking the runtime, standing in
//! for real notification, email and report work.

use async_trait::async_trait;
use tracing::info;

use crate::bus::Result;
use crate::config::HandlerConfig;
use crate::message::MessageKind;

/// Processes one message of a resolved kind.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, kind: MessageKind, content: &str) -> Result<()>;
}

/// Handler that simulates per-kind work with configurable delays.
#[derive(Debug, Clone, Default)]
pub struct SimulatedHandler {
    config: HandlerConfig,
}

impl SimulatedHandler {
    pub fn new(config: HandlerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MessageHandler for SimulatedHandler {
    async fn handle(&self, kind: MessageKind, content: &str) -> Result<()> {
        info!(kind = %kind, content = %content, "Processing message");

        match kind {
            MessageKind::Notification => {
                info!(content = %content, "Sending notification");
                tokio::time::sleep(self.config.notification_delay()).await;
            }
            MessageKind::Email => {
                info!(content = %content, "Sending email");
                tokio::time::sleep(self.config.email_delay()).await;
            }
            MessageKind::Log => {
                info!(content = %content, "Logging");
            }
            MessageKind::Report => {
                info!(content = %content, "Generating report");
                tokio::time::sleep(self.config.report_delay()).await;
            }
            MessageKind::DataProcessing => {
                info!(kind = %kind, "No dedicated handler for message type");
            }
        }

        info!(kind = %kind, "Message processing completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;

    async fn elapsed_for(kind: MessageKind) -> Duration {
        let handler = SimulatedHandler::default();
        let start = Instant::now();
        handler.handle(kind, "payload").await.unwrap();
        start.elapsed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_has_no_delay() {
        assert_eq!(elapsed_for(MessageKind::Log).await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_processing_is_log_only() {
        assert_eq!(elapsed_for(MessageKind::DataProcessing).await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_latencies() {
        assert!(elapsed_for(MessageKind::Notification).await >= Duration::from_millis(500));
        assert!(elapsed_for(MessageKind::Email).await >= Duration::from_secs(1));
        assert!(elapsed_for(MessageKind::Report).await >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_config_skips_delays() {
        let handler = SimulatedHandler::new(HandlerConfig::immediate());
        let start = Instant::now();
        for kind in MessageKind::ALL {
            handler.handle(kind, "").await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
