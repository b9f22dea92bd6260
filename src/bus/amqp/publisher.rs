//! Publishing side of the relay.

use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions},
    BasicProperties, Channel,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{ConnectionHandle, TopologyManager};
use crate::bus::{BusError, ConnectionState, MessagePublisher, Result};
use crate::config::MessagingConfig;
use crate::message::{MessageEnvelope, MessageKind, CONTENT_TYPE};

/// AMQP delivery mode asking the broker to write the message to disk.
const PERSISTENT: u8 = 2;

/// Publishes envelopes to the relay exchange.
///
/// The connection is opened lazily and re-established whenever it is found
/// closed. The channel runs in confirm mode, so a publish counts as sent
/// only once the broker acks it.
pub struct Publisher {
    manager: TopologyManager,
    handle: Mutex<ConnectionHandle>,
}

impl Publisher {
    pub fn new(manager: TopologyManager) -> Self {
        Self {
            manager,
            handle: Mutex::new(ConnectionHandle::new()),
        }
    }

    pub fn from_config(config: &MessagingConfig) -> Self {
        Self::new(TopologyManager::from_config(config))
    }

    /// Open the connection and declare the topology. Single attempt.
    pub async fn connect(&self) -> Result<()> {
        let mut handle = self.handle.lock().await;
        self.confirmed_channel(&mut handle).await?;
        Ok(())
    }

    pub async fn state(&self) -> ConnectionState {
        self.handle.lock().await.state()
    }

    /// Close the connection if open. No-op when already closed or absent.
    pub async fn close(&self) -> Result<()> {
        let mut handle = self.handle.lock().await;
        if handle.state() == ConnectionState::Absent {
            return Ok(());
        }
        handle.close().await?;
        info!("Publisher connection closed");
        Ok(())
    }

    /// Publish an envelope, surfacing the failure cause.
    ///
    /// A broker-side failure on an established channel invalidates the
    /// connection and the publish is retried once on a fresh one. A failure
    /// to connect is not retried.
    pub async fn try_publish(&self, envelope: &MessageEnvelope) -> Result<()> {
        let payload = envelope
            .encode()
            .map_err(|e| BusError::Serialization(e.to_string()))?;

        match self.send(&payload).await {
            Err(BusError::Publish(cause)) => {
                warn!(error = %cause, "Publish failed, reconnecting and retrying once");
                self.invalidate().await;
                self.send(&payload).await
            }
            other => other,
        }
    }

    async fn send(&self, payload: &[u8]) -> Result<()> {
        let channel = {
            let mut handle = self.handle.lock().await;
            self.confirmed_channel(&mut handle).await?
        };

        let topology = self.manager.topology();
        let properties = BasicProperties::default()
            .with_content_type(CONTENT_TYPE.into())
            .with_delivery_mode(PERSISTENT);

        let confirm = channel
            .basic_publish(
                &topology.exchange,
                &topology.routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| BusError::Publish(format!("Failed to publish: {}", e)))?;

        let confirmation = confirm
            .await
            .map_err(|e| BusError::Publish(format!("Publish confirmation failed: {}", e)))?;

        if confirmation.is_nack() {
            return Err(BusError::Publish("Broker rejected the message".to_string()));
        }

        debug!(
            exchange = %topology.exchange,
            routing_key = %topology.routing_key,
            "Published message"
        );
        Ok(())
    }

    /// Ensure the handle is open and return its channel in confirm mode.
    async fn confirmed_channel(&self, handle: &mut ConnectionHandle) -> Result<Channel> {
        if self.manager.ensure(handle).await? {
            let enabled = handle
                .channel()?
                .confirm_select(ConfirmSelectOptions::default())
                .await;
            if let Err(e) = enabled {
                // Never keep a channel that would publish unconfirmed
                if let Err(close_err) = handle.close().await {
                    debug!(error = %close_err, "Failed to close unconfirmed channel");
                }
                return Err(BusError::Channel(format!("Failed to enable confirms: {}", e)));
            }
        }
        Ok(handle.channel()?.clone())
    }

    async fn invalidate(&self) {
        let mut handle = self.handle.lock().await;
        if let Err(e) = handle.close().await {
            debug!(error = %e, "Invalidated connection did not close cleanly");
        }
    }
}

#[async_trait]
impl MessagePublisher for Publisher {
    async fn publish(&self, kind: MessageKind, content: Option<&str>) -> bool {
        let envelope = MessageEnvelope::new(kind, content.unwrap_or_default());
        match self.try_publish(&envelope).await {
            Ok(()) => true,
            Err(e) => {
                error!(kind = %kind, error = %e, "Failed to publish message");
                false
            }
        }
    }
}
