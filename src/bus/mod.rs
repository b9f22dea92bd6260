//! Message bus for durable relay.
//!
//! This module contains:
//! - `MessagePublisher` trait: the seam the HTTP layer publishes through
//! - `Topology`: exchange, queue and routing key shared by both sides
//! - Bus error types
//! - Implementations: AMQP (RabbitMQ), Mock

use async_trait::async_trait;

use crate::config::MessagingConfig;
use crate::message::{EnvelopeError, MessageKind};
use crate::storage::StorageError;

// Implementation modules
pub mod amqp;
pub mod mock;

// Re-exports
pub use amqp::{
    ConnectionHandle, Consumer, DeliveryProcessor, Publisher, Settlement, TopologyManager,
};
pub use mock::MockPublisher;

// ============================================================================
// Errors
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Unknown message type: {0}")]
    UnknownKind(String),

    #[error("Handler '{kind}' failed: {message}")]
    Handler { kind: MessageKind, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cancelled")]
    Cancelled,
}

impl BusError {
    /// Errors caused by the message itself. Redelivery cannot change the
    /// outcome, so these are acknowledged instead of rejected.
    pub fn is_poison(&self) -> bool {
        matches!(self, BusError::Serialization(_) | BusError::UnknownKind(_))
    }
}

impl From<EnvelopeError> for BusError {
    fn from(e: EnvelopeError) -> Self {
        match e {
            EnvelopeError::UnknownKind(kind) => BusError::UnknownKind(kind),
            other => BusError::Serialization(other.to_string()),
        }
    }
}

// ============================================================================
// Topology
// ============================================================================

/// Broker-side names the publisher and consumer must agree on.
///
/// The exchange is direct-routed and durable, the queue is durable, and the
/// queue is bound to the exchange under `routing_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

impl Topology {
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_key: routing_key.into(),
        }
    }

    pub fn from_config(config: &MessagingConfig) -> Self {
        Self::new(&config.exchange, &config.queue, &config.routing_key)
    }
}

/// Lifecycle state of a broker connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never opened, or released by `close`.
    Absent,
    /// Connection and channel both usable.
    Open,
    /// Present but closed, locally or by the broker.
    Closed,
}

// ============================================================================
// Traits
// ============================================================================

/// Publishes relay messages.
///
/// Implementations:
/// - `Publisher`: RabbitMQ via AMQP
/// - `MockPublisher`: In-memory mock for testing
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish one message. Absent content is sent as the empty string.
    ///
    /// Returns `true` once the broker has accepted the message and `false`
    /// on any failure. Failures are logged, never propagated.
    async fn publish(&self, kind: MessageKind, content: Option<&str>) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_from_config() {
        let config = MessagingConfig::default();
        let topology = Topology::from_config(&config);
        assert_eq!(topology.exchange, config.exchange);
        assert_eq!(topology.queue, config.queue);
        assert_eq!(topology.routing_key, config.routing_key);
    }

    #[test]
    fn test_envelope_error_mapping() {
        let err: BusError = EnvelopeError::UnknownKind("fax".to_string()).into();
        assert!(matches!(err, BusError::UnknownKind(ref k) if k == "fax"));

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: BusError = EnvelopeError::Malformed(json_err).into();
        assert!(matches!(err, BusError::Serialization(_)));
        assert!(err.is_poison());
    }

    #[test]
    fn test_processing_failures_are_not_poison() {
        let err = BusError::Handler {
            kind: MessageKind::Report,
            message: "boom".to_string(),
        };
        assert!(!err.is_poison());
        assert!(!BusError::Connection("down".to_string()).is_poison());
    }
}
