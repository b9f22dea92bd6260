//! AMQP (RabbitMQ) relay implementation.
//!
//! Uses a durable direct exchange with one durable queue bound under a fixed
//! routing key. Publisher and consumer each own an independent connection;
//! both go through [`TopologyManager`] so the broker-side entities exist no
//! matter which side starts first.

mod consumer;
mod publisher;

use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::{debug, info, warn};

use super::{BusError, ConnectionState, Result, Topology};
use crate::config::MessagingConfig;

pub use consumer::{Consumer, DeliveryProcessor, Settlement};
pub use publisher::Publisher;

/// Reply code sent with a normal channel/connection close.
const REPLY_SUCCESS: u16 = 200;

/// An AMQP connection plus the channel opened on it.
///
/// Owned exclusively by the component that created it; publisher and
/// consumer never share one.
#[derive(Default)]
pub struct ConnectionHandle {
    connection: Option<Connection>,
    channel: Option<Channel>,
}

impl ConnectionHandle {
    /// An absent handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    ///
    /// lapin flips the connection and channel status on broker close frames
    /// and I/O errors, so `Open` reflects more than a local flag. A broker
    /// that vanishes silently is only noticed at the next heartbeat or write.
    pub fn state(&self) -> ConnectionState {
        match (&self.connection, &self.channel) {
            (None, _) => ConnectionState::Absent,
            (Some(connection), Some(channel))
                if connection.status().connected() && channel.status().connected() =>
            {
                ConnectionState::Open
            }
            _ => ConnectionState::Closed,
        }
    }

    /// True only while both connection and channel are usable.
    pub fn is_valid(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// The open channel.
    pub fn channel(&self) -> Result<&Channel> {
        match &self.channel {
            Some(channel) if self.is_valid() => Ok(channel),
            _ => Err(BusError::Connection("No open channel".to_string())),
        }
    }

    /// Close channel then connection and reset to `Absent`.
    ///
    /// Each side is closed only if still connected, so closing twice or
    /// closing an absent handle is a no-op. Both sides are always attempted;
    /// the first error is returned.
    pub async fn close(&mut self) -> Result<()> {
        let mut first_error = None;

        if let Some(channel) = self.channel.take() {
            if channel.status().connected() {
                if let Err(e) = channel.close(REPLY_SUCCESS, "Bye").await {
                    first_error = Some(BusError::Channel(format!("Failed to close channel: {}", e)));
                }
            }
        }

        if let Some(connection) = self.connection.take() {
            if connection.status().connected() {
                if let Err(e) = connection.close(REPLY_SUCCESS, "Bye").await {
                    if first_error.is_none() {
                        first_error = Some(BusError::Connection(format!(
                            "Failed to close connection: {}",
                            e
                        )));
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Establishes connections and declares the relay topology.
///
/// Never retries on its own; callers pick the retry policy.
#[derive(Debug, Clone)]
pub struct TopologyManager {
    url: String,
    topology: Topology,
}

impl TopologyManager {
    pub fn new(url: impl Into<String>, topology: Topology) -> Self {
        Self {
            url: url.into(),
            topology,
        }
    }

    pub fn from_config(config: &MessagingConfig) -> Self {
        Self::new(&config.url, Topology::from_config(config))
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Make `handle` usable, opening and declaring only when it is not.
    ///
    /// Returns `true` when a new connection was opened, `false` when the
    /// existing one was kept.
    pub async fn ensure(&self, handle: &mut ConnectionHandle) -> Result<bool> {
        match handle.state() {
            ConnectionState::Open => return Ok(false),
            ConnectionState::Closed => {
                debug!("Discarding stale AMQP connection");
                if let Err(e) = handle.close().await {
                    debug!(error = %e, "Stale connection did not close cleanly");
                }
            }
            ConnectionState::Absent => {}
        }

        *handle = self.open().await?;
        Ok(true)
    }

    /// Open a new connection and channel and declare the topology on it.
    pub async fn open(&self) -> Result<ConnectionHandle> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| BusError::Connection(format!("Failed to connect: {}", e)))?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close_err) = connection.close(REPLY_SUCCESS, "Bye").await {
                    debug!(error = %close_err, "Failed to close connection after channel error");
                }
                return Err(BusError::Connection(format!(
                    "Failed to create channel: {}",
                    e
                )));
            }
        };

        let mut handle = ConnectionHandle {
            connection: Some(connection),
            channel: Some(channel),
        };

        let declared = match handle.channel() {
            Ok(channel) => self.declare(channel).await,
            Err(e) => Err(e),
        };
        if let Err(e) = declared {
            if let Err(close_err) = handle.close().await {
                warn!(error = %close_err, "Failed to close connection after declare error");
            }
            return Err(e);
        }

        info!(
            exchange = %self.topology.exchange,
            queue = %self.topology.queue,
            routing_key = %self.topology.routing_key,
            "Connected to AMQP"
        );

        Ok(handle)
    }

    /// Declare exchange and queue and bind them. Idempotent on the broker.
    pub async fn declare(&self, channel: &Channel) -> Result<()> {
        let Topology {
            exchange,
            queue,
            routing_key,
        } = &self.topology;

        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Connection(format!("Failed to declare exchange: {}", e)))?;

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Connection(format!("Failed to declare queue: {}", e)))?;

        channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Connection(format!("Failed to bind queue: {}", e)))?;

        debug!(queue = %queue, exchange = %exchange, "Bound queue to exchange");
        Ok(())
    }
}
