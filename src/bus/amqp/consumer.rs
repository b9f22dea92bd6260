//! Consuming side of the relay.
//!
//! A [`Consumer`] owns the subscription; each delivery goes through a
//! [`DeliveryProcessor`], which decodes, handles, records, and finally
//! settles the delivery with exactly one ack or reject.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use futures::{FutureExt, StreamExt};
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicQosOptions,
        BasicRejectOptions,
    },
    types::FieldTable,
};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{ConnectionHandle, TopologyManager};
use crate::bus::{BusError, ConnectionState, Result};
use crate::config::MessagingConfig;
use crate::handlers::MessageHandler;
use crate::message::{MessageEnvelope, MessageKind};
use crate::storage::RecordStore;
use crate::utils::retry::connect_backoff;

/// How long `close` waits for an in-flight delivery after cancelling.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Final disposition of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Processed, or unprocessable in a way redelivery cannot fix.
    Ack,
    /// Processing failed; rejected without requeue.
    Reject,
}

/// Turns delivery bodies into handled, recorded messages.
pub struct DeliveryProcessor {
    handler: Arc<dyn MessageHandler>,
    store: Arc<dyn RecordStore>,
}

impl DeliveryProcessor {
    pub fn new(handler: Arc<dyn MessageHandler>, store: Arc<dyn RecordStore>) -> Self {
        Self { handler, store }
    }

    /// Run the type-specific handler for one message.
    pub async fn handle_message(&self, kind: MessageKind, content: &str) -> Result<()> {
        self.handler.handle(kind, content).await
    }

    /// Decode, handle and record one body. Returns the new record id.
    ///
    /// Decode failures come back as poison errors (see [`BusError::is_poison`]);
    /// handler and store failures come back as-is.
    pub async fn process(&self, body: &[u8]) -> Result<i64> {
        let envelope = MessageEnvelope::decode(body)?;
        info!(kind = %envelope.kind, content = %envelope.content, "Received message");

        self.handle_message(envelope.kind, &envelope.content).await?;
        let id = self.store.save(envelope.kind, &envelope.content).await?;

        info!(kind = %envelope.kind, id, "Message processed");
        Ok(id)
    }

    /// Process a body and decide how to settle it.
    ///
    /// A panic inside processing is caught and settles as a reject, so every
    /// exit path yields exactly one settlement.
    pub async fn settle(&self, body: &[u8]) -> Settlement {
        match AssertUnwindSafe(self.process(body)).catch_unwind().await {
            Ok(Ok(_)) => Settlement::Ack,
            Ok(Err(BusError::UnknownKind(kind))) => {
                warn!(kind = %kind, "Unknown message type, skipping");
                Settlement::Ack
            }
            Ok(Err(e)) if e.is_poison() => {
                warn!(error = %e, "Malformed message, skipping");
                Settlement::Ack
            }
            Ok(Err(e)) => {
                error!(error = %e, "Message processing failed");
                Settlement::Reject
            }
            Err(_) => {
                error!("Message processing panicked");
                Settlement::Reject
            }
        }
    }

    /// Process a broker delivery and ack or reject it.
    pub async fn dispatch(&self, delivery: Delivery) {
        let settlement = self.settle(&delivery.data).await;

        let settled = match settlement {
            Settlement::Ack => delivery.acker.ack(BasicAckOptions::default()).await,
            Settlement::Reject => {
                delivery
                    .acker
                    .reject(BasicRejectOptions { requeue: false })
                    .await
            }
        };

        match settled {
            Ok(()) => debug!(delivery_tag = delivery.delivery_tag, ?settlement, "Delivery settled"),
            Err(e) => error!(
                delivery_tag = delivery.delivery_tag,
                ?settlement,
                error = %e,
                "Failed to settle delivery"
            ),
        }
    }
}

/// Long-lived subscription to the relay queue.
///
/// Deliveries are pulled with a prefetch limit (1 by default) and processed
/// one after another on a spawned task.
///
/// [`Consumer::cancel`] stops connection retries between attempts. An attempt
/// already in flight always runs to completion and lands in the owned handle,
/// so [`Consumer::close`] can release it. Cancellation is permanent.
pub struct Consumer {
    manager: TopologyManager,
    connect_attempts: u32,
    connect_delay: Duration,
    prefetch: u16,
    consumer_tag: String,
    processor: Arc<DeliveryProcessor>,
    handle: Mutex<ConnectionHandle>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: watch::Sender<bool>,
}

impl Consumer {
    pub fn new(config: &MessagingConfig, processor: DeliveryProcessor) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            manager: TopologyManager::from_config(config),
            connect_attempts: config.connect_attempts.max(1),
            connect_delay: config.connect_delay(),
            prefetch: config.prefetch,
            consumer_tag: config.consumer_tag.clone(),
            processor: Arc::new(processor),
            handle: Mutex::new(ConnectionHandle::new()),
            worker: Mutex::new(None),
            cancel,
        }
    }

    pub fn processor(&self) -> &Arc<DeliveryProcessor> {
        &self.processor
    }

    pub async fn state(&self) -> ConnectionState {
        self.handle.lock().await.state()
    }

    /// Stop connecting. Pending retry delays end early; an open in progress
    /// finishes first.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once [`Consumer::cancel`] has been called.
    pub async fn cancelled(&self) {
        wait_cancelled(self.cancel.subscribe()).await
    }

    /// Whether the delivery task is still running.
    pub async fn is_consuming(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Connect with fixed-delay retry, declare the topology, set prefetch.
    ///
    /// Returns `false` once all attempts are exhausted or the consumer is
    /// cancelled.
    pub async fn connect(&self) -> bool {
        if self.handle.lock().await.is_valid() {
            return true;
        }

        let failures = AtomicU32::new(0);
        let cancel = self.cancel.subscribe();
        let result = (move || async move {
            if self.is_cancelled() {
                return Err(BusError::Cancelled);
            }
            self.open().await
        })
        .retry(connect_backoff(self.connect_attempts, self.connect_delay))
        .sleep(move |delay: Duration| {
            let cancel = cancel.clone();
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wait_cancelled(cancel) => {}
                }
            }
        })
        .when(|e: &BusError| !matches!(e, BusError::Cancelled))
        .notify(|e: &BusError, delay: Duration| {
            let attempt = failures.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(
                attempt,
                max_attempts = self.connect_attempts,
                error = %e,
                retry_in = ?delay,
                "Connection attempt failed, retrying"
            );
        })
        .await;

        match result {
            Ok(opened) => {
                let mut handle = self.handle.lock().await;
                if let Err(e) = handle.close().await {
                    debug!(error = %e, "Previous consumer connection did not close cleanly");
                }
                *handle = opened;
                info!(prefetch = self.prefetch, "Consumer connected");
                true
            }
            Err(BusError::Cancelled) => {
                info!("Consumer connect cancelled");
                false
            }
            Err(e) => {
                error!(
                    attempts = self.connect_attempts,
                    error = %e,
                    "Failed to connect to AMQP after multiple attempts"
                );
                false
            }
        }
    }

    async fn open(&self) -> Result<ConnectionHandle> {
        let mut handle = self.manager.open().await?;

        let qos = handle
            .channel()?
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await;
        if let Err(e) = qos {
            if let Err(close_err) = handle.close().await {
                debug!(error = %close_err, "Failed to close connection after qos error");
            }
            return Err(BusError::Channel(format!("Failed to set prefetch: {}", e)));
        }

        Ok(handle)
    }

    /// Connect, then subscribe and return without waiting for deliveries.
    pub async fn start_consuming(&self) -> bool {
        if !self.connect().await {
            return false;
        }
        if self.is_cancelled() {
            // The connection stays in the handle for close()
            info!("Consumer cancelled before subscribing");
            return false;
        }

        match self.subscribe().await {
            Ok(()) => {
                info!(queue = %self.manager.topology().queue, "Consumer started successfully");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to start consuming");
                false
            }
        }
    }

    async fn subscribe(&self) -> Result<()> {
        let channel = self.handle.lock().await.channel()?.clone();
        let queue = self.manager.topology().queue.clone();

        let mut deliveries = channel
            .basic_consume(
                &queue,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to start consumer: {}", e)))?;

        let processor = self.processor.clone();
        let worker = tokio::spawn(async move {
            while let Some(delivery) = deliveries.next().await {
                match delivery {
                    Ok(delivery) => processor.dispatch(delivery).await,
                    Err(e) => {
                        error!(error = %e, "Consumer delivery error");
                        break;
                    }
                }
            }
            info!(queue = %queue, "Consumer stream ended");
        });

        if let Some(previous) = self.worker.lock().await.replace(worker) {
            previous.abort();
        }
        Ok(())
    }

    /// Run the type-specific handler for one message.
    pub async fn handle_message(&self, kind: MessageKind, content: &str) -> Result<()> {
        self.processor.handle_message(kind, content).await
    }

    /// Process and settle a single delivery.
    pub async fn dispatch(&self, delivery: Delivery) {
        self.processor.dispatch(delivery).await
    }

    /// Stop consuming, close channel then connection, reset to absent.
    ///
    /// The in-flight delivery, if any, gets a short window to finish. Errors
    /// are logged and reported as `false`.
    pub async fn close(&self) -> bool {
        let mut handle = self.handle.lock().await;

        if let Some(mut worker) = self.worker.lock().await.take() {
            let cancelled = match handle.channel() {
                Ok(channel) => match channel
                    .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
                    .await
                {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "Failed to cancel consumer");
                        false
                    }
                },
                Err(_) => false,
            };

            if !cancelled || tokio::time::timeout(DRAIN_TIMEOUT, &mut worker).await.is_err() {
                worker.abort();
            }
        }

        match handle.close().await {
            Ok(()) => {
                info!("Consumer connection closed");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to close consumer connection");
                false
            }
        }
    }
}

/// Resolves once the flag is set. A dropped sender counts as never set.
async fn wait_cancelled(mut cancel: watch::Receiver<bool>) {
    let closed = cancel.wait_for(|cancelled| *cancelled).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
