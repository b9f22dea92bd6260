//! msgrelay-consumer: standalone queue consumer
//!
//! Drains the relay queue without serving HTTP. Useful when publishing and
//! consuming run as separate deployments against the same broker.
//!
//! ## Configuration
//! Same as `msgrelay`; the `server` section is ignored.

use std::sync::Arc;

use tracing::{error, info};

use msgrelay::bus::{Consumer, DeliveryProcessor};
use msgrelay::config::Config;
use msgrelay::handlers::SimulatedHandler;
use msgrelay::storage::{RecordStore, SqliteRecordStore};
use msgrelay::utils::bootstrap::{init_tracing, shutdown_signal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;

    let store = Arc::new(SqliteRecordStore::new(config.storage.clone()));
    store.init().await?;

    let processor = DeliveryProcessor::new(
        Arc::new(SimulatedHandler::new(config.handlers.clone())),
        store.clone(),
    );
    let consumer = Arc::new(Consumer::new(&config.messaging, processor));

    // The signal cancels connect retries between attempts; an open in flight
    // finishes and is closed below
    tokio::spawn({
        let consumer = consumer.clone();
        async move {
            shutdown_signal().await;
            consumer.cancel();
        }
    });

    if consumer.start_consuming().await {
        info!("Waiting for messages. To exit press CTRL+C");
        consumer.cancelled().await;
    } else if consumer.is_cancelled() {
        info!("Stopped before the consumer connected");
    } else {
        error!("Consumer did not start");
    }

    consumer.close().await;
    store.close().await;
    info!("msgrelay-consumer stopped");
    Ok(())
}
