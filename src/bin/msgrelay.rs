//! msgrelay: HTTP relay with an in-process consumer
//!
//! ## Architecture
//! ```text
//! POST /messages --> [Publisher] --> exchange --> queue --> [Consumer]
//!                                                               |
//!                                                               v
//!                                                        handler + SQLite
//! ```
//!
//! ## Configuration
//! - MSGRELAY_CONFIG: Path to a YAML config file (default: config.yaml)
//! - MSGRELAY__<SECTION>__<KEY>: Overrides, e.g. MSGRELAY__MESSAGING__URL
//! - MSGRELAY_LOG: Log filter (default: info)

use tokio::net::TcpListener;
use tracing::info;

use msgrelay::api;
use msgrelay::config::Config;
use msgrelay::runtime::Runtime;
use msgrelay::utils::bootstrap::{init_tracing, shutdown_signal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;
    let runtime = Runtime::start(&config).await?;

    let addr = config.server.bind_address();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            runtime.shutdown().await;
            return Err(e.into());
        }
    };
    info!(address = %addr, "msgrelay listening");

    let served = axum::serve(listener, api::router(runtime.api_state()))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    runtime.shutdown().await;
    served?;
    Ok(())
}
