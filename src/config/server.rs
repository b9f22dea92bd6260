//! HTTP server and handler configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port for the HTTP API.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for binding a listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Simulated latencies for the type-specific handlers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Delay for notification messages, in milliseconds.
    pub notification_delay_ms: u64,
    /// Delay for email messages, in milliseconds.
    pub email_delay_ms: u64,
    /// Delay for report messages, in milliseconds.
    pub report_delay_ms: u64,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            notification_delay_ms: 500,
            email_delay_ms: 1000,
            report_delay_ms: 3000,
        }
    }
}

impl HandlerConfig {
    /// No simulated latency at all.
    pub fn immediate() -> Self {
        Self {
            notification_delay_ms: 0,
            email_delay_ms: 0,
            report_delay_ms: 0,
        }
    }

    pub fn notification_delay(&self) -> Duration {
        Duration::from_millis(self.notification_delay_ms)
    }

    pub fn email_delay(&self) -> Duration {
        Duration::from_millis(self.email_delay_ms)
    }

    pub fn report_delay(&self) -> Duration {
        Duration::from_millis(self.report_delay_ms)
    }
}
