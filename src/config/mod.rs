//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod messaging;
mod server;
mod storage;

use std::time::Duration;

use serde::Deserialize;

pub use messaging::{MessagingConfig, DEFAULT_EXCHANGE, DEFAULT_QUEUE, DEFAULT_ROUTING_KEY};
pub use server::{HandlerConfig, ServerConfig};
pub use storage::StorageConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "MSGRELAY_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "MSGRELAY";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "MSGRELAY_LOG";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] ::config::ConfigError),
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Broker connection and topology.
    pub messaging: MessagingConfig,
    /// Record store configuration.
    pub storage: StorageConfig,
    /// Simulated handler latencies.
    pub handlers: HandlerConfig,
    /// Upper bound on waiting for background tasks at shutdown, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            messaging: MessagingConfig::default(),
            storage: StorageConfig::default(),
            handlers: HandlerConfig::default(),
            shutdown_timeout_secs: 5,
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix, `__` separated
    ///    (e.g. `MSGRELAY__MESSAGING__URL`)
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Create config for testing: in-memory store, no handler latency.
    pub fn for_test() -> Self {
        Self {
            storage: StorageConfig::in_memory(),
            handlers: HandlerConfig::immediate(),
            ..Self::default()
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.messaging.exchange, DEFAULT_EXCHANGE);
        assert_eq!(config.messaging.queue, DEFAULT_QUEUE);
        assert_eq!(config.messaging.routing_key, DEFAULT_ROUTING_KEY);
        assert_eq!(config.messaging.connect_attempts, 5);
        assert_eq!(config.messaging.connect_delay(), Duration::from_secs(5));
        assert_eq!(config.messaging.prefetch, 1);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_config_for_test() {
        let config = Config::for_test();
        assert_eq!(config.storage.path, ":memory:");
        assert_eq!(config.handlers.report_delay(), Duration::ZERO);
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  port: 9090\nmessaging:\n  queue: custom_queue\n  connect_attempts: 2\nstorage:\n  path: /tmp/relay.db"
        )
        .unwrap();

        let config = Config::load(file.path().to_str()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.messaging.queue, "custom_queue");
        assert_eq!(config.messaging.connect_attempts, 2);
        // Unset keys keep their defaults
        assert_eq!(config.messaging.exchange, DEFAULT_EXCHANGE);
        assert_eq!(config.storage.path, "/tmp/relay.db");
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        assert!(Config::load(Some("/nonexistent/msgrelay.yaml")).is_err());
    }
}
