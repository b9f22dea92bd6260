//! Storage configuration types.

use serde::Deserialize;

/// SQLite record store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path, or `:memory:`.
    pub path: String,
    /// Pool size. Keep at 1 for `:memory:` so every query sees the same database.
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "msgrelay.db".to_string(),
            max_connections: 1,
        }
    }
}

impl StorageConfig {
    /// In-memory store, mostly for tests.
    pub fn in_memory() -> Self {
        Self {
            path: ":memory:".to_string(),
            max_connections: 1,
        }
    }
}
