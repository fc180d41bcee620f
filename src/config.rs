//! Configuration module for urlwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database holding target definitions (default: "urlwatch.db")
    pub db_path: String,
    /// Cadence of the uptime/summary tick (default: 1s)
    pub tick_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "urlwatch.db".to_string(),
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `URLWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `URLWATCH_DB_PATH`: Database file path (default: "urlwatch.db")
    /// - `URLWATCH_TICK_MS`: Uptime tick in milliseconds (default: 1000)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = lookup("URLWATCH_HTTP_PORT").and_then(|s| s.parse().ok()) {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("URLWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(ms) = lookup("URLWATCH_TICK_MS").and_then(|s| s.parse::<u64>().ok()) {
            if ms > 0 {
                cfg.tick_interval = Duration::from_millis(ms);
            }
        }

        cfg
    }
}
