//! Daemon configuration.
//!
//! Layered: built-in defaults, then an optional TOML file, then `ASPEND_`
//! environment variables. Command-line flags override the bind address and
//! config path.

use serde::{Deserialize, Serialize};

use aspen_engine::EngineConfig;
use aspen_guard::GuardConfig;

use crate::error::{DaemonError, DaemonResult};

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// PostgreSQL settings. When absent the daemon runs on in-memory
    /// storage (development only).
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub guards: GuardConfig,

    /// Endpoint of the notification delivery service. When absent, sends
    /// are logged and dropped.
    #[serde(default)]
    pub notification_endpoint: Option<String>,

    /// Seconds between scheduler ticks.
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
}

fn default_tick_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8460".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    10
}

impl DaemonConfig {
    /// Load configuration from defaults, an optional file, and the
    /// environment.
    pub fn load(path: Option<&str>) -> DaemonResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("ASPEND")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| DaemonError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:8460");
        assert_eq!(config.tick_seconds, 60);
        assert!(config.database.is_none());
        assert_eq!(config.engine.realtime_interval_minutes, 15);
    }
}
