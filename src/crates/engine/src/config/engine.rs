//! Engine configuration: database location, queue backoff policy, the
//! `Compiling`-wait timeout, and the REST server bind address.
//!
//! Loads and parses `engine.toml`, following the teacher's
//! `config/server.rs` shape (`from_str`/`from_file`/`load()` searching
//! `CONFIG_PATH` then well-known locations) stripped of SSL/security/LDAP,
//! none of which this engine has any use for (auth/identity/transport are
//! explicitly out of scope).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::RetryPolicy;

#[derive(Debug, Error)]
pub enum EngineConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(std::io::Error),
    #[error("failed to parse TOML: {0}")]
    ParseError(toml::de::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// SQLite database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file path, or `:memory:`.
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// Exponential backoff for transient revision-apply failures, the
/// TOML-facing mirror of `queue::RetryPolicy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_backoff_base_secs() -> u64 {
    2
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_max_attempts() -> u32 {
    3
}
fn default_jitter() -> bool {
    true
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backoff_base_secs: default_backoff_base_secs(),
            backoff_factor: default_backoff_factor(),
            max_attempts: default_max_attempts(),
            jitter: default_jitter(),
        }
    }
}

impl QueueConfig {
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_secs(self.backoff_base_secs),
            factor: self.backoff_factor,
            max_attempts: self.max_attempts,
            jitter: self.jitter,
        }
    }
}

/// How long `applyRevision` waits for a `Compiling` graph to settle before
/// proceeding anyway (spec §4.11.2 step 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveUpdateConfig {
    #[serde(default = "default_wait_limit_secs")]
    pub compiling_wait_limit_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub compiling_poll_interval_secs: u64,
}

fn default_wait_limit_secs() -> u64 {
    180
}
fn default_poll_interval_secs() -> u64 {
    5
}

impl Default for LiveUpdateConfig {
    fn default() -> Self {
        Self {
            compiling_wait_limit_secs: default_wait_limit_secs(),
            compiling_poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// REST server identification/bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfoConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerInfoConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub server: ServerInfoConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub live_update: LiveUpdateConfig,
}

impl EngineConfig {
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, EngineConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(EngineConfigError::ReadError)?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self, EngineConfigError> {
        toml::from_str(content).map_err(EngineConfigError::ParseError)
    }

    /// Load from `CONFIG_PATH`, then well-known locations, then fall back
    /// to an in-memory-database default (suitable for local development and
    /// tests, never for a durable deployment).
    pub fn load() -> Result<Self, EngineConfigError> {
        if let Ok(config_path) = std::env::var("CONFIG_PATH") {
            return Self::from_file(config_path);
        }

        let paths = [
            PathBuf::from("config/engine.toml"),
            PathBuf::from("../config/engine.toml"),
            PathBuf::from("./engine.toml"),
        ];
        for path in &paths {
            if path.exists() {
                return Self::from_file(path);
            }
        }

        Ok(Self {
            server: ServerInfoConfig::default(),
            database: DatabaseConfig {
                path: ":memory:".to_string(),
                max_connections: 1,
            },
            queue: QueueConfig::default(),
            live_update: LiveUpdateConfig::default(),
        })
    }

    pub fn database_url(&self) -> String {
        if self.database.path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}", self.database.path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let toml_content = r#"
[database]
path = "engine.db"
"#;
        let config = EngineConfig::from_str(toml_content).unwrap();
        assert_eq!(config.database.path, "engine.db");
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn parses_full_toml() {
        let toml_content = r#"
[server]
bind_address = "127.0.0.1:9000"

[database]
path = "engine.db"
max_connections = 10

[queue]
backoff_base_secs = 1
backoff_factor = 3.0
max_attempts = 5
jitter = false

[live_update]
compiling_wait_limit_secs = 60
compiling_poll_interval_secs = 2
"#;
        let config = EngineConfig::from_str(toml_content).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:9000");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.queue.max_attempts, 5);
        assert!(!config.queue.jitter);
        assert_eq!(config.live_update.compiling_wait_limit_secs, 60);
    }

    #[test]
    fn queue_config_converts_to_retry_policy() {
        let queue = QueueConfig {
            backoff_base_secs: 2,
            backoff_factor: 2.0,
            max_attempts: 3,
            jitter: true,
        };
        let policy = queue.to_retry_policy();
        assert_eq!(policy.base, Duration::from_secs(2));
        assert_eq!(policy.max_attempts, 3);
    }

    #[test]
    fn memory_database_url_uses_sqlite_memory_scheme() {
        let config = EngineConfig {
            server: ServerInfoConfig::default(),
            database: DatabaseConfig {
                path: ":memory:".to_string(),
                max_connections: 1,
            },
            queue: QueueConfig::default(),
            live_update: LiveUpdateConfig::default(),
        };
        assert_eq!(config.database_url(), "sqlite::memory:");
    }
}
