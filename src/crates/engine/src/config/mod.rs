//! Engine configuration: TOML file loading for the database, queue backoff
//! policy, live-update wait tuning, and REST bind address.

pub mod engine;

pub use engine::{
    DatabaseConfig, EngineConfig, EngineConfigError, LiveUpdateConfig, QueueConfig, ServerInfoConfig,
};
