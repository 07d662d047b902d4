//! API data transfer objects (DTOs) and response models
//!
//! Provides request/response structures for API endpoints with validation.

pub mod graph;
pub mod revision;

pub use graph::{CreateGraphRequest, GraphListQuery, GraphResponse, UpdateGraphRequest, UpdateGraphResponse};
pub use revision::{RevisionListQuery, RevisionResponse, SubmitRevisionRequest};

/// System health response
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealthResponse {
    /// Overall status
    pub status: String,

    /// Database connection status
    pub database: String,

    /// API version
    pub version: String,

    /// Current timestamp
    pub timestamp: String,
}

impl HealthResponse {
    /// Create a new health response
    pub fn new(status: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            database: database.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
