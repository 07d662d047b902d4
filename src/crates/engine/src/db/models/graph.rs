//! `GraphRecord`: the persisted row for a graph.

use chrono::Utc;
use semver::Version;
use sqlx::FromRow;

use crate::db::DatabaseError;
use crate::error::{EngineError, Result};
use crate::schema::Schema;
use crate::status::GraphStatus;

/// A graph row as stored in sqlite. `schema`/`version`/`target_version`/
/// `status` are TEXT columns holding JSON / semver / the status name;
/// accessors below parse them into their domain types on demand.
#[derive(Debug, Clone, FromRow)]
pub struct GraphRecord {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub temporary: bool,
    pub schema_json: String,
    pub version: String,
    pub target_version: String,
    pub status: String,
    pub error: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

impl GraphRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, created_by: impl Into<String>) -> Self {
        let now = Utc::now().to_rfc3339();
        let initial = crate::version::initial_version().to_string();
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            temporary: false,
            schema_json: Schema::default().to_json().to_string(),
            version: initial.clone(),
            target_version: initial,
            status: GraphStatus::Created.to_string(),
            error: None,
            created_by: created_by.into(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn schema(&self) -> Result<Schema> {
        let value: serde_json::Value = serde_json::from_str(&self.schema_json)?;
        Ok(Schema::from_json(&value)?)
    }

    pub fn set_schema(&mut self, schema: &Schema) {
        self.schema_json = schema.to_json().to_string();
    }

    pub fn version(&self) -> Result<Version> {
        Version::parse(&self.version)
            .map_err(|e| EngineError::Internal(format!("corrupt version for graph {}: {e}", self.id)))
    }

    pub fn target_version(&self) -> Result<Version> {
        Version::parse(&self.target_version)
            .map_err(|e| EngineError::Internal(format!("corrupt targetVersion for graph {}: {e}", self.id)))
    }

    pub fn status(&self) -> Result<GraphStatus> {
        self.status
            .parse()
            .map_err(|e: String| EngineError::Database(DatabaseError::type_error(e)))
    }

    pub fn set_status(&mut self, status: GraphStatus) {
        self.status = status.to_string();
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status(), Ok(GraphStatus::Running))
    }

    pub fn has_pending_revision(&self) -> bool {
        self.version != self.target_version
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now().to_rfc3339();
    }
}
