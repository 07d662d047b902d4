//! Graph API models and DTOs

use serde::{Deserialize, Serialize};

use crate::db::models::GraphRecord;
use crate::schema::Schema;

/// Request to create a new graph. The graph starts `Created` with an empty
/// schema at the initial version; nodes are added via `submitRevision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGraphRequest {
    pub name: String,
}

impl CreateGraphRequest {
    pub fn validate(&self) -> crate::api::error::ApiResult<()> {
        crate::api::middleware::validation::validate_not_empty(&self.name, "name")?;
        crate::api::middleware::validation::validate_string_length(&self.name, "name", 1, 255)?;
        Ok(())
    }
}

/// `PATCH /graphs/:id` body (spec §6 `update`). Either metadata-only
/// (`name`/`description`) or schema-carrying, never both in the same call
/// at the orchestrator level — the handler routes based on which fields
/// are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateGraphRequest {
    pub current_version: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub schema: Option<Schema>,
}

/// Response to `update`: the graph, plus the `Pending` revision when the
/// update carried a schema change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateGraphResponse {
    pub graph: GraphResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<super::revision::RevisionResponse>,
}

/// Graph response for API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphResponse {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub schema: Schema,
    pub version: String,
    pub target_version: String,
    pub status: String,
    pub error: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

impl GraphResponse {
    pub fn from_record(graph: GraphRecord) -> crate::api::error::ApiResult<Self> {
        let schema = graph.schema()?;
        Ok(Self {
            id: graph.id,
            name: graph.name,
            description: graph.description,
            schema,
            version: graph.version,
            target_version: graph.target_version,
            status: graph.status,
            error: graph.error,
            created_by: graph.created_by,
            created_at: graph.created_at,
            updated_at: graph.updated_at,
        })
    }
}

/// Query parameters for listing graphs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphListQuery {
    pub status: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}
