//! Revision API models and DTOs

use serde::{Deserialize, Serialize};

use crate::db::models::RevisionRecord;
use crate::schema::Schema;

/// `POST /graphs/:id/revisions` body: `submitRevision(graphId, baseVersion,
/// clientSchema, principal)` (spec §4.11.1). `principal` itself comes from
/// the request's principal header, not the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRevisionRequest {
    pub base_version: String,
    pub client_schema: Schema,
}

/// Revision response for API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionResponse {
    pub id: String,
    pub graph_id: String,
    pub base_version: String,
    pub to_version: String,
    pub client_schema: Schema,
    pub new_schema: Schema,
    pub configuration_diff: serde_json::Value,
    pub status: String,
    pub error: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

impl RevisionResponse {
    pub fn from_record(revision: RevisionRecord) -> crate::api::error::ApiResult<Self> {
        let client_schema = revision.client_schema()?;
        let new_schema = revision.new_schema()?;
        let configuration_diff: serde_json::Value =
            serde_json::from_str(&revision.configuration_diff_json)?;
        Ok(Self {
            id: revision.id,
            graph_id: revision.graph_id,
            base_version: revision.base_version,
            to_version: revision.to_version,
            client_schema,
            new_schema,
            configuration_diff,
            status: revision.status,
            error: revision.error,
            created_by: revision.created_by,
            created_at: revision.created_at,
            updated_at: revision.updated_at,
        })
    }
}

/// Query parameters for listing a graph's revisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}
