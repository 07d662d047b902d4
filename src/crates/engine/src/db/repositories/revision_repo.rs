//! Revision persistence.

use std::sync::Arc;

use sqlx::SqliteConnection;

use crate::db::{DatabaseConnection, DatabaseError};
use crate::error::{EngineError, Result};

use super::super::models::RevisionRecord;

pub struct RevisionRepository {
    db: Arc<DatabaseConnection>,
}

impl RevisionRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn create(&self, conn: &mut SqliteConnection, revision: &RevisionRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO graph_revisions (id, graph_id, base_version, to_version, \
             client_schema_json, new_schema_json, configuration_diff_json, status, error, \
             created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&revision.id)
        .bind(&revision.graph_id)
        .bind(&revision.base_version)
        .bind(&revision.to_version)
        .bind(&revision.client_schema_json)
        .bind(&revision.new_schema_json)
        .bind(&revision.configuration_diff_json)
        .bind(&revision.status)
        .bind(&revision.error)
        .bind(&revision.created_by)
        .bind(&revision.created_at)
        .bind(&revision.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    pub async fn find_by_id(&self, graph_id: &str, revision_id: &str) -> Result<RevisionRecord> {
        sqlx::query_as::<_, RevisionRecord>(
            "SELECT * FROM graph_revisions WHERE id = ? AND graph_id = ?",
        )
        .bind(revision_id)
        .bind(graph_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(DatabaseError::from)?
        .ok_or_else(|| EngineError::GraphRevisionNotFound(revision_id.to_string()))
    }

    /// Load the revision whose `toVersion` equals `version`, used to resolve
    /// a base or head schema that isn't the graph's current `schema` column.
    pub async fn find_by_graph_and_version(
        &self,
        graph_id: &str,
        version: &str,
    ) -> Result<Option<RevisionRecord>> {
        sqlx::query_as::<_, RevisionRecord>(
            "SELECT * FROM graph_revisions WHERE graph_id = ? AND to_version = ? \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(graph_id)
        .bind(version)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| EngineError::Database(e.into()))
    }

    pub async fn list_for_graph(
        &self,
        graph_id: &str,
        status: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<RevisionRecord>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, RevisionRecord>(
                    "SELECT * FROM graph_revisions WHERE graph_id = ? AND status = ? \
                     ORDER BY created_at DESC LIMIT ?",
                )
                .bind(graph_id)
                .bind(status)
                .bind(limit.unwrap_or(100))
                .fetch_all(self.db.pool())
                .await
            }
            None => {
                sqlx::query_as::<_, RevisionRecord>(
                    "SELECT * FROM graph_revisions WHERE graph_id = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(graph_id)
                .bind(limit.unwrap_or(100))
                .fetch_all(self.db.pool())
                .await
            }
        };
        rows.map_err(|e| EngineError::Database(e.into()))
    }

    /// Pending revisions for a graph other than `exclude_id`, used to
    /// recompute `targetVersion` after a failed apply resets it.
    pub async fn pending_for_graph(
        &self,
        conn: &mut SqliteConnection,
        graph_id: &str,
        exclude_id: &str,
    ) -> Result<Vec<RevisionRecord>> {
        sqlx::query_as::<_, RevisionRecord>(
            "SELECT * FROM graph_revisions WHERE graph_id = ? AND status = 'Pending' AND id != ?",
        )
        .bind(graph_id)
        .bind(exclude_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| EngineError::Database(e.into()))
    }

    pub async fn update(&self, conn: &mut SqliteConnection, revision: &RevisionRecord) -> Result<()> {
        sqlx::query(
            "UPDATE graph_revisions SET status = ?, error = ?, new_schema_json = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(&revision.status)
        .bind(&revision.error)
        .bind(&revision.new_schema_json)
        .bind(&revision.updated_at)
        .bind(&revision.id)
        .execute(&mut *conn)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }
}
