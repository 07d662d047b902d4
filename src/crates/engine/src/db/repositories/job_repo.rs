//! Revision job persistence, backing `RevisionQueue`'s durability.

use std::sync::Arc;

use chrono::Utc;

use crate::db::{DatabaseConnection, DatabaseError};
use crate::error::{EngineError, Result};
use crate::status::JobStatus;

use super::super::models::JobRecord;

pub struct JobRepository {
    db: Arc<DatabaseConnection>,
}

impl JobRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn create(&self, job: &JobRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO revision_jobs (id, graph_id, revision_id, status, attempts, \
             next_attempt_at, last_error, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(&job.graph_id)
        .bind(&job.revision_id)
        .bind(&job.status)
        .bind(job.attempts)
        .bind(&job.next_attempt_at)
        .bind(&job.last_error)
        .bind(&job.created_at)
        .bind(&job.updated_at)
        .execute(self.db.pool())
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    pub async fn mark_processing(&self, revision_id: &str) -> Result<()> {
        self.set_status(revision_id, JobStatus::Processing, None).await
    }

    pub async fn mark_done(&self, revision_id: &str) -> Result<()> {
        self.set_status(revision_id, JobStatus::Done, None).await
    }

    pub async fn mark_failed(&self, revision_id: &str, error: &str) -> Result<()> {
        self.set_status(revision_id, JobStatus::Failed, Some(error)).await
    }

    async fn set_status(&self, revision_id: &str, status: JobStatus, error: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE revision_jobs SET status = ?, last_error = ?, updated_at = ? WHERE revision_id = ?",
        )
        .bind(status.to_string())
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(revision_id)
        .execute(self.db.pool())
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    /// Record a transient failure and the attempt/backoff state for the
    /// next try, without moving the job to a terminal status.
    pub async fn mark_retry(
        &self,
        revision_id: &str,
        attempts: i64,
        next_attempt_at: &str,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE revision_jobs SET status = ?, attempts = ?, next_attempt_at = ?, \
             last_error = ?, updated_at = ? WHERE revision_id = ?",
        )
        .bind(JobStatus::Pending.to_string())
        .bind(attempts)
        .bind(next_attempt_at)
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(revision_id)
        .execute(self.db.pool())
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    /// Jobs a previous process left `Pending` or `Processing` — picked back
    /// up by `RevisionQueue::recover` at startup so a restart mid-drain
    /// doesn't strand them.
    pub async fn list_unfinished(&self) -> Result<Vec<JobRecord>> {
        sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM revision_jobs WHERE status IN ('Pending', 'Processing') \
             ORDER BY graph_id, created_at",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| EngineError::Database(e.into()))
    }
}
