//! `JobRecord`: the persisted row backing the durable revision queue.
//!
//! One row per revision, keyed by `revision_id`: `submitRevision` enqueues
//! at most one job per revision, so the job's own `id` is just the revision
//! id rather than a separately minted identifier.

use chrono::Utc;
use sqlx::FromRow;

use crate::db::DatabaseError;
use crate::error::{EngineError, Result};
use crate::status::JobStatus;

#[derive(Debug, Clone, FromRow)]
pub struct JobRecord {
    pub id: String,
    pub graph_id: String,
    pub revision_id: String,
    pub status: String,
    pub attempts: i64,
    pub next_attempt_at: String,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRecord {
    pub fn new(graph_id: impl Into<String>, revision_id: impl Into<String>) -> Self {
        let now = Utc::now().to_rfc3339();
        let revision_id = revision_id.into();
        Self {
            id: revision_id.clone(),
            graph_id: graph_id.into(),
            revision_id,
            status: JobStatus::Pending.to_string(),
            attempts: 0,
            next_attempt_at: now.clone(),
            last_error: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn status(&self) -> Result<JobStatus> {
        self.status
            .parse()
            .map_err(|e: String| EngineError::Database(DatabaseError::type_error(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_pending_with_zero_attempts() {
        let job = JobRecord::new("g1", "r1");
        assert_eq!(job.status().unwrap(), JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.id, "r1");
    }
}
