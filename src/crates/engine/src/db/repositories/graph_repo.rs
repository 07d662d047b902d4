//! Graph persistence.
//!
//! `get_for_update` issues a raw `BEGIN IMMEDIATE` rather than going through
//! `SqlitePool::begin` (which starts a deferred transaction): sqlite only
//! takes the write lock eagerly under `IMMEDIATE`, and that eager lock is the
//! linearization point two concurrent submitters for the same graph race on.

use std::sync::Arc;

use sqlx::SqliteConnection;

use crate::db::{DatabaseConnection, DatabaseError};
use crate::error::{EngineError, Result};

use super::super::models::GraphRecord;

pub struct GraphRepository {
    db: Arc<DatabaseConnection>,
}

impl GraphRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn create(&self, graph: &GraphRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO graphs (id, name, description, temporary, schema_json, version, \
             target_version, status, error, created_by, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&graph.id)
        .bind(&graph.name)
        .bind(&graph.description)
        .bind(graph.temporary)
        .bind(&graph.schema_json)
        .bind(&graph.version)
        .bind(&graph.target_version)
        .bind(&graph.status)
        .bind(&graph.error)
        .bind(&graph.created_by)
        .bind(&graph.created_at)
        .bind(&graph.updated_at)
        .execute(self.db.pool())
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<GraphRecord> {
        sqlx::query_as::<_, GraphRecord>("SELECT * FROM graphs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(DatabaseError::from)?
            .ok_or_else(|| EngineError::GraphNotFound(id.to_string()))
    }

    pub async fn find_all(&self) -> Result<Vec<GraphRecord>> {
        sqlx::query_as::<_, GraphRecord>("SELECT * FROM graphs ORDER BY created_at")
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| EngineError::Database(e.into()))
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM graphs WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await
            .map_err(DatabaseError::from)?;
        if result.rows_affected() == 0 {
            return Err(EngineError::GraphNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Open a write-locking transaction and load the graph row under it. The
    /// caller owns the connection for the remainder of the critical section
    /// and must call `commit`/`rollback`.
    pub async fn get_for_update(&self, conn: &mut SqliteConnection, id: &str) -> Result<GraphRecord> {
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(DatabaseError::from)?;

        let row = sqlx::query_as::<_, GraphRecord>("SELECT * FROM graphs WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(DatabaseError::from)?;

        match row {
            Some(record) => Ok(record),
            None => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(EngineError::GraphNotFound(id.to_string()))
            }
        }
    }

    pub async fn update(&self, conn: &mut SqliteConnection, graph: &GraphRecord) -> Result<()> {
        sqlx::query(
            "UPDATE graphs SET name = ?, description = ?, schema_json = ?, version = ?, \
             target_version = ?, status = ?, error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&graph.name)
        .bind(&graph.description)
        .bind(&graph.schema_json)
        .bind(&graph.version)
        .bind(&graph.target_version)
        .bind(&graph.status)
        .bind(&graph.error)
        .bind(&graph.updated_at)
        .bind(&graph.id)
        .execute(&mut *conn)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    pub async fn commit(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .map_err(DatabaseError::from)?;
        Ok(())
    }

    pub async fn rollback(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("ROLLBACK")
            .execute(&mut *conn)
            .await
            .map_err(DatabaseError::from)?;
        Ok(())
    }

    pub async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        self.db
            .pool()
            .acquire()
            .await
            .map_err(|e| EngineError::Database(e.into()))
    }
}
