//! `RevisionRecord`: the persisted row for a graph revision.

use chrono::Utc;
use sqlx::FromRow;

use crate::db::DatabaseError;
use crate::error::{EngineError, Result};
use crate::schema::Schema;
use crate::status::RevisionStatus;

/// A revision row as stored in sqlite. `configuration_diff` is the RFC-6902
/// JSON Patch from the head schema at creation time to `newSchema`.
#[derive(Debug, Clone, FromRow)]
pub struct RevisionRecord {
    pub id: String,
    pub graph_id: String,
    pub base_version: String,
    pub to_version: String,
    pub client_schema_json: String,
    pub new_schema_json: String,
    pub configuration_diff_json: String,
    pub status: String,
    pub error: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

impl RevisionRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        graph_id: impl Into<String>,
        base_version: &semver::Version,
        to_version: &semver::Version,
        client_schema: &Schema,
        new_schema: &Schema,
        configuration_diff: &json_patch::Patch,
        created_by: impl Into<String>,
    ) -> Result<Self> {
        let now = Utc::now().to_rfc3339();
        Ok(Self {
            id: id.into(),
            graph_id: graph_id.into(),
            base_version: base_version.to_string(),
            to_version: to_version.to_string(),
            client_schema_json: serde_json::to_string(&client_schema.to_json())?,
            new_schema_json: serde_json::to_string(&new_schema.to_json())?,
            configuration_diff_json: serde_json::to_string(configuration_diff)?,
            status: RevisionStatus::Pending.to_string(),
            error: None,
            created_by: created_by.into(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn new_schema(&self) -> Result<Schema> {
        let value: serde_json::Value = serde_json::from_str(&self.new_schema_json)?;
        Ok(Schema::from_json(&value)?)
    }

    pub fn client_schema(&self) -> Result<Schema> {
        let value: serde_json::Value = serde_json::from_str(&self.client_schema_json)?;
        Ok(Schema::from_json(&value)?)
    }

    pub fn to_version(&self) -> Result<semver::Version> {
        semver::Version::parse(&self.to_version)
            .map_err(|e| EngineError::Internal(format!("corrupt toVersion for revision {}: {e}", self.id)))
    }

    pub fn status(&self) -> Result<RevisionStatus> {
        self.status
            .parse()
            .map_err(|e: String| EngineError::Database(DatabaseError::type_error(e)))
    }

    pub fn set_status(&mut self, status: RevisionStatus) {
        self.status = status.to_string();
        self.updated_at = Utc::now().to_rfc3339();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.set_status(RevisionStatus::Failed);
        self.error = Some(error.into());
    }

    pub fn is_terminal(&self) -> bool {
        self.status().map(|s| s.is_terminal()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use semver::Version;

    #[test]
    fn new_revision_starts_pending() {
        let base = Version::new(1, 0, 0);
        let to = Version::new(1, 0, 1);
        let schema = Schema::default();
        let diff = json_patch::diff(&schema.to_json(), &schema.to_json());
        let rec = RevisionRecord::new("r1", "g1", &base, &to, &schema, &schema, &diff, "alice").unwrap();
        assert_eq!(rec.status().unwrap(), RevisionStatus::Pending);
        assert!(!rec.is_terminal());
    }

    #[test]
    fn fail_sets_terminal_status_and_error() {
        let base = Version::new(1, 0, 0);
        let to = Version::new(1, 0, 1);
        let schema = Schema::default();
        let diff = json_patch::diff(&schema.to_json(), &schema.to_json());
        let mut rec = RevisionRecord::new("r1", "g1", &base, &to, &schema, &schema, &diff, "alice").unwrap();
        rec.fail("boom");
        assert!(rec.is_terminal());
        assert_eq!(rec.error.as_deref(), Some("boom"));
    }
}
