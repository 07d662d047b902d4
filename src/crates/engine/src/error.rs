//! Domain error type for the graph revision engine
//!
//! `EngineError` is the single error type threaded through version arbitration,
//! schema validation, merging, persistence, the revision queue, and live
//! updates. `ErrorKind` classifies each variant for the queue's retry policy.

use thiserror::Error;

use crate::db::DatabaseError;
use crate::merge::Conflict;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// How a failure should be treated by the submitter and the revision queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Surfaced to the submitter; never retried; never advances `targetVersion`.
    Precondition,
    /// Retried by the queue with backoff; converted to Terminal on exhaustion.
    Transient,
    /// Revision marked `Failed`; `targetVersion` reset if it pointed at this revision.
    Terminal,
    /// Partial live-update failure; graph status transitions to `Error`.
    FatalLiveUpdate,
}

/// Domain error for the live graph revision engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: String, actual: String },

    #[error("merge conflict")]
    MergeConflict { conflicts: Vec<Conflict> },

    #[error("revision contains no changes")]
    RevisionWithoutChanges,

    #[error("schema is missing a required connection: {0}")]
    MissingRequiredConnection(String),

    #[error("version not found: {0}")]
    VersionNotFound(String),

    #[error("graph not found: {0}")]
    GraphNotFound(String),

    #[error("graph {0} is not running")]
    GraphNotRunning(String),

    #[error("graph {0} is already running")]
    GraphAlreadyRunning(String),

    #[error("trigger not found: {0}")]
    TriggerNotFound(String),

    #[error("revision not found: {0}")]
    GraphRevisionNotFound(String),

    #[error("invalid node type: {0}")]
    InvalidNodeType(String),

    #[error("trigger not started: {0}")]
    TriggerNotStarted(String),

    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("dangling edge: {0}")]
    DanglingEdge(String),

    #[error("node handle reported a recreate is required: {0}")]
    RecreateRequired(String),

    #[error("node handle operation failed: {0}")]
    HandleError(String),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Machine-readable error code, matching the surface-visible taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::VersionConflict { .. } => "VERSION_CONFLICT",
            EngineError::MergeConflict { .. } => "MERGE_CONFLICT",
            EngineError::RevisionWithoutChanges => "REVISION_WITHOUT_CHANGES",
            EngineError::MissingRequiredConnection(_) => "MISSING_REQUIRED_CONNECTION",
            EngineError::VersionNotFound(_) => "VERSION_NOT_FOUND",
            EngineError::GraphNotFound(_) => "GRAPH_NOT_FOUND",
            EngineError::GraphNotRunning(_) => "GRAPH_NOT_RUNNING",
            EngineError::GraphAlreadyRunning(_) => "GRAPH_ALREADY_RUNNING",
            EngineError::TriggerNotFound(_) => "TRIGGER_NOT_FOUND",
            EngineError::GraphRevisionNotFound(_) => "GRAPH_REVISION_NOT_FOUND",
            EngineError::InvalidNodeType(_) => "INVALID_NODE_TYPE",
            EngineError::TriggerNotStarted(_) => "TRIGGER_NOT_STARTED",
            EngineError::InvalidTemplate(_) => "INVALID_TEMPLATE",
            EngineError::InvalidConfig(_) => "INVALID_CONFIG",
            EngineError::DuplicateNodeId(_) => "DUPLICATE_NODE_ID",
            EngineError::DanglingEdge(_) => "DANGLING_EDGE",
            EngineError::RecreateRequired(_) => "RECREATE_REQUIRED",
            EngineError::HandleError(_) => "HANDLE_ERROR",
            EngineError::Database(_) => "DATABASE_ERROR",
            EngineError::Serialization(_) => "SERIALIZATION_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Classify this error for the revision queue's retry policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::VersionConflict { .. }
            | EngineError::MergeConflict { .. }
            | EngineError::RevisionWithoutChanges
            | EngineError::MissingRequiredConnection(_)
            | EngineError::VersionNotFound(_)
            | EngineError::InvalidTemplate(_)
            | EngineError::InvalidConfig(_)
            | EngineError::DuplicateNodeId(_)
            | EngineError::DanglingEdge(_)
            | EngineError::InvalidNodeType(_)
            | EngineError::TriggerNotStarted(_) => ErrorKind::Precondition,

            EngineError::GraphNotFound(_)
            | EngineError::GraphRevisionNotFound(_)
            | EngineError::TriggerNotFound(_) => ErrorKind::Terminal,

            EngineError::GraphNotRunning(_) | EngineError::GraphAlreadyRunning(_) => {
                ErrorKind::Precondition
            }

            EngineError::RecreateRequired(_) => ErrorKind::FatalLiveUpdate,
            EngineError::HandleError(_) => ErrorKind::FatalLiveUpdate,

            EngineError::Database(db) => {
                if db.is_not_found() {
                    ErrorKind::Terminal
                } else {
                    ErrorKind::Transient
                }
            }

            EngineError::Serialization(_) | EngineError::Internal(_) => ErrorKind::Terminal,
        }
    }

    pub fn version_conflict(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        EngineError::VersionConflict {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn merge_conflict(conflicts: Vec<Conflict>) -> Self {
        EngineError::MergeConflict { conflicts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_errors_are_not_retried() {
        let err = EngineError::RevisionWithoutChanges;
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert_eq!(err.code(), "REVISION_WITHOUT_CHANGES");
    }

    #[test]
    fn not_found_database_errors_are_terminal() {
        let err = EngineError::Database(DatabaseError::not_found("graph-1"));
        assert_eq!(err.kind(), ErrorKind::Terminal);
    }

    #[test]
    fn other_database_errors_are_transient() {
        let err = EngineError::Database(DatabaseError::query_error("serialization failure"));
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn recreate_required_is_fatal_live_update() {
        let err = EngineError::RecreateRequired("node-1".to_string());
        assert_eq!(err.kind(), ErrorKind::FatalLiveUpdate);
    }
}
