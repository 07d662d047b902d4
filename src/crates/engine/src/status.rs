//! Shared status enums for the graph lifecycle and revision lifecycle.
//!
//! Both enums are used by the persisted `Graph`/`Revision` models, by the
//! in-memory `CompiledGraph`, and by the REST DTOs, so they live in one
//! place rather than being duplicated per layer (mirroring the teacher's
//! `TaskStatus` enum, which plays the same role for tasks).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Graph lifecycle status. Transitions only through the orchestrator/compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum GraphStatus {
    Created,
    Compiling,
    Running,
    Stopped,
    Error,
}

impl fmt::Display for GraphStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GraphStatus::Created => "Created",
            GraphStatus::Compiling => "Compiling",
            GraphStatus::Running => "Running",
            GraphStatus::Stopped => "Stopped",
            GraphStatus::Error => "Error",
        };
        write!(f, "{s}")
    }
}

impl FromStr for GraphStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Created" => Ok(GraphStatus::Created),
            "Compiling" => Ok(GraphStatus::Compiling),
            "Running" => Ok(GraphStatus::Running),
            "Stopped" => Ok(GraphStatus::Stopped),
            "Error" => Ok(GraphStatus::Error),
            other => Err(format!("unknown graph status: {other}")),
        }
    }
}

/// Revision lifecycle status. Terminal states (`Applied`, `Failed`) are
/// immutable once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RevisionStatus {
    Pending,
    Applying,
    Applied,
    Failed,
}

impl RevisionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RevisionStatus::Applied | RevisionStatus::Failed)
    }
}

impl fmt::Display for RevisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RevisionStatus::Pending => "Pending",
            RevisionStatus::Applying => "Applying",
            RevisionStatus::Applied => "Applied",
            RevisionStatus::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RevisionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(RevisionStatus::Pending),
            "Applying" => Ok(RevisionStatus::Applying),
            "Applied" => Ok(RevisionStatus::Applied),
            "Failed" => Ok(RevisionStatus::Failed),
            other => Err(format!("unknown revision status: {other}")),
        }
    }
}

/// Status of a durable `revision_jobs` row, distinct from `RevisionStatus`:
/// this tracks the queue's own delivery bookkeeping for a job, not the
/// revision's application lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "Pending",
            JobStatus::Processing => "Processing",
            JobStatus::Done => "Done",
            JobStatus::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(JobStatus::Pending),
            "Processing" => Ok(JobStatus::Processing),
            "Done" => Ok(JobStatus::Done),
            "Failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_status_round_trips_through_display_and_from_str() {
        for status in [
            GraphStatus::Created,
            GraphStatus::Compiling,
            GraphStatus::Running,
            GraphStatus::Stopped,
            GraphStatus::Error,
        ] {
            let s = status.to_string();
            assert_eq!(GraphStatus::from_str(&s).unwrap(), status);
        }
    }

    #[test]
    fn revision_terminal_states() {
        assert!(RevisionStatus::Applied.is_terminal());
        assert!(RevisionStatus::Failed.is_terminal());
        assert!(!RevisionStatus::Pending.is_terminal());
        assert!(!RevisionStatus::Applying.is_terminal());
    }
}
