//! Persisted row types for graphs and revisions.
//!
//! Adapted from the teacher's `db::models::workflow`: ISO8601 string
//! timestamps, `sqlx::FromRow` derives, and typed accessors layered over the
//! raw TEXT columns sqlite stores JSON/enum/semver values as.

pub mod graph;
pub mod job;
pub mod revision;

pub use graph::GraphRecord;
pub use job::JobRecord;
pub use revision::RevisionRecord;
