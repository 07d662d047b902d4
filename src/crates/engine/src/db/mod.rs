//! Persistence layer: sqlite connection pooling, row types, and
//! repositories for graphs, revisions, and revision queue jobs.

pub mod connection;
pub mod error;
pub mod models;
pub mod repositories;

pub use connection::{DatabaseConnection, DatabasePool, PoolStatistics};
pub use error::{DatabaseError, DbResult};
pub use repositories::{GraphRepository, JobRepository, RevisionRepository};
