//! Live graph revision engine.
//!
//! Applies schema mutations to a running dataflow graph of stateful nodes
//! without tearing it down: optimistic concurrency via row-level write
//! locks, three-way merge of concurrent client edits, and minimal live
//! reconfiguration (destroy/configure/recreate) of the nodes a mutation
//! actually touches.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod merge;
pub mod node;
pub mod queue;
pub mod schema;
pub mod services;
pub mod status;
pub mod version;

pub use error::{EngineError, ErrorKind, Result};
pub use services::RevisionOrchestrator;
