//! API request handlers
//!
//! Provides handler functions for all API endpoints organized by resource.

pub mod graphs;
pub mod health;
pub mod revisions;

pub use graphs::{create_graph, delete_graph, destroy_graph, get_graph, list_graphs, run_graph, update_graph};
pub use health::{health, health_detailed};
pub use revisions::{get_revision, list_revisions, submit_revision};
