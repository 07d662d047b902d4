//! In-memory graph compilation and live reconfiguration.
//!
//! Generalizes the teacher's `execution::workflow_engine` topological
//! traversal (root detection via source/target set difference, BFS-style
//! layering) from "find the next runnable step" into a full deterministic
//! build order, and adds the live-update planner/executor the spec
//! requires on top of it.

pub mod compiler;
pub mod live_executor;
pub mod planner;
pub mod registry;

pub use compiler::GraphCompiler;
pub use live_executor::LiveUpdateExecutor;
pub use planner::{LiveUpdatePlan, LiveUpdatePlanner};
pub use registry::{CompiledGraph, CompiledNode, NodeRegistry};
