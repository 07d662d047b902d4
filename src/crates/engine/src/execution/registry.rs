//! `CompiledGraph`, `CompiledNode`, and the process-local `NodeRegistry`.
//!
//! Grounded on the deleted `pattern::registry::PatternRegistry`:
//! `Arc<RwLock<HashMap<String, PatternConfig>>>` with register/get/contains/
//! remove, each mapping lock poisoning into a domain error rather than
//! panicking. Here the map is `graphId -> CompiledGraph` instead of
//! `patternId -> PatternConfig`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::node::{NodeHandle, NodeInstance, NodeKind};
use crate::schema::Edge;
use crate::status::GraphStatus;

/// A single compiled node: its handle and the live instance the handle
/// produced. The `CompiledNode` exclusively owns both.
pub struct CompiledNode {
    pub id: String,
    pub template: String,
    pub kind: NodeKind,
    pub config: Value,
    pub handle: Arc<dyn NodeHandle>,
    pub instance: NodeInstance,
}

/// The in-memory realization of a schema with live node instances. The
/// `CompiledGraph` exclusively owns each `CompiledNode`; nodes reference
/// each other only by id, resolved back through this map.
pub struct CompiledGraph {
    pub id: String,
    pub status: GraphStatus,
    pub nodes: HashMap<String, CompiledNode>,
    pub edges: Vec<Edge>,
}

impl CompiledGraph {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: GraphStatus::Compiling,
            nodes: HashMap::new(),
            edges: Vec::new(),
        }
    }

    pub fn edge_set(&self) -> std::collections::HashSet<(&str, &str)> {
        self.edges
            .iter()
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect()
    }
}

/// Process-local map of `graphId -> CompiledGraph`. A single engine
/// instance is authoritative per graph; reads and register/destroy writes
/// are atomic with respect to one another.
#[derive(Default)]
pub struct NodeRegistry {
    graphs: RwLock<HashMap<String, Arc<RwLock<CompiledGraph>>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, graph_id: impl Into<String>, cg: CompiledGraph) {
        self.graphs
            .write()
            .insert(graph_id.into(), Arc::new(RwLock::new(cg)));
    }

    pub fn get(&self, graph_id: &str) -> Option<Arc<RwLock<CompiledGraph>>> {
        self.graphs.read().get(graph_id).cloned()
    }

    pub fn get_status(&self, graph_id: &str) -> Option<GraphStatus> {
        self.get(graph_id).map(|cg| cg.read().status)
    }

    pub fn contains(&self, graph_id: &str) -> bool {
        self.graphs.read().contains_key(graph_id)
    }

    /// Tear down all nodes in reverse build order and remove the entry.
    /// Build order here is taken from the stored node insertion order,
    /// since `HashMap` doesn't preserve it; callers that need a precise
    /// reverse-topological teardown should use `GraphCompiler::destroy_node`
    /// directly against the build order they computed.
    pub async fn destroy(&self, graph_id: &str, order: &[String]) -> Result<()> {
        let cg = self
            .graphs
            .write()
            .remove(graph_id)
            .ok_or_else(|| EngineError::GraphNotFound(graph_id.to_string()))?;

        let mut cg = Arc::try_unwrap(cg)
            .map_err(|_| EngineError::Internal("graph still has live readers".to_string()))?
            .into_inner();

        for node_id in order.iter().rev() {
            if let Some(node) = cg.nodes.remove(node_id) {
                let ctx = crate::node::NodeContext {
                    graph_id: graph_id.to_string(),
                    node_id: node.id.clone(),
                    thread_id: None,
                    principal: "system".to_string(),
                };
                node.handle.destroy(&ctx, node.instance).await;
            }
        }

        Ok(())
    }

    pub fn graph_ids(&self) -> Vec<String> {
        self.graphs.read().keys().cloned().collect()
    }
}
