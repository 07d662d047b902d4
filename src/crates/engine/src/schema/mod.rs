//! Graph schema types: nodes, edges, and the schema they form.
//!
//! A `Schema` is the declarative structure of a graph. It is pure data —
//! no handles, no compiled state — so it can be diffed, merged, validated,
//! and persisted as JSON without touching the live engine.

pub mod validator;

pub use validator::{RequiredConnection, SchemaValidator, TemplateDescriptor};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A single node in a graph schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub template: String,
    #[serde(default = "default_config")]
    pub config: serde_json::Value,
}

fn default_config() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

/// A directed edge between two node ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

/// The declarative structure of a graph: nodes plus the edges between them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Schema {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_ids(&self) -> HashSet<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    pub fn edge_set(&self) -> HashSet<(&str, &str)> {
        self.edges
            .iter()
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect()
    }

    /// Incoming edges for a node id.
    pub fn incoming(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.to == node_id).collect()
    }

    /// Outgoing edges for a node id.
    pub fn outgoing(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.from == node_id).collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("Schema always serializes")
    }

    pub fn from_json(value: &serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value.clone())
    }
}
