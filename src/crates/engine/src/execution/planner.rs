//! Diffs a running `CompiledGraph` against a target `Schema` into the
//! minimal ordered set of removals and rebuilds.

use std::collections::HashSet;

use crate::error::Result;
use crate::schema::Schema;

use super::compiler::topological_order;
use super::registry::CompiledGraph;

/// An ordered plan: `removals` in reverse topological order of the current
/// graph, `rebuilds` in topological order of the target schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveUpdatePlan {
    pub removals: Vec<String>,
    pub rebuilds: Vec<String>,
}

impl LiveUpdatePlan {
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.rebuilds.is_empty()
    }
}

pub struct LiveUpdatePlanner;

impl LiveUpdatePlanner {
    pub fn new() -> Self {
        Self
    }

    pub fn plan(&self, current: &CompiledGraph, next: &Schema) -> Result<LiveUpdatePlan> {
        let current_ids: HashSet<&str> = current.nodes.keys().map(|s| s.as_str()).collect();
        let next_ids = next.node_ids();

        // Rule 1: removals are every node in `current` absent from `next`.
        let removal_set: HashSet<&str> = current_ids.difference(&next_ids).copied().collect();

        // Rule 2: rebuild candidates are nodes whose config or edge-set changed.
        let mut rebuild_set: HashSet<&str> = HashSet::new();
        for node in &next.nodes {
            let Some(existing) = current.nodes.get(&node.id) else {
                // New node: always a "rebuild" (create).
                rebuild_set.insert(node.id.as_str());
                continue;
            };
            if existing.config != node.config {
                rebuild_set.insert(node.id.as_str());
                continue;
            }
            let current_incident = incident_edges(&current.edges, &node.id);
            let next_incident = incident_edges(&next.edges, &node.id);
            if current_incident != next_incident {
                rebuild_set.insert(node.id.as_str());
            }
        }

        // Rule 3: dependency closure — iteratively pull in upstream nodes
        // whose downstream neighbor is already marked for rebuild, since a
        // downstream replacement invalidates the upstream's cached reference.
        loop {
            let mut added = false;
            for edge in &next.edges {
                if rebuild_set.contains(edge.to.as_str()) && !rebuild_set.contains(edge.from.as_str()) {
                    rebuild_set.insert(edge.from.as_str());
                    added = true;
                }
            }
            if !added {
                break;
            }
        }

        // Rule 4: removals in reverse topological order of `current`; rebuilds
        // in topological order of `next`.
        let current_edges: Vec<crate::schema::Edge> = current.edges.clone();
        let current_node_ids: HashSet<&str> = current_ids.clone();
        let mut removal_order = topological_order(current_node_ids, &current_edges)?;
        removal_order.reverse();
        let removals = removal_order
            .into_iter()
            .filter(|id| removal_set.contains(id.as_str()))
            .collect();

        let rebuild_order = topological_order(next_ids, &next.edges)?;
        let rebuilds = rebuild_order
            .into_iter()
            .filter(|id| rebuild_set.contains(id.as_str()))
            .collect();

        Ok(LiveUpdatePlan { removals, rebuilds })
    }
}

impl Default for LiveUpdatePlanner {
    fn default() -> Self {
        Self::new()
    }
}

fn incident_edges<'a>(edges: &'a [crate::schema::Edge], node_id: &str) -> HashSet<(&'a str, &'a str)> {
    edges
        .iter()
        .filter(|e| e.from == node_id || e.to == node_id)
        .map(|e| (e.from.as_str(), e.to.as_str()))
        .collect()
}
