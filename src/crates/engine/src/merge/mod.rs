//! Three-way merge of concurrently edited graph schemas.
//!
//! Path-keyed diffs are computed with the `json-patch` crate's RFC-6902
//! `diff`, which is also how `Revision.configurationDiff` is produced
//! (`json_patch::diff(&head, &merged)`). Node and edge identity is handled
//! at the schema level (by node id, and by the `(from, to)` edge pair)
//! rather than through generic JSON pointers, since the spec treats those as
//! first-class merge units with their own add/remove rules.

use std::collections::{BTreeMap, HashSet};

use json_patch::PatchOperation;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::schema::{Edge, Node, Schema, SchemaValidator};

/// A single merge conflict, carrying enough detail for the caller to
/// explain the failure (and, for validator-synthesized conflicts, the
/// underlying error code).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    ConcurrentModification,
    RemoveVsModify,
    ValidationFailure,
}

/// Outcome of a three-way merge.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    Success { merged: Schema },
    Conflict { conflicts: Vec<Conflict> },
}

/// Computes `merge(base, head, client)`, deterministic in its inputs.
pub struct ThreeWayMerger<'a> {
    validator: &'a SchemaValidator,
}

impl<'a> ThreeWayMerger<'a> {
    pub fn new(validator: &'a SchemaValidator) -> Self {
        Self { validator }
    }

    pub fn merge(&self, base: &Schema, head: &Schema, client: &Schema) -> MergeOutcome {
        let mut conflicts = Vec::new();

        let nodes = self.merge_nodes(base, head, client, &mut conflicts);
        let edges = self.merge_edges(base, head, client);

        if !conflicts.is_empty() {
            return MergeOutcome::Conflict { conflicts };
        }

        let mut merged = Schema::new(nodes, edges);
        merged.nodes.sort_by(|a, b| a.id.cmp(&b.id));
        merged.edges.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));

        if let Err(e) = self.validator.validate(&merged) {
            return MergeOutcome::Conflict {
                conflicts: vec![Conflict {
                    kind: ConflictKind::ValidationFailure,
                    path: "/".to_string(),
                    message: format!("{}:{}", e.code(), e),
                }],
            };
        }

        MergeOutcome::Success { merged }
    }

    fn merge_nodes(
        &self,
        base: &Schema,
        head: &Schema,
        client: &Schema,
        conflicts: &mut Vec<Conflict>,
    ) -> Vec<Node> {
        let base_map: BTreeMap<&str, &Node> =
            base.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let head_map: BTreeMap<&str, &Node> =
            head.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let client_map: BTreeMap<&str, &Node> =
            client.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        let mut all_ids: Vec<&str> = base_map
            .keys()
            .chain(head_map.keys())
            .chain(client_map.keys())
            .copied()
            .collect();
        all_ids.sort_unstable();
        all_ids.dedup();

        let mut merged = Vec::new();

        for id in all_ids {
            let b = base_map.get(id).copied();
            let h = head_map.get(id).copied();
            let c = client_map.get(id).copied();

            match (b, h, c) {
                // Unchanged by either side, or present nowhere interesting.
                (None, None, None) => {}

                // Added on one or both sides.
                (None, Some(h), None) => merged.push(h.clone()),
                (None, None, Some(c)) => merged.push(c.clone()),
                (None, Some(h), Some(c)) => {
                    if h == c {
                        merged.push(h.clone());
                    } else {
                        conflicts.push(Conflict {
                            kind: ConflictKind::ConcurrentModification,
                            path: format!("/nodes/{id}"),
                            message: format!(
                                "node {id} added on both sides with different bodies"
                            ),
                        });
                    }
                }

                // Removed by head, present (possibly modified) on client.
                (Some(b), None, Some(c)) => {
                    if b == c {
                        // client didn't touch it; head's removal applies.
                    } else {
                        conflicts.push(Conflict {
                            kind: ConflictKind::RemoveVsModify,
                            path: format!("/nodes/{id}"),
                            message: format!(
                                "node {id} removed by head but modified by client"
                            ),
                        });
                    }
                }

                // Removed by client, present (possibly modified) on head.
                (Some(b), Some(h), None) => {
                    if b == h {
                        // head didn't touch it; client's removal applies.
                    } else {
                        conflicts.push(Conflict {
                            kind: ConflictKind::RemoveVsModify,
                            path: format!("/nodes/{id}"),
                            message: format!(
                                "node {id} removed by client but modified by head"
                            ),
                        });
                    }
                }

                // Removed by both: nothing to emit.
                (Some(_), None, None) => {}

                // Present in all three: merge config field-by-field.
                (Some(b), Some(h), Some(c)) => {
                    match self.merge_node(id, b, h, c) {
                        Ok(node) => merged.push(node),
                        Err(mut node_conflicts) => conflicts.append(&mut node_conflicts),
                    }
                }
            }
        }

        merged
    }

    fn merge_node(
        &self,
        id: &str,
        base: &Node,
        head: &Node,
        client: &Node,
    ) -> std::result::Result<Node, Vec<Conflict>> {
        let mut conflicts = Vec::new();

        let template = if head.template == client.template {
            head.template.clone()
        } else if base.template == head.template {
            client.template.clone()
        } else if base.template == client.template {
            head.template.clone()
        } else {
            conflicts.push(Conflict {
                kind: ConflictKind::ConcurrentModification,
                path: format!("/nodes/{id}/template"),
                message: format!(
                    "node {id} template changed on both sides: {} vs {}",
                    head.template, client.template
                ),
            });
            head.template.clone()
        };

        let config = self.merge_config(id, &base.config, &head.config, &client.config, &mut conflicts);

        if !conflicts.is_empty() {
            return Err(conflicts);
        }

        Ok(Node {
            id: id.to_string(),
            template,
            config,
        })
    }

    fn merge_config(
        &self,
        node_id: &str,
        base: &Value,
        head: &Value,
        client: &Value,
        conflicts: &mut Vec<Conflict>,
    ) -> Value {
        let head_ops = json_patch::diff(base, head);
        let client_ops = json_patch::diff(base, client);

        let head_paths = paths_touched(&head_ops);
        let client_paths = paths_touched(&client_ops);

        let mut merged = base.clone();

        let mut all_paths: Vec<&String> = head_paths.keys().chain(client_paths.keys()).collect();
        all_paths.sort_unstable();
        all_paths.dedup();

        for path in all_paths {
            let head_touch = head_paths.get(path);
            let client_touch = client_paths.get(path);

            match (head_touch, client_touch) {
                (Some(h), None) => {
                    apply_pointer(&mut merged, path, h.clone());
                }
                (None, Some(c)) => {
                    apply_pointer(&mut merged, path, c.clone());
                }
                (Some(h), Some(c)) => {
                    if h == c {
                        apply_pointer(&mut merged, path, h.clone());
                    } else {
                        conflicts.push(Conflict {
                            kind: ConflictKind::ConcurrentModification,
                            path: format!("/nodes/{node_id}/config{path}"),
                            message: format!(
                                "config path {path} on node {node_id} modified by both sides"
                            ),
                        });
                    }
                }
                (None, None) => {}
            }
        }

        merged
    }

    fn merge_edges(&self, base: &Schema, head: &Schema, client: &Schema) -> Vec<Edge> {
        let base_set = base.edge_set();
        let head_set = head.edge_set();
        let client_set = client.edge_set();

        let removed_by_head: HashSet<_> = base_set.difference(&head_set).copied().collect();
        let removed_by_client: HashSet<_> = base_set.difference(&client_set).copied().collect();

        let mut merged: HashSet<(String, String)> = base_set
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();

        for (a, b) in head_set.union(&client_set) {
            merged.insert((a.to_string(), b.to_string()));
        }

        for (a, b) in removed_by_head.union(&removed_by_client) {
            merged.remove(&(a.to_string(), b.to_string()));
        }

        merged
            .into_iter()
            .map(|(from, to)| Edge { from, to })
            .collect()
    }
}

/// Walk RFC-6902 patch operations into a map of JSON-pointer path -> final
/// value, so both sides of a merge can be compared path by path. `Remove`
/// operations are represented with `Value::Null`, matching the "field went
/// away" case the caller treats the same as an explicit null assignment
/// would be for config purposes.
fn paths_touched(ops: &json_patch::Patch) -> BTreeMap<String, Value> {
    let mut touched = BTreeMap::new();
    for op in ops.0.iter() {
        match op {
            PatchOperation::Add(add) => {
                touched.insert(add.path.to_string(), add.value.clone());
            }
            PatchOperation::Replace(replace) => {
                touched.insert(replace.path.to_string(), replace.value.clone());
            }
            PatchOperation::Remove(remove) => {
                touched.insert(remove.path.to_string(), Value::Null);
            }
            _ => {}
        }
    }
    touched
}

/// Set the value at a JSON pointer path, creating intermediate object keys
/// as needed. Only handles object traversal (config values are JSON
/// objects in every template this engine supports).
fn apply_pointer(root: &mut Value, pointer: &str, value: Value) {
    let parts: Vec<&str> = pointer.split('/').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        *root = value;
        return;
    }

    let mut current = root;
    for part in &parts[..parts.len() - 1] {
        if !current.is_object() {
            *current = Value::Object(Default::default());
        }
        current = current
            .as_object_mut()
            .unwrap()
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }

    if !current.is_object() {
        *current = Value::Object(Default::default());
    }
    current
        .as_object_mut()
        .unwrap()
        .insert(parts.last().unwrap().to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Node;

    fn node(id: &str, instructions: &str) -> Node {
        Node {
            id: id.to_string(),
            template: "simple-agent".to_string(),
            config: serde_json::json!({ "instructions": instructions }),
        }
    }

    fn schema(nodes: Vec<Node>) -> Schema {
        Schema::new(nodes, vec![])
    }

    #[test]
    fn client_change_only_applies_cleanly() {
        let validator = SchemaValidator::structural();
        let base = schema(vec![node("agent-1", "A")]);
        let head = schema(vec![node("agent-1", "A")]);
        let client = schema(vec![node("agent-1", "B")]);

        let merger = ThreeWayMerger::new(&validator);
        match merger.merge(&base, &head, &client) {
            MergeOutcome::Success { merged } => {
                assert_eq!(merged.node("agent-1").unwrap().config["instructions"], "B");
            }
            MergeOutcome::Conflict { conflicts } => panic!("unexpected conflicts: {conflicts:?}"),
        }
    }

    #[test]
    fn concurrent_modification_on_same_path_conflicts() {
        let validator = SchemaValidator::structural();
        let base = schema(vec![node("agent-1", "A")]);
        let head = schema(vec![node("agent-1", "B")]);
        let client = schema(vec![node("agent-1", "C")]);

        let merger = ThreeWayMerger::new(&validator);
        match merger.merge(&base, &head, &client) {
            MergeOutcome::Success { .. } => panic!("expected a conflict"),
            MergeOutcome::Conflict { conflicts } => {
                assert_eq!(conflicts[0].kind, ConflictKind::ConcurrentModification);
            }
        }
    }

    #[test]
    fn disjoint_field_changes_both_apply() {
        let validator = SchemaValidator::structural();
        let base = Schema::new(
            vec![Node {
                id: "agent-1".to_string(),
                template: "simple-agent".to_string(),
                config: serde_json::json!({}),
            }],
            vec![],
        );
        let head = Schema::new(
            vec![Node {
                id: "agent-1".to_string(),
                template: "simple-agent".to_string(),
                config: serde_json::json!({ "instructions": "A" }),
            }],
            vec![],
        );
        let client = Schema::new(
            vec![Node {
                id: "agent-1".to_string(),
                template: "simple-agent".to_string(),
                config: serde_json::json!({ "invokeModelName": "m" }),
            }],
            vec![],
        );

        let merger = ThreeWayMerger::new(&validator);
        match merger.merge(&base, &head, &client) {
            MergeOutcome::Success { merged } => {
                let cfg = &merged.node("agent-1").unwrap().config;
                assert_eq!(cfg["instructions"], "A");
                assert_eq!(cfg["invokeModelName"], "m");
            }
            MergeOutcome::Conflict { conflicts } => panic!("unexpected conflicts: {conflicts:?}"),
        }
    }

    #[test]
    fn identical_client_and_head_returns_head_unchanged() {
        let validator = SchemaValidator::structural();
        let base = schema(vec![node("agent-1", "A")]);
        let head = schema(vec![node("agent-1", "B")]);
        let client = schema(vec![node("agent-1", "B")]);

        let merger = ThreeWayMerger::new(&validator);
        match merger.merge(&base, &head, &client) {
            MergeOutcome::Success { merged } => assert_eq!(merged, head),
            MergeOutcome::Conflict { conflicts } => panic!("unexpected conflicts: {conflicts:?}"),
        }
    }

    #[test]
    fn remove_vs_modify_conflicts() {
        let validator = SchemaValidator::structural();
        let base = schema(vec![node("agent-1", "A")]);
        let head = schema(vec![]);
        let client = schema(vec![node("agent-1", "B")]);

        let merger = ThreeWayMerger::new(&validator);
        match merger.merge(&base, &head, &client) {
            MergeOutcome::Success { .. } => panic!("expected a conflict"),
            MergeOutcome::Conflict { conflicts } => {
                assert_eq!(conflicts[0].kind, ConflictKind::RemoveVsModify);
            }
        }
    }

    #[test]
    fn merge_is_deterministic() {
        let validator = SchemaValidator::structural();
        let base = schema(vec![node("agent-1", "A")]);
        let head = schema(vec![node("agent-1", "A")]);
        let client = schema(vec![node("agent-1", "B")]);
        let merger = ThreeWayMerger::new(&validator);

        let first = match merger.merge(&base, &head, &client) {
            MergeOutcome::Success { merged } => merged,
            _ => panic!("expected success"),
        };
        let second = match merger.merge(&base, &head, &client) {
            MergeOutcome::Success { merged } => merged,
            _ => panic!("expected success"),
        };
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }
}
