//! Builds a `CompiledGraph` from a `Schema`: topological order, template
//! lookup, config validation, wiring.
//!
//! The topological traversal generalizes the teacher's
//! `WorkflowExecutionEngine::find_next_nodes` (root detection via the
//! source/target id-set difference, BFS-style layering with a visited set
//! and a step safety limit) from "find the next runnable step" into a full
//! deterministic build order, ties broken by sorting each layer's node ids.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::node::{NodeContext, NodeHandle, NodeInstance, Template, TemplateRegistry};
use crate::schema::{Edge, Node, Schema};

use super::registry::{CompiledGraph, CompiledNode};

/// Kahn's algorithm over an arbitrary node-id/edge set, ties broken by
/// sorting each ready layer before draining it. Shared by
/// `GraphCompiler::get_build_order` and `LiveUpdatePlanner`, which both need
/// a deterministic topological order (of `next`'s nodes, or of `current`'s).
pub(crate) fn topological_order(node_ids: HashSet<&str>, edges: &[Edge]) -> Result<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = node_ids.iter().map(|id| (*id, 0)).collect();

    for edge in edges {
        if let Some(count) = in_degree.get_mut(edge.to.as_str()) {
            *count += 1;
        }
    }

    let outgoing: HashMap<&str, Vec<&str>> = {
        let mut map: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in edges {
            if node_ids.contains(edge.from.as_str()) {
                map.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
            }
        }
        map
    };

    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(id, _)| *id)
        .collect();
    ready.sort_unstable();
    let mut queue: VecDeque<&str> = ready.into();

    let mut order = Vec::with_capacity(node_ids.len());
    let mut remaining = in_degree.clone();

    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());

        let mut next_ready: Vec<&str> = Vec::new();
        if let Some(targets) = outgoing.get(id) {
            for target in targets {
                if let Some(count) = remaining.get_mut(target) {
                    *count -= 1;
                    if *count == 0 {
                        next_ready.push(target);
                    }
                }
            }
        }
        next_ready.sort_unstable();
        for id in next_ready {
            queue.push_back(id);
        }
    }

    if order.len() != node_ids.len() {
        let built: HashSet<&str> = order.iter().map(|s| s.as_str()).collect();
        let stuck: Vec<&str> = node_ids
            .iter()
            .filter(|id| !built.contains(*id))
            .copied()
            .collect();
        return Err(EngineError::Internal(format!(
            "schema is not a DAG: cycle involves {:?}",
            stuck
        )));
    }

    Ok(order)
}

/// A node fully prepared for handle construction: its resolved template,
/// validated config, and the "next init" value `configure`/`create` expect.
pub struct PreparedNode {
    pub template: Arc<Template>,
    pub validated_config: serde_json::Value,
    pub init: serde_json::Value,
}

pub struct GraphCompiler<'a> {
    templates: &'a dyn TemplateRegistry,
    principal: String,
}

impl<'a> GraphCompiler<'a> {
    pub fn new(templates: &'a dyn TemplateRegistry, principal: impl Into<String>) -> Self {
        Self {
            templates,
            principal: principal.into(),
        }
    }

    pub fn validate_schema(&self, schema: &Schema, validator: &crate::schema::SchemaValidator) -> Result<()> {
        validator.validate(schema)
    }

    /// The principal node handles see in `NodeContext` for every operation
    /// this compiler performs.
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Deterministic topological build order: Kahn's algorithm over the
    /// edge set, with each ready layer sorted by node id before being
    /// drained, so the same schema always yields the same order.
    pub fn get_build_order(&self, schema: &Schema) -> Result<Vec<String>> {
        topological_order(schema.node_ids(), &schema.edges)
    }

    pub fn prepare_node(&self, node: &Node) -> Result<PreparedNode> {
        let template = self
            .templates
            .lookup(&node.template)
            .ok_or_else(|| EngineError::InvalidNodeType(node.template.clone()))?;

        if let Some(schema) = &template.config_schema {
            let compiled = jsonschema::JSONSchema::compile(schema).map_err(|e| {
                EngineError::InvalidTemplate(format!("{}: {}", node.template, e))
            })?;
            if let Err(mut errors) = compiled.validate(&node.config) {
                let msg = errors.next().map(|e| e.to_string()).unwrap_or_default();
                return Err(EngineError::InvalidConfig(format!("{}: {}", node.id, msg)));
            };
        }

        Ok(PreparedNode {
            template,
            validated_config: node.config.clone(),
            init: node.config.clone(),
        })
    }

    pub async fn create_and_configure_handle(
        &self,
        graph_id: &str,
        node_id: &str,
        prepared: &PreparedNode,
    ) -> Result<(Arc<dyn NodeHandle>, NodeInstance)> {
        let ctx = NodeContext {
            graph_id: graph_id.to_string(),
            node_id: node_id.to_string(),
            thread_id: None,
            principal: self.principal.clone(),
        };
        let instance = prepared
            .template
            .handle
            .create(&ctx, &prepared.validated_config)
            .await?;
        Ok((prepared.template.handle.clone(), instance))
    }

    /// Execute the build order, preparing each node against already-built
    /// predecessors, creating handles, and inserting them into a fresh
    /// `CompiledGraph`. Any failure destroys already-built nodes in reverse
    /// order.
    pub async fn compile(&self, graph_id: &str, schema: &Schema) -> Result<CompiledGraph> {
        let order = self.get_build_order(schema)?;
        let mut cg = CompiledGraph::new(graph_id.to_string());
        cg.edges = schema.edges.clone();

        let mut built: Vec<String> = Vec::new();

        for node_id in &order {
            let node = schema
                .node(node_id)
                .expect("build order only contains schema node ids");

            match self.prepare_and_create(graph_id, node).await {
                Ok(compiled_node) => {
                    cg.nodes.insert(node_id.clone(), compiled_node);
                    built.push(node_id.clone());
                }
                Err(e) => {
                    for id in built.iter().rev() {
                        if let Some(node) = cg.nodes.remove(id) {
                            self.destroy_node(graph_id, node).await;
                        }
                    }
                    cg.status = crate::status::GraphStatus::Error;
                    return Err(e);
                }
            }
        }

        cg.status = crate::status::GraphStatus::Running;
        Ok(cg)
    }

    async fn prepare_and_create(&self, graph_id: &str, node: &Node) -> Result<CompiledNode> {
        let prepared = self.prepare_node(node)?;
        let (handle, instance) = self
            .create_and_configure_handle(graph_id, &node.id, &prepared)
            .await?;
        Ok(CompiledNode {
            id: node.id.clone(),
            template: node.template.clone(),
            kind: prepared.template.kind,
            config: node.config.clone(),
            handle,
            instance,
        })
    }

    pub async fn destroy_node(&self, graph_id: &str, node: CompiledNode) {
        let ctx = NodeContext {
            graph_id: graph_id.to_string(),
            node_id: node.id.clone(),
            thread_id: None,
            principal: self.principal.clone(),
        };
        node.handle.destroy(&ctx, node.instance).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeKind, Template};
    use crate::schema::{Edge, Node};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NoopHandle;

    #[async_trait]
    impl NodeHandle for NoopHandle {
        async fn create(&self, _ctx: &NodeContext, _config: &serde_json::Value) -> Result<NodeInstance> {
            Ok(NodeInstance::new(()))
        }
        async fn configure(
            &self,
            _ctx: &NodeContext,
            _next_init: &serde_json::Value,
            _instance: &mut NodeInstance,
        ) -> Result<()> {
            Ok(())
        }
        async fn destroy(&self, _ctx: &NodeContext, _instance: NodeInstance) {}
    }

    struct StaticRegistry;

    impl TemplateRegistry for StaticRegistry {
        fn lookup(&self, template_id: &str) -> Option<Arc<Template>> {
            if template_id == "unknown" {
                return None;
            }
            Some(Arc::new(Template {
                kind: NodeKind::Agent,
                config_schema: None,
                required: vec![],
                handle: Arc::new(NoopHandle),
            }))
        }
    }

    fn node(id: &str, template: &str) -> Node {
        Node {
            id: id.to_string(),
            template: template.to_string(),
            config: serde_json::json!({}),
        }
    }

    #[test]
    fn build_order_is_topological_and_deterministic() {
        let registry = StaticRegistry;
        let compiler = GraphCompiler::new(&registry, "system");
        let schema = Schema::new(
            vec![node("c", "t"), node("a", "t"), node("b", "t")],
            vec![
                Edge { from: "a".to_string(), to: "b".to_string() },
                Edge { from: "b".to_string(), to: "c".to_string() },
            ],
        );
        let order = compiler.get_build_order(&schema).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn independent_nodes_break_ties_by_id() {
        let registry = StaticRegistry;
        let compiler = GraphCompiler::new(&registry, "system");
        let schema = Schema::new(vec![node("z", "t"), node("a", "t")], vec![]);
        let order = compiler.get_build_order(&schema).unwrap();
        assert_eq!(order, vec!["a", "z"]);
    }

    #[tokio::test]
    async fn compile_builds_all_nodes_and_sets_running() {
        let registry = StaticRegistry;
        let compiler = GraphCompiler::new(&registry, "system");
        let schema = Schema::new(vec![node("a", "t")], vec![]);
        let cg = compiler.compile("g1", &schema).await.unwrap();
        assert_eq!(cg.status, crate::status::GraphStatus::Running);
        assert!(cg.nodes.contains_key("a"));
    }

    #[tokio::test]
    async fn compile_fails_on_unknown_template() {
        let registry = StaticRegistry;
        let compiler = GraphCompiler::new(&registry, "system");
        let schema = Schema::new(vec![node("a", "unknown")], vec![]);
        let err = compiler.compile("g1", &schema).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_NODE_TYPE");
    }
}
