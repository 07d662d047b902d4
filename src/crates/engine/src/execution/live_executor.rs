//! Executes a `LiveUpdatePlan` against a running `CompiledGraph`:
//! removals first, then rebuilds attempting in-place reconfigure before
//! falling back to destroy-then-recreate.

use crate::error::Result;
use crate::node::{NodeContext, TemplateRegistry};
use crate::schema::Schema;

use super::compiler::GraphCompiler;
use super::planner::LiveUpdatePlan;
use super::registry::CompiledGraph;

pub struct LiveUpdateExecutor<'a> {
    compiler: GraphCompiler<'a>,
}

impl<'a> LiveUpdateExecutor<'a> {
    pub fn new(templates: &'a dyn TemplateRegistry, principal: impl Into<String>) -> Self {
        Self {
            compiler: GraphCompiler::new(templates, principal),
        }
    }

    /// Apply `plan` to `graph` in place. Errors from a single rebuild do not
    /// abort the remaining plan: the spec accepts a partially updated node
    /// set on failure, leaving `applyRevision` to mark the revision failed
    /// and reset `targetVersion`. The first error encountered is returned
    /// after the remaining removals/rebuilds are attempted, so the caller
    /// sees why the update is incomplete.
    pub async fn execute(
        &self,
        graph_id: &str,
        graph: &mut CompiledGraph,
        next: &Schema,
        plan: &LiveUpdatePlan,
    ) -> Result<()> {
        let mut first_error = None;

        for node_id in &plan.removals {
            if let Some(node) = graph.nodes.remove(node_id) {
                self.compiler.destroy_node(graph_id, node).await;
            }
        }

        for node_id in &plan.rebuilds {
            let Some(node) = next.node(node_id) else {
                continue;
            };
            if let Err(e) = self.rebuild_one(graph_id, graph, node_id, node).await {
                first_error.get_or_insert(e);
            }
        }

        graph.edges = next.edges.clone();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn rebuild_one(
        &self,
        graph_id: &str,
        graph: &mut CompiledGraph,
        node_id: &str,
        node: &crate::schema::Node,
    ) -> Result<()> {
        let prepared = self.compiler.prepare_node(node)?;

        let existing_same_template = graph
            .nodes
            .get(node_id)
            .map(|cn| cn.template == node.template)
            .unwrap_or(false);

        if existing_same_template {
            let ctx = NodeContext {
                graph_id: graph_id.to_string(),
                node_id: node_id.to_string(),
                thread_id: None,
                principal: self.compiler.principal().to_string(),
            };
            let configured = {
                let existing = graph.nodes.get_mut(node_id).expect("checked above");
                existing
                    .handle
                    .configure(&ctx, &prepared.init, &mut existing.instance)
                    .await
            };
            if configured.is_ok() {
                let existing = graph.nodes.get_mut(node_id).expect("checked above");
                existing.config = node.config.clone();
                return Ok(());
            }
        }

        if let Some(existing) = graph.nodes.remove(node_id) {
            self.compiler.destroy_node(graph_id, existing).await;
        }

        let (handle, instance) = self
            .compiler
            .create_and_configure_handle(graph_id, node_id, &prepared)
            .await?;

        graph.nodes.insert(
            node_id.to_string(),
            super::registry::CompiledNode {
                id: node_id.to_string(),
                template: node.template.clone(),
                kind: prepared.template.kind,
                config: node.config.clone(),
                handle,
                instance,
            },
        );

        Ok(())
    }
}
