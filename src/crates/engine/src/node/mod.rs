//! The node handle contract: the abstract lifecycle every template must
//! satisfy, and the template registry the compiler looks templates up in.
//!
//! Concrete node implementations (agents, MCP servers, the Docker container
//! driver) are out of scope; this module specifies only the contract they
//! must satisfy, following the teacher's `async_trait`-based pluggable
//! behavior pattern used for `TaskExecutor`/`WorkflowExecutor`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// The logical kind of a node, used only by `LiveUpdatePlanner` for
/// ordering and by observers. The engine itself treats all nodes uniformly
/// through the `NodeHandle` contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Runtime,
    Tool,
    Mcp,
    Agent,
    Trigger,
    Other,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Runtime => "runtime",
            NodeKind::Tool => "tool",
            NodeKind::Mcp => "mcp",
            NodeKind::Agent => "agent",
            NodeKind::Trigger => "trigger",
            NodeKind::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// Opaque wrapper around a node's underlying resource (container handle,
/// connection pool, subprocess). The engine never inspects the contents;
/// only the owning `NodeHandle` implementation downcasts it.
pub struct NodeInstance(pub Box<dyn Any + Send + Sync>);

impl fmt::Debug for NodeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeInstance").finish_non_exhaustive()
    }
}

impl NodeInstance {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Box::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

/// Context passed to every handle operation: identity the handle can use to
/// derive stable external resource names (`containerName` etc, see
/// the node resource identity contract) plus the opaque submitter principal.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub graph_id: String,
    pub node_id: String,
    pub thread_id: Option<String>,
    pub principal: String,
}

impl NodeContext {
    /// Derive a stable external resource identity from `(graphId, nodeId,
    /// threadId)`, so retries and re-registrations reattach to pre-existing
    /// resources instead of leaking them.
    pub fn resource_identity(&self) -> String {
        match &self.thread_id {
            Some(thread_id) => format!("{}-{}-{}", self.graph_id, self.node_id, thread_id),
            None => format!("{}-{}", self.graph_id, self.node_id),
        }
    }
}

/// The lifecycle contract every template's handle must satisfy.
#[async_trait]
pub trait NodeHandle: Send + Sync {
    /// Produce a fully-initialized node instance.
    async fn create(&self, ctx: &NodeContext, config: &Value) -> Result<NodeInstance>;

    /// Request in-place reconfiguration. MAY return `Err` to signal
    /// "recreate required" (e.g. container image or environment changed).
    /// Must be idempotent on the same `next_init`.
    async fn configure(
        &self,
        ctx: &NodeContext,
        next_init: &Value,
        instance: &mut NodeInstance,
    ) -> Result<()>;

    /// Release all underlying resources, synchronously or with bounded
    /// wait. Must not throw on a partially-initialized node.
    async fn destroy(&self, ctx: &NodeContext, instance: NodeInstance);
}

/// Returned by a `TemplateRegistry` lookup: everything the compiler needs
/// to validate a node's config and build its handle.
pub struct Template {
    pub kind: NodeKind,
    pub config_schema: Option<Value>,
    pub required: Vec<crate::schema::RequiredConnection>,
    pub handle: Arc<dyn NodeHandle>,
}

/// Contract for resolving a template id to its kind, config validator, and
/// handle factory. Concrete templates are supplied by the embedding
/// application; the engine only consumes this trait.
pub trait TemplateRegistry: Send + Sync {
    fn lookup(&self, template_id: &str) -> Option<Arc<Template>>;
}
