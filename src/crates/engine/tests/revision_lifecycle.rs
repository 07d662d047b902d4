//! End-to-end scenarios for the live graph revision engine (spec §8):
//! live apply, sequential queueing, concurrent conflict, non-conflicting
//! merge, stale retry, and required-edge validation. Each test drives the
//! engine exactly as the REST layer would: through `RevisionOrchestrator`,
//! against a real (in-memory) sqlite database and a real `RevisionQueue`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use engine::db::DatabaseConnection;
use engine::error::Result;
use engine::execution::NodeRegistry;
use engine::node::{NodeContext, NodeHandle, NodeInstance, NodeKind, Template, TemplateRegistry};
use engine::queue::{RetryPolicy, RevisionQueue};
use engine::schema::{Edge, Node, Schema};
use engine::services::RevisionOrchestrator;
use engine::status::RevisionStatus;

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

/// `trigger` has no required connections; `simple-agent` requires at least
/// one incoming edge (spec §8.6's trigger -> agent requirement).
struct TestTemplates;

impl TemplateRegistry for TestTemplates {
    fn lookup(&self, template_id: &str) -> Option<Arc<Template>> {
        match template_id {
            "trigger" => Some(Arc::new(Template {
                kind: NodeKind::Trigger,
                config_schema: None,
                required: vec![],
                handle: Arc::new(NoopHandle),
            })),
            "simple-agent" => Some(Arc::new(Template {
                kind: NodeKind::Agent,
                config_schema: None,
                required: vec![engine::schema::RequiredConnection {
                    kind: "trigger".to_string(),
                    direction: engine::schema::validator::ConnectionDirection::Incoming,
                }],
                handle: Arc::new(NoopHandle),
            })),
            _ => None,
        }
    }
}

async fn setup() -> Arc<RevisionOrchestrator> {
    // sqlite `:memory:` is per-connection; a pool of one keeps every
    // acquire() touching the same in-memory database for the test's life.
    let db = DatabaseConnection::with_max_connections("sqlite::memory:", 1)
        .await
        .unwrap();
    db.run_migrations().await.unwrap();
    let db = Arc::new(db);

    let registry = Arc::new(NodeRegistry::new());
    let templates: Arc<dyn TemplateRegistry> = Arc::new(TestTemplates);
    let queue = RevisionQueue::new(
        db.clone(),
        RetryPolicy {
            base: Duration::from_millis(1),
            factor: 1.0,
            max_attempts: 2,
            jitter: false,
        },
    );

    RevisionOrchestrator::with_wait_tuning(
        db,
        templates,
        registry,
        queue,
        Duration::from_millis(200),
        Duration::from_millis(10),
    )
}

fn wired_schema(instructions: &str) -> Schema {
    Schema::new(
        vec![
            Node {
                id: "trigger-1".to_string(),
                template: "trigger".to_string(),
                config: serde_json::json!({}),
            },
            Node {
                id: "agent-1".to_string(),
                template: "simple-agent".to_string(),
                config: serde_json::json!({ "instructions": instructions }),
            },
        ],
        vec![Edge {
            from: "trigger-1".to_string(),
            to: "agent-1".to_string(),
        }],
    )
}

async fn wait_for_terminal(
    orchestrator: &RevisionOrchestrator,
    graph_id: &str,
    revision_id: &str,
) -> engine::db::models::RevisionRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let revision = orchestrator.get_revision_by_id(graph_id, revision_id).await.unwrap();
        if revision.is_terminal() {
            return revision;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("revision {revision_id} did not reach a terminal state in time");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn live_apply_mutates_running_node_config() {
    let orchestrator = setup().await;
    let graph = orchestrator.create_graph("demo", "alice").await.unwrap();

    let (graph, initial) = orchestrator
        .submit_revision(&graph.id, &graph.version, wired_schema("A"), "alice")
        .await
        .unwrap();
    let initial = wait_for_terminal(&orchestrator, &graph.id, &initial.id).await;
    assert_eq!(initial.status().unwrap(), RevisionStatus::Applied);

    let graph = orchestrator.find_by_id(&graph.id).await.unwrap();
    orchestrator.run(&graph.id, "alice").await.unwrap();

    let (graph, revision) = orchestrator
        .submit_revision(&graph.id, &graph.version, wired_schema("B"), "alice")
        .await
        .unwrap();
    assert_eq!(revision.to_version, "1.0.2");

    let revision = wait_for_terminal(&orchestrator, &graph.id, &revision.id).await;
    assert_eq!(revision.status().unwrap(), RevisionStatus::Applied);

    let graph = orchestrator.find_by_id(&graph.id).await.unwrap();
    assert_eq!(graph.version, "1.0.2");
    let schema = graph.schema().unwrap();
    assert_eq!(schema.node("agent-1").unwrap().config["instructions"], "B");
}

#[tokio::test]
async fn sequential_queueing_applies_both_revisions_in_order() {
    let orchestrator = setup().await;
    let graph = orchestrator.create_graph("demo", "alice").await.unwrap();
    let (graph, first) = orchestrator
        .submit_revision(&graph.id, &graph.version, wired_schema("first"), "alice")
        .await
        .unwrap();
    let first = wait_for_terminal(&orchestrator, &graph.id, &first.id).await;
    assert_eq!(first.status().unwrap(), RevisionStatus::Applied);

    let graph = orchestrator.find_by_id(&graph.id).await.unwrap();
    assert_eq!(graph.version, "1.0.1");

    let (graph, second) = orchestrator
        .submit_revision(&graph.id, &graph.version, wired_schema("second"), "alice")
        .await
        .unwrap();
    let second = wait_for_terminal(&orchestrator, &graph.id, &second.id).await;
    assert_eq!(second.status().unwrap(), RevisionStatus::Applied);

    let graph = orchestrator.find_by_id(&graph.id).await.unwrap();
    assert_eq!(graph.version, "1.0.2");
    assert_eq!(graph.schema().unwrap().node("agent-1").unwrap().config["instructions"], "second");
}

#[tokio::test]
async fn concurrent_conflict_fails_the_second_submission() {
    let orchestrator = setup().await;
    let graph = orchestrator.create_graph("demo", "alice").await.unwrap();
    let base = wired_schema("base");
    let (graph, base_rev) = orchestrator
        .submit_revision(&graph.id, &graph.version, base, "alice")
        .await
        .unwrap();
    wait_for_terminal(&orchestrator, &graph.id, &base_rev.id).await;
    let graph = orchestrator.find_by_id(&graph.id).await.unwrap();

    let first_result = orchestrator
        .submit_revision(&graph.id, &graph.version, wired_schema("x"), "alice")
        .await;
    assert!(first_result.is_ok());

    let second_result = orchestrator
        .submit_revision(&graph.id, &graph.version, wired_schema("y"), "bob")
        .await;
    let err = second_result.unwrap_err();
    assert_eq!(err.code(), "MERGE_CONFLICT");
}

#[tokio::test]
async fn non_conflicting_merge_accepts_both_submissions() {
    let orchestrator = setup().await;
    let graph = orchestrator.create_graph("demo", "alice").await.unwrap();
    let base = wired_schema("base");
    let (graph, base_rev) = orchestrator
        .submit_revision(&graph.id, &graph.version, base, "alice")
        .await
        .unwrap();
    wait_for_terminal(&orchestrator, &graph.id, &base_rev.id).await;
    let graph = orchestrator.find_by_id(&graph.id).await.unwrap();

    let mut schema_a = wired_schema("base");
    schema_a.nodes[1].config["instructions"] = serde_json::json!("A");
    let (_graph, rev_a) = orchestrator
        .submit_revision(&graph.id, &graph.version, schema_a, "alice")
        .await
        .unwrap();

    let mut schema_b = wired_schema("base");
    schema_b.nodes[1].config["invoke_model_name"] = serde_json::json!("m");
    let (_graph, rev_b) = orchestrator
        .submit_revision(&graph.id, &graph.version, schema_b, "bob")
        .await
        .unwrap();

    let rev_a = wait_for_terminal(&orchestrator, &graph.id, &rev_a.id).await;
    let rev_b = wait_for_terminal(&orchestrator, &graph.id, &rev_b.id).await;
    assert_eq!(rev_a.status().unwrap(), RevisionStatus::Applied);
    assert_eq!(rev_b.status().unwrap(), RevisionStatus::Applied);

    let graph = orchestrator.find_by_id(&graph.id).await.unwrap();
    let schema = graph.schema().unwrap();
    let agent = schema.node("agent-1").unwrap();
    assert_eq!(agent.config["instructions"], "A");
    assert_eq!(agent.config["invoke_model_name"], "m");
}

#[tokio::test]
async fn stale_retry_fails_then_succeeds_with_current_version() {
    let orchestrator = setup().await;
    let graph = orchestrator.create_graph("demo", "alice").await.unwrap();
    let (graph, rev) = orchestrator
        .submit_revision(&graph.id, &graph.version, wired_schema("first"), "alice")
        .await
        .unwrap();
    wait_for_terminal(&orchestrator, &graph.id, &rev.id).await;

    // `graph.version` is now stale: a revision applied since this value
    // was captured.
    let stale_version = graph.version.clone();
    let err = orchestrator
        .submit_revision(&graph.id, &stale_version, wired_schema("second"), "alice")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VERSION_CONFLICT");

    let graph = orchestrator.find_by_id(&graph.id).await.unwrap();
    let (_graph, rev2) = orchestrator
        .submit_revision(&graph.id, &graph.version, wired_schema("second"), "alice")
        .await
        .unwrap();
    let rev2 = wait_for_terminal(&orchestrator, &graph.id, &rev2.id).await;
    assert_eq!(rev2.status().unwrap(), RevisionStatus::Applied);
}

#[tokio::test]
async fn required_edge_validation_rejects_submission_before_creating_a_revision() {
    let orchestrator = setup().await;
    let graph = orchestrator.create_graph("demo", "alice").await.unwrap();
    let (graph, rev) = orchestrator
        .submit_revision(&graph.id, &graph.version, wired_schema("first"), "alice")
        .await
        .unwrap();
    wait_for_terminal(&orchestrator, &graph.id, &rev.id).await;
    let graph = orchestrator.find_by_id(&graph.id).await.unwrap();

    let unwired = Schema::new(
        vec![
            Node {
                id: "trigger-1".to_string(),
                template: "trigger".to_string(),
                config: serde_json::json!({}),
            },
            Node {
                id: "agent-1".to_string(),
                template: "simple-agent".to_string(),
                config: serde_json::json!({ "instructions": "first" }),
            },
        ],
        vec![],
    );
    let err = orchestrator
        .submit_revision(&graph.id, &graph.version, unwired, "alice")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "MISSING_REQUIRED_CONNECTION");

    let revisions_before = orchestrator.get_revisions(&graph.id, None, None).await.unwrap();

    // A follow-up valid submission with the same (still-unchanged)
    // baseVersion succeeds.
    let (_graph, rev3) = orchestrator
        .submit_revision(&graph.id, &graph.version, wired_schema("second"), "alice")
        .await
        .unwrap();
    let rev3 = wait_for_terminal(&orchestrator, &graph.id, &rev3.id).await;
    assert_eq!(rev3.status().unwrap(), RevisionStatus::Applied);

    let revisions_after = orchestrator.get_revisions(&graph.id, None, None).await.unwrap();
    assert_eq!(revisions_after.len(), revisions_before.len() + 1);
}
