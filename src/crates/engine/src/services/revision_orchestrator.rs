//! `RevisionOrchestrator`: the component-level control surface over graphs
//! and revisions. `submit_revision`/`apply` implement §4.11.1/§4.11.2
//! directly; `create_graph`/`run`/`destroy`/`delete`/`update_graph` round
//! out the external control surface (§6) on top of the same repositories.
//!
//! Grounded on the teacher's `services/workflow.rs` service-struct-over-
//! repositories shape, but not exposed over `tonic`/gRPC like the teacher's
//! `WorkflowService` — the control surface here is transport-agnostic, so
//! it's a plain async struct the REST handlers call directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqliteConnection;

use crate::db::models::{GraphRecord, RevisionRecord};
use crate::db::{DatabaseConnection, GraphRepository, RevisionRepository};
use crate::error::{EngineError, ErrorKind, Result};
use crate::execution::{GraphCompiler, LiveUpdateExecutor, LiveUpdatePlanner, NodeRegistry};
use crate::merge::{MergeOutcome, ThreeWayMerger};
use crate::node::TemplateRegistry;
use crate::queue::{Job, RevisionProcessor, RevisionQueue};
use crate::schema::{Schema, SchemaValidator, TemplateDescriptor};
use crate::status::{GraphStatus, RevisionStatus};
use crate::version::VersionArbiter;

/// Default wait tuning for step 4 of §4.11.2, used when the caller doesn't
/// override it via `EngineConfig::live_update`.
const DEFAULT_COMPILING_WAIT_LIMIT: Duration = Duration::from_secs(180);
const DEFAULT_COMPILING_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct RevisionOrchestrator {
    db: Arc<DatabaseConnection>,
    graphs: GraphRepository,
    revisions: RevisionRepository,
    templates: Arc<dyn TemplateRegistry>,
    registry: Arc<NodeRegistry>,
    queue: Arc<RevisionQueue>,
    arbiter: VersionArbiter,
    compiling_wait_limit: Duration,
    compiling_poll_interval: Duration,
}

impl RevisionOrchestrator {
    /// Builds the orchestrator and registers it as the queue's processor in
    /// one step, so callers never forget to wire the two together. This
    /// creates an intentional `Arc` cycle (orchestrator -> queue ->
    /// orchestrator) that lives for the process's lifetime, the same as any
    /// other pair of singleton services that reference each other.
    pub fn new(
        db: Arc<DatabaseConnection>,
        templates: Arc<dyn TemplateRegistry>,
        registry: Arc<NodeRegistry>,
        queue: Arc<RevisionQueue>,
    ) -> Arc<Self> {
        Self::with_wait_tuning(
            db,
            templates,
            registry,
            queue,
            DEFAULT_COMPILING_WAIT_LIMIT,
            DEFAULT_COMPILING_POLL_INTERVAL,
        )
    }

    pub fn with_wait_tuning(
        db: Arc<DatabaseConnection>,
        templates: Arc<dyn TemplateRegistry>,
        registry: Arc<NodeRegistry>,
        queue: Arc<RevisionQueue>,
        compiling_wait_limit: Duration,
        compiling_poll_interval: Duration,
    ) -> Arc<Self> {
        let orchestrator = Arc::new(Self {
            graphs: GraphRepository::new(db.clone()),
            revisions: RevisionRepository::new(db.clone()),
            db,
            templates,
            registry,
            queue: queue.clone(),
            arbiter: VersionArbiter::new(),
            compiling_wait_limit,
            compiling_poll_interval,
        });
        queue.set_processor(orchestrator.clone());
        orchestrator
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        self.graphs.acquire().await
    }

    /// Build a `SchemaValidator` covering every template referenced across
    /// `schemas`, so merge/validate calls see base, head, and client nodes
    /// uniformly. Templates that don't resolve are simply absent from the
    /// catalog — `SchemaValidator::check_templates` surfaces that as
    /// `INVALID_TEMPLATE` on its own.
    fn validator_for(&self, schemas: &[&Schema]) -> SchemaValidator {
        let mut descriptors: HashMap<String, TemplateDescriptor> = HashMap::new();
        for schema in schemas {
            for node in &schema.nodes {
                if descriptors.contains_key(&node.template) {
                    continue;
                }
                if let Some(template) = self.templates.lookup(&node.template) {
                    descriptors.insert(
                        node.template.clone(),
                        TemplateDescriptor {
                            kind: template.kind.to_string(),
                            config_schema: template.config_schema.clone(),
                            required: template.required.clone(),
                        },
                    );
                }
            }
        }
        SchemaValidator::new(descriptors)
    }

    async fn resolve_schema_at_version(&self, graph: &GraphRecord, version: &str) -> Result<Schema> {
        if graph.version == version {
            return graph.schema();
        }
        match self.revisions.find_by_graph_and_version(&graph.id, version).await? {
            Some(rev) => rev.new_schema(),
            None => Err(EngineError::VersionNotFound(version.to_string())),
        }
    }

    // ---- submitRevision (§4.11.1) ----------------------------------------

    pub async fn submit_revision(
        &self,
        graph_id: &str,
        base_version: &str,
        client_schema: Schema,
        principal: &str,
    ) -> Result<(GraphRecord, RevisionRecord)> {
        let mut conn = self.acquire().await?;
        let result = self
            .submit_locked(&mut conn, graph_id, base_version, &client_schema, principal)
            .await;
        match &result {
            Ok(_) => self.graphs.commit(&mut conn).await?,
            Err(_) => {
                let _ = self.graphs.rollback(&mut conn).await;
            }
        }
        let (graph, revision) = result?;

        self.queue
            .enqueue(Job {
                graph_id: graph.id.clone(),
                revision_id: revision.id.clone(),
            })
            .await;

        Ok((graph, revision))
    }

    async fn submit_locked(
        &self,
        conn: &mut SqliteConnection,
        graph_id: &str,
        base_version: &str,
        client_schema: &Schema,
        principal: &str,
    ) -> Result<(GraphRecord, RevisionRecord)> {
        // Step 2: the row lock taken here is the linearization point across
        // submitters for this graph. Ownership enforcement is a no-op:
        // authentication/identity are out of scope (the engine consumes an
        // opaque principal id) and isn't checked here, only recorded.
        let mut graph = self.graphs.get_for_update(conn, graph_id).await?;

        // Step 3.
        if graph.version != base_version {
            return Err(EngineError::version_conflict(graph.version.clone(), base_version.to_string()));
        }

        // Step 4.
        self.validator_for(&[client_schema]).validate(client_schema)?;

        // Step 5.
        let head_schema = if graph.target_version == graph.version {
            graph.schema()?
        } else {
            match self
                .revisions
                .find_by_graph_and_version(graph_id, &graph.target_version)
                .await?
            {
                Some(rev) => rev.new_schema()?,
                None => {
                    tracing::warn!(
                        graph_id,
                        target_version = %graph.target_version,
                        "no revision found at targetVersion, falling back to graph.schema"
                    );
                    graph.schema()?
                }
            }
        };

        // Step 6.
        let base_schema = if base_version == graph.version {
            graph.schema()?
        } else {
            match self.revisions.find_by_graph_and_version(graph_id, base_version).await? {
                Some(rev) => rev.new_schema()?,
                None => return Err(EngineError::VersionNotFound(base_version.to_string())),
            }
        };

        // Step 7: `ThreeWayMerger::merge` also re-validates the merged
        // result and folds a validation failure into `MergeOutcome::Conflict`.
        let validator = self.validator_for(&[&base_schema, &head_schema, client_schema]);
        let merged = match ThreeWayMerger::new(&validator).merge(&base_schema, &head_schema, client_schema) {
            MergeOutcome::Success { merged } => merged,
            MergeOutcome::Conflict { conflicts } => return Err(EngineError::merge_conflict(conflicts)),
        };

        // Step 8.
        let diff = json_patch::diff(&head_schema.to_json(), &merged.to_json());
        if diff.0.is_empty() {
            return Err(EngineError::RevisionWithoutChanges);
        }

        // Step 9.
        let current_version = graph.version()?;
        let target_version = graph.target_version()?;
        let max_version = match self.arbiter.compare(&current_version, &target_version) {
            std::cmp::Ordering::Greater => current_version,
            _ => target_version,
        };
        let to_version = self.arbiter.next(&max_version);

        // Step 10.
        let revision = RevisionRecord::new(
            uuid::Uuid::new_v4().to_string(),
            graph_id.to_string(),
            &self.arbiter.parse(base_version),
            &to_version,
            client_schema,
            &merged,
            &diff,
            principal.to_string(),
        )?;
        self.revisions.create(conn, &revision).await?;

        graph.target_version = to_version.to_string();
        graph.touch();
        self.graphs.update(conn, &graph).await?;

        Ok((graph, revision))
    }

    // ---- applyRevision (§4.11.2) ------------------------------------------

    async fn apply_locked(
        &self,
        conn: &mut SqliteConnection,
        graph_id: &str,
        revision: &mut RevisionRecord,
    ) -> Result<()> {
        let mut graph = self.graphs.get_for_update(conn, graph_id).await?;

        // Step 3: re-merge only if a sibling revision applied (or failed)
        // ahead of this one and moved `graph.version` since this revision
        // computed its `baseVersion`.
        let mut new_schema = revision.new_schema()?;
        if graph.version != revision.base_version {
            let base_schema = self.resolve_schema_at_version(&graph, &revision.base_version).await?;
            let head_schema = graph.schema()?;
            let client_schema = revision.client_schema()?;
            let validator = self.validator_for(&[&base_schema, &head_schema, &client_schema]);
            new_schema = match ThreeWayMerger::new(&validator).merge(&base_schema, &head_schema, &client_schema) {
                MergeOutcome::Success { merged } => merged,
                MergeOutcome::Conflict { conflicts } => return Err(EngineError::merge_conflict(conflicts)),
            };
        }

        // Step 4. Holds the row lock for the duration of the wait, same as
        // the rest of this transaction's critical section.
        self.wait_for_compiling(graph_id).await;

        // Step 5.
        if matches!(graph.status()?, GraphStatus::Running) {
            if let Some(cg_lock) = self.registry.get(graph_id) {
                let plan = {
                    let cg = cg_lock.read();
                    LiveUpdatePlanner::new().plan(&cg, &new_schema)?
                };
                if !plan.is_empty() {
                    // Per-graph apply is already serialized by the queue, so
                    // no other task contends for this graph's write lock
                    // while the executor awaits handle operations.
                    let executor = LiveUpdateExecutor::new(self.templates.as_ref(), revision.created_by.clone());
                    let mut cg = cg_lock.write();
                    executor.execute(graph_id, &mut cg, &new_schema, &plan).await?;
                }
            }
        }

        // Step 6.
        let to_version = revision.to_version()?;
        graph.set_schema(&new_schema);
        graph.version = to_version.to_string();
        graph.touch();
        self.graphs.update(conn, &graph).await?;

        revision.new_schema_json = serde_json::to_string(&new_schema.to_json())?;
        revision.set_status(RevisionStatus::Applied);
        self.revisions.update(conn, revision).await?;

        Ok(())
    }

    async fn wait_for_compiling(&self, graph_id: &str) {
        let deadline = tokio::time::Instant::now() + self.compiling_wait_limit;
        while self.registry.get_status(graph_id) == Some(GraphStatus::Compiling) {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(graph_id, "graph still compiling after wait limit, proceeding anyway");
                break;
            }
            tokio::time::sleep(self.compiling_poll_interval).await;
        }
    }

    // ---- graph CRUD / lifecycle (§6) --------------------------------------

    pub async fn create_graph(&self, name: &str, created_by: &str) -> Result<GraphRecord> {
        let graph = GraphRecord::new(uuid::Uuid::new_v4().to_string(), name, created_by);
        self.graphs.create(&graph).await?;
        Ok(graph)
    }

    pub async fn find_by_id(&self, graph_id: &str) -> Result<GraphRecord> {
        self.graphs.find_by_id(graph_id).await
    }

    pub async fn get_all(&self) -> Result<Vec<GraphRecord>> {
        self.graphs.find_all().await
    }

    pub async fn get_revisions(
        &self,
        graph_id: &str,
        status: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<RevisionRecord>> {
        self.revisions.list_for_graph(graph_id, status, limit).await
    }

    pub async fn get_revision_by_id(&self, graph_id: &str, revision_id: &str) -> Result<RevisionRecord> {
        self.revisions.find_by_id(graph_id, revision_id).await
    }

    /// Compile the persisted schema and register it as the running
    /// `CompiledGraph`.
    pub async fn run(&self, graph_id: &str, principal: &str) -> Result<GraphRecord> {
        let mut conn = self.acquire().await?;
        let result = self.run_locked(&mut conn, graph_id, principal).await;
        match &result {
            Ok(_) => self.graphs.commit(&mut conn).await?,
            Err(_) => {
                let _ = self.graphs.rollback(&mut conn).await;
            }
        }
        result
    }

    async fn run_locked(&self, conn: &mut SqliteConnection, graph_id: &str, principal: &str) -> Result<GraphRecord> {
        let mut graph = self.graphs.get_for_update(conn, graph_id).await?;
        if matches!(graph.status()?, GraphStatus::Running) {
            return Err(EngineError::GraphAlreadyRunning(graph_id.to_string()));
        }

        let schema = graph.schema()?;
        let compiler = GraphCompiler::new(self.templates.as_ref(), principal);
        compiler.validate_schema(&schema, &self.validator_for(&[&schema]))?;
        let compiled = compiler.compile(graph_id, &schema).await?;
        let status = compiled.status;
        self.registry.register(graph_id, compiled);

        graph.set_status(status);
        graph.touch();
        self.graphs.update(conn, &graph).await?;
        Ok(graph)
    }

    /// Tear down the running `CompiledGraph` and mark the graph `Stopped`.
    pub async fn destroy(&self, graph_id: &str, principal: &str) -> Result<GraphRecord> {
        let mut conn = self.acquire().await?;
        let result = self.destroy_locked(&mut conn, graph_id, principal).await;
        match &result {
            Ok(_) => self.graphs.commit(&mut conn).await?,
            Err(_) => {
                let _ = self.graphs.rollback(&mut conn).await;
            }
        }
        result
    }

    async fn destroy_locked(
        &self,
        conn: &mut SqliteConnection,
        graph_id: &str,
        principal: &str,
    ) -> Result<GraphRecord> {
        let mut graph = self.graphs.get_for_update(conn, graph_id).await?;
        if !matches!(graph.status()?, GraphStatus::Running) {
            return Err(EngineError::GraphNotRunning(graph_id.to_string()));
        }

        let schema = graph.schema()?;
        let compiler = GraphCompiler::new(self.templates.as_ref(), principal);
        let order = compiler.get_build_order(&schema)?;
        self.registry.destroy(graph_id, &order).await?;

        graph.set_status(GraphStatus::Stopped);
        graph.touch();
        self.graphs.update(conn, &graph).await?;
        Ok(graph)
    }

    /// Delete a graph row outright, tearing down any running instance
    /// first.
    pub async fn delete(&self, graph_id: &str, principal: &str) -> Result<()> {
        if self.registry.contains(graph_id) {
            let graph = self.graphs.find_by_id(graph_id).await?;
            let schema = graph.schema()?;
            let compiler = GraphCompiler::new(self.templates.as_ref(), principal);
            let order = compiler.get_build_order(&schema)?;
            self.registry.destroy(graph_id, &order).await?;
        }
        self.graphs.delete(graph_id).await
    }

    /// Metadata-only update. Schema changes go through `submit_revision`
    /// instead, returning a `Pending` revision rather than mutating the
    /// graph directly.
    pub async fn update_metadata(
        &self,
        graph_id: &str,
        current_version: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<GraphRecord> {
        let mut conn = self.acquire().await?;
        let result = self
            .update_metadata_locked(&mut conn, graph_id, current_version, name, description)
            .await;
        match &result {
            Ok(_) => self.graphs.commit(&mut conn).await?,
            Err(_) => {
                let _ = self.graphs.rollback(&mut conn).await;
            }
        }
        result
    }

    async fn update_metadata_locked(
        &self,
        conn: &mut SqliteConnection,
        graph_id: &str,
        current_version: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<GraphRecord> {
        let mut graph = self.graphs.get_for_update(conn, graph_id).await?;
        if graph.version != current_version {
            return Err(EngineError::version_conflict(graph.version.clone(), current_version.to_string()));
        }
        if let Some(name) = name {
            graph.name = name;
        }
        if let Some(description) = description {
            graph.description = Some(description);
        }
        graph.touch();
        self.graphs.update(conn, &graph).await?;
        Ok(graph)
    }
}

#[async_trait]
impl RevisionProcessor for RevisionOrchestrator {
    async fn apply(&self, graph_id: &str, revision_id: &str) -> Result<()> {
        let mut revision = self.revisions.find_by_id(graph_id, revision_id).await?;
        if revision.is_terminal() {
            return Ok(());
        }

        revision.set_status(RevisionStatus::Applying);
        {
            let mut conn = self.acquire().await?;
            self.revisions.update(&mut conn, &revision).await?;
        }

        let mut conn = self.acquire().await?;
        let result = self.apply_locked(&mut conn, graph_id, &mut revision).await;
        match &result {
            Ok(()) => self.graphs.commit(&mut conn).await,
            Err(_) => {
                let _ = self.graphs.rollback(&mut conn).await;
                Ok(())
            }
        }?;
        result
    }

    /// Runs in its own transaction, independent of `apply`'s, so the
    /// failure record commits even when the apply transaction rolled back.
    async fn mark_failed(&self, graph_id: &str, revision_id: &str, error: &EngineError) {
        let mut conn = match self.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(graph_id, revision_id, error = %e, "failed to acquire connection for mark_failed");
                return;
            }
        };

        let mut revision = match self.revisions.find_by_id(graph_id, revision_id).await {
            Ok(r) => r,
            Err(_) => return,
        };
        if revision.is_terminal() {
            return;
        }
        revision.fail(error.to_string());

        match self.graphs.get_for_update(&mut conn, graph_id).await {
            Ok(mut graph) => {
                if graph.target_version == revision.to_version {
                    graph.target_version = self.reset_target_version(&mut conn, &graph, revision_id).await;
                }
                if error.kind() == ErrorKind::FatalLiveUpdate {
                    graph.set_status(GraphStatus::Error);
                    graph.error = Some(error.to_string());
                }
                graph.touch();
                if let Err(e) = self.graphs.update(&mut conn, &graph).await {
                    tracing::error!(graph_id, error = %e, "failed to persist reset targetVersion");
                }
                if let Err(e) = self.revisions.update(&mut conn, &revision).await {
                    tracing::error!(graph_id, revision_id, error = %e, "failed to persist Failed revision");
                }
                let _ = self.graphs.commit(&mut conn).await;
            }
            Err(_) => {
                // Deletion race (§5): the graph row is gone. The
                // transaction `get_for_update` opened already rolled back
                // on the miss; still record the revision as Failed.
                let _ = self.revisions.update(&mut conn, &revision).await;
            }
        }
    }
}

impl RevisionOrchestrator {
    /// `targetVersion` resets to the highest `toVersion` among any other
    /// still-`Pending` revision for the graph, or to `version` if none
    /// remain (Open Question 1).
    async fn reset_target_version(&self, conn: &mut SqliteConnection, graph: &GraphRecord, revision_id: &str) -> String {
        match self.revisions.pending_for_graph(conn, &graph.id, revision_id).await {
            Ok(pending) => {
                let mut max_version = self.arbiter.parse(&graph.version);
                for rev in &pending {
                    if let Ok(v) = rev.to_version() {
                        if self.arbiter.compare(&v, &max_version) == std::cmp::Ordering::Greater {
                            max_version = v;
                        }
                    }
                }
                max_version.to_string()
            }
            Err(_) => graph.version.clone(),
        }
    }
}
