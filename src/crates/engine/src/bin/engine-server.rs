//! Engine server binary
//!
//! Standalone REST server exposing the live graph revision engine: graph
//! CRUD/lifecycle and revision submission over HTTP, backed by sqlite.

use std::sync::Arc;

use engine::api::routes::create_router;
use engine::config::EngineConfig;
use engine::db::DatabaseConnection;
use engine::execution::NodeRegistry;
use engine::node::{Template, TemplateRegistry};
use engine::queue::RevisionQueue;
use engine::services::RevisionOrchestrator;

/// The engine ships no concrete node templates — they're an external
/// collaborator per spec §1 — so the reference server runs with an empty
/// catalog. An embedding application wires its own `TemplateRegistry`
/// implementation in here instead.
struct EmptyTemplateRegistry;

impl TemplateRegistry for EmptyTemplateRegistry {
    fn lookup(&self, _template_id: &str) -> Option<Arc<Template>> {
        None
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    tracing::info!("loading engine configuration");
    let config = EngineConfig::load()?;

    let database_url = config.database_url();
    tracing::info!(database_url, "connecting to database");
    let db = DatabaseConnection::with_max_connections(&database_url, config.database.max_connections).await?;
    db.run_migrations().await?;
    db.health_check().await?;

    let db = Arc::new(db);
    let registry = Arc::new(NodeRegistry::new());
    let templates: Arc<dyn TemplateRegistry> = Arc::new(EmptyTemplateRegistry);
    let queue = RevisionQueue::new(db.clone(), config.queue.to_retry_policy());

    let compiling_wait_limit = std::time::Duration::from_secs(config.live_update.compiling_wait_limit_secs);
    let compiling_poll_interval = std::time::Duration::from_secs(config.live_update.compiling_poll_interval_secs);
    let orchestrator = RevisionOrchestrator::with_wait_tuning(
        db.clone(),
        templates,
        registry.clone(),
        queue.clone(),
        compiling_wait_limit,
        compiling_poll_interval,
    );

    tracing::info!("recovering unfinished revision jobs");
    queue.recover().await?;

    let app = create_router(db, registry, orchestrator);

    let addr: std::net::SocketAddr = config.server.bind_address.parse()?;
    tracing::info!(%addr, "starting engine server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
