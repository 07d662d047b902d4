//! API route definitions
//!
//! Defines all API routes and their associated handler functions.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::api::{handlers, middleware};
use crate::db::DatabaseConnection;
use crate::execution::NodeRegistry;
use crate::services::RevisionOrchestrator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub registry: Arc<NodeRegistry>,
    pub orchestrator: Arc<RevisionOrchestrator>,
}

/// Build the complete API router
pub fn create_router(
    db: Arc<DatabaseConnection>,
    registry: Arc<NodeRegistry>,
    orchestrator: Arc<RevisionOrchestrator>,
) -> Router {
    let app_state = AppState {
        db,
        registry,
        orchestrator,
    };

    Router::new()
        // Health check endpoints
        .route("/health", get(handlers::health))
        .route("/api/v1/system/health", get(handlers::health_detailed))
        // Graph endpoints
        .route(
            "/api/v1/graphs",
            post(handlers::create_graph).get(handlers::list_graphs),
        )
        .route(
            "/api/v1/graphs/:id",
            get(handlers::get_graph)
                .patch(handlers::update_graph)
                .delete(handlers::delete_graph),
        )
        .route("/api/v1/graphs/:id/run", post(handlers::run_graph))
        .route("/api/v1/graphs/:id/destroy", post(handlers::destroy_graph))
        // Revision endpoints
        .route(
            "/api/v1/graphs/:id/revisions",
            post(handlers::submit_revision).get(handlers::list_revisions),
        )
        .route(
            "/api/v1/graphs/:id/revisions/:revision_id",
            get(handlers::get_revision),
        )
        .with_state(app_state)
        .layer(middleware::logging_layer())
        .layer(middleware::cors_layer())
}
