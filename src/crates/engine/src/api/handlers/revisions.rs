//! Revision submission and lookup endpoint handlers

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};

use crate::api::{
    error::ApiResult,
    middleware::extract_principal,
    models::{RevisionListQuery, RevisionResponse, SubmitRevisionRequest},
    response,
    routes::AppState,
};

/// Submit a revision: `submitRevision(graphId, baseVersion, clientSchema,
/// principal)` (spec §4.11.1).
///
/// POST /api/v1/graphs/:id/revisions
pub async fn submit_revision(
    State(app_state): State<AppState>,
    Path(graph_id): Path<String>,
    headers: HeaderMap,
    axum::Json(req): axum::Json<SubmitRevisionRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let principal = extract_principal(&headers);
    let (_graph, revision) = app_state
        .orchestrator
        .submit_revision(&graph_id, &req.base_version, req.client_schema, &principal)
        .await?;
    Ok((StatusCode::CREATED, axum::Json(RevisionResponse::from_record(revision)?)))
}

/// List a graph's revisions, optionally filtered by status.
///
/// GET /api/v1/graphs/:id/revisions
pub async fn list_revisions(
    State(app_state): State<AppState>,
    Path(graph_id): Path<String>,
    Query(query): Query<RevisionListQuery>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let revisions = app_state
        .orchestrator
        .get_revisions(&graph_id, query.status.as_deref(), query.limit)
        .await?;
    let mut responses = Vec::with_capacity(revisions.len());
    for revision in revisions {
        responses.push(RevisionResponse::from_record(revision)?);
    }
    Ok(response::ok(responses))
}

/// Get a single revision by id.
///
/// GET /api/v1/graphs/:id/revisions/:revision_id
pub async fn get_revision(
    State(app_state): State<AppState>,
    Path((graph_id, revision_id)): Path<(String, String)>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let revision = app_state.orchestrator.get_revision_by_id(&graph_id, &revision_id).await?;
    Ok(response::ok(RevisionResponse::from_record(revision)?))
}
