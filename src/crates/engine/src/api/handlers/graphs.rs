//! Graph CRUD and lifecycle endpoint handlers

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};

use crate::api::{
    error::{ApiError, ApiResult},
    middleware::extract_principal,
    models::{CreateGraphRequest, GraphListQuery, GraphResponse, UpdateGraphRequest, UpdateGraphResponse},
    response,
    routes::AppState,
};

/// Create a new graph.
///
/// POST /api/v1/graphs
pub async fn create_graph(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    axum::Json(req): axum::Json<CreateGraphRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    req.validate()?;
    let principal = extract_principal(&headers);

    let graph = app_state.orchestrator.create_graph(&req.name, &principal).await?;
    Ok((StatusCode::CREATED, axum::Json(GraphResponse::from_record(graph)?)))
}

/// List all graphs.
///
/// GET /api/v1/graphs
pub async fn list_graphs(
    State(app_state): State<AppState>,
    Query(query): Query<GraphListQuery>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let page = query.page.unwrap_or(0);
    let per_page = query.per_page.unwrap_or(20);
    crate::api::middleware::validate_pagination(page, per_page, 100)?;

    let graphs = app_state.orchestrator.get_all().await?;
    let filtered: Vec<_> = graphs
        .into_iter()
        .filter(|g| query.status.as_deref().map_or(true, |s| g.status == s))
        .collect();

    let total = filtered.len() as u32;
    let offset = (page as usize) * (per_page as usize);
    let page_items: Vec<_> = filtered.into_iter().skip(offset).take(per_page as usize).collect();

    let mut responses = Vec::with_capacity(page_items.len());
    for graph in page_items {
        responses.push(GraphResponse::from_record(graph)?);
    }
    Ok(response::paginated(responses, page, per_page, total))
}

/// Get a single graph by id.
///
/// GET /api/v1/graphs/:id
pub async fn get_graph(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let graph = app_state.orchestrator.find_by_id(&id).await?;
    Ok(response::ok(GraphResponse::from_record(graph)?))
}

/// Update a graph: metadata-only, or schema-carrying via `submitRevision`.
///
/// PATCH /api/v1/graphs/:id
pub async fn update_graph(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    axum::Json(req): axum::Json<UpdateGraphRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let principal = extract_principal(&headers);

    if let Some(schema) = req.schema {
        let (graph, revision) = app_state
            .orchestrator
            .submit_revision(&id, &req.current_version, schema, &principal)
            .await?;
        return Ok(response::ok(UpdateGraphResponse {
            graph: GraphResponse::from_record(graph)?,
            revision: Some(crate::api::models::RevisionResponse::from_record(revision)?),
        }));
    }

    if req.name.is_none() && req.description.is_none() {
        return Err(ApiError::BadRequest("no fields to update".to_string()));
    }

    let graph = app_state
        .orchestrator
        .update_metadata(&id, &req.current_version, req.name, req.description)
        .await?;
    Ok(response::ok(UpdateGraphResponse {
        graph: GraphResponse::from_record(graph)?,
        revision: None,
    }))
}

/// Delete a graph, tearing down any running instance first.
///
/// DELETE /api/v1/graphs/:id
pub async fn delete_graph(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl axum::response::IntoResponse> {
    let principal = extract_principal(&headers);
    app_state.orchestrator.delete(&id, &principal).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Compile the persisted schema and run the graph live.
///
/// POST /api/v1/graphs/:id/run
pub async fn run_graph(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl axum::response::IntoResponse> {
    let principal = extract_principal(&headers);
    let graph = app_state.orchestrator.run(&id, &principal).await?;
    Ok(response::ok(GraphResponse::from_record(graph)?))
}

/// Tear down the live instance and mark the graph stopped.
///
/// POST /api/v1/graphs/:id/destroy
pub async fn destroy_graph(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl axum::response::IntoResponse> {
    let principal = extract_principal(&headers);
    let graph = app_state.orchestrator.destroy(&id, &principal).await?;
    Ok(response::ok(GraphResponse::from_record(graph)?))
}
