//! Processing read models for a project.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::{parse_id, ApiError};
use crate::api::types::ApiContext;
use crate::pipeline::aggregate::{aggregate_results_by_folder, AggregatedFolderNode};
use crate::pipeline::progress::{progress_for_project, ProgressSnapshot};
use crate::pipeline::service::{self, RunDetail, RunListing};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
}

/// `GET /api/projects/:project_id/processing`
pub async fn list(
    State(ctx): State<ApiContext>,
    Path(project_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<RunListing>, ApiError> {
    let project_id = parse_id("project", &project_id)?;
    let listing = ctx
        .db
        .with_conn(|conn| service::list_runs_for_project(conn, &project_id, query.limit))?;
    Ok(Json(listing))
}

/// `GET /api/projects/:project_id/processing/progress`
pub async fn progress(
    State(ctx): State<ApiContext>,
    Path(project_id): Path<String>,
) -> Result<Json<ProgressSnapshot>, ApiError> {
    let project_id = parse_id("project", &project_id)?;
    let snapshot = ctx
        .db
        .with_conn(|conn| progress_for_project(conn, &project_id))?;
    Ok(Json(snapshot))
}

#[derive(Serialize)]
pub struct AggregateResponse {
    pub nodes: Vec<AggregatedFolderNode>,
}

/// `GET /api/projects/:project_id/processing/aggregate`
pub async fn aggregate(
    State(ctx): State<ApiContext>,
    Path(project_id): Path<String>,
) -> Result<Json<AggregateResponse>, ApiError> {
    let project_id = parse_id("project", &project_id)?;
    let nodes = ctx
        .db
        .with_conn(|conn| aggregate_results_by_folder(conn, &project_id))?;
    Ok(Json(AggregateResponse { nodes }))
}

/// `GET /api/projects/:project_id/processing/runs/:run_id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Path((project_id, run_id)): Path<(String, String)>,
) -> Result<Json<RunDetail>, ApiError> {
    let project_id = parse_id("project", &project_id)?;
    let run_id = parse_id("run", &run_id)?;
    ctx.db
        .with_conn(|conn| service::get_run_detail(conn, &project_id, &run_id))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Processing run not found".into()))
}
