//! Run lifecycle endpoints.
//!
//! - `POST /api/projects/:project_id/files/:file_id/runs`: queue a run
//! - `POST /api/projects/:project_id/files/:file_id/cancel`: cancel active runs

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::{parse_id, ApiError};
use crate::api::types::ApiContext;
use crate::pipeline::service;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRunBody {
    pub triggered_by: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRunResponse {
    pub run_id: Uuid,
}

/// Insert a pending run and hand it to the scheduler.
pub async fn create(
    State(ctx): State<ApiContext>,
    Path((project_id, file_id)): Path<(String, String)>,
    body: Option<Json<CreateRunBody>>,
) -> Result<(StatusCode, Json<CreateRunResponse>), ApiError> {
    let project_id = parse_id("project", &project_id)?;
    let file_id = parse_id("file", &file_id)?;
    let body = body.map(|Json(body)| body).unwrap_or_default();

    let run_id = ctx
        .db
        .with_conn(|conn| {
            service::create_run(
                conn,
                &project_id,
                &file_id,
                body.triggered_by.as_deref(),
                &ctx.run_defaults,
            )
        })?
        .ok_or_else(|| ApiError::NotFound("File not found in project".into()))?;

    ctx.scheduler.enqueue(run_id);
    Ok((StatusCode::CREATED, Json(CreateRunResponse { run_id })))
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub cancelled: Vec<Uuid>,
}

/// Cancel pending and running runs of a file, typically ahead of its removal.
pub async fn cancel(
    State(ctx): State<ApiContext>,
    Path((project_id, file_id)): Path<(String, String)>,
) -> Result<Json<CancelResponse>, ApiError> {
    let project_id = parse_id("project", &project_id)?;
    let file_id = parse_id("file", &file_id)?;

    let cancelled = ctx
        .db
        .with_conn(|conn| service::cancel_runs_for_file(conn, &project_id, &file_id))?
        .ok_or_else(|| ApiError::NotFound("File not found in project".into()))?;

    Ok(Json(CancelResponse { cancelled }))
}
