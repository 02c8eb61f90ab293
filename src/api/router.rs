//! HTTP router. Every route lives under `/api/`.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::endpoints;
use crate::api::types::ApiContext;

/// Build the API router over a shared context.
///
/// NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
pub fn build_router(ctx: ApiContext) -> Router {
    let api = Router::new()
        .route("/health", get(endpoints::health::check))
        .route(
            "/projects/:project_id/files/:file_id/runs",
            post(endpoints::runs::create),
        )
        .route(
            "/projects/:project_id/files/:file_id/cancel",
            post(endpoints::runs::cancel),
        )
        .route(
            "/projects/:project_id/processing",
            get(endpoints::processing::list),
        )
        .route(
            "/projects/:project_id/processing/progress",
            get(endpoints::processing::progress),
        )
        .route(
            "/projects/:project_id/processing/aggregate",
            get(endpoints::processing::aggregate),
        )
        .route(
            "/projects/:project_id/processing/runs/:run_id",
            get(endpoints::processing::detail),
        )
        .with_state(ctx);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::db::test_fixtures::*;
    use crate::db::{Database, DatabaseError};
    use crate::models::{Project, ProjectFile, RunStatus};
    use crate::pipeline::executor::RunError;
    use crate::pipeline::scheduler::{RunProcessor, Scheduler, SchedulerConfig};
    use crate::pipeline::service::RunDefaults;

    struct Idle;

    impl RunProcessor for Idle {
        fn process(&self, _run_id: &Uuid) -> Result<(), RunError> {
            Ok(())
        }
    }

    struct TestApp {
        ctx: ApiContext,
        project: Project,
        file: ProjectFile,
    }

    fn test_app() -> TestApp {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (project, file) = db
            .with_conn(|conn| Ok::<_, DatabaseError>(seed_project_with_file(conn, "inbox/scan.pdf")))
            .unwrap();
        let scheduler = Arc::new(Scheduler::start(SchedulerConfig::default(), Arc::new(Idle)));
        let ctx = ApiContext::new(
            db,
            scheduler,
            RunDefaults {
                model: "test/model".into(),
                temperature: 0.2,
            },
        );
        TestApp { ctx, project, file }
    }

    async fn send(ctx: &ApiContext, method: &str, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = build_router(ctx.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_scheduler() {
        let app = test_app();
        let (status, json) = send(&app.ctx, "GET", "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert!(json["scheduler"]["queued"].is_number());
    }

    #[tokio::test]
    async fn create_run_then_fetch_detail() {
        let app = test_app();
        let uri = format!("/api/projects/{}/files/{}/runs", app.project.id, app.file.id);
        let (status, json) = send(&app.ctx, "POST", &uri).await;
        assert_eq!(status, StatusCode::CREATED);
        let run_id = json["runId"].as_str().unwrap().to_string();

        let uri = format!("/api/projects/{}/processing/runs/{run_id}", app.project.id);
        let (status, json) = send(&app.ctx, "GET", &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["run"]["id"], run_id);
        assert_eq!(json["file"]["originalName"], "inbox/scan.pdf");
        assert_eq!(json["events"][0]["message"], "Processing run queued");
    }

    #[tokio::test]
    async fn create_run_for_unknown_file_is_404() {
        let app = test_app();
        let uri = format!("/api/projects/{}/files/{}/runs", app.project.id, Uuid::new_v4());
        let (status, json) = send(&app.ctx, "POST", &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn malformed_ids_are_400() {
        let app = test_app();
        let (status, json) = send(&app.ctx, "GET", "/api/projects/nope/processing").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn unknown_run_is_404() {
        let app = test_app();
        let uri = format!("/api/projects/{}/processing/runs/{}", app.project.id, Uuid::new_v4());
        let (status, _) = send(&app.ctx, "GET", &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listing_progress_and_aggregate() {
        let app = test_app();
        app.ctx
            .db
            .with_conn(|conn| {
                seed_finished_run(
                    conn,
                    &app.project,
                    &app.file,
                    RunStatus::Succeeded,
                    Some(serde_json::json!([{"page": 1}, {"page": 2}])),
                );
                Ok(())
            })
            .unwrap();

        let base = format!("/api/projects/{}/processing", app.project.id);
        let (status, json) = send(&app.ctx, "GET", &format!("{base}?limit=5")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["runs"].as_array().unwrap().len(), 1);
        assert_eq!(json["summary"]["active"], 0);

        let (_, json) = send(&app.ctx, "GET", &format!("{base}/progress")).await;
        assert_eq!(json["totalFiles"], 1);
        assert_eq!(json["completedFiles"], 1);

        let (_, json) = send(&app.ctx, "GET", &format!("{base}/aggregate")).await;
        let inbox = &json["nodes"][0];
        assert_eq!(inbox["name"], "inbox");
        assert_eq!(inbox["type"], "folder");
        assert_eq!(inbox["recordCount"], 2);
    }

    #[tokio::test]
    async fn cancel_marks_active_runs() {
        let app = test_app();
        let create = format!("/api/projects/{}/files/{}/runs", app.project.id, app.file.id);
        let (_, created) = send(&app.ctx, "POST", &create).await;

        let cancel = format!("/api/projects/{}/files/{}/cancel", app.project.id, app.file.id);
        let (status, json) = send(&app.ctx, "POST", &cancel).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["cancelled"][0], created["runId"]);

        let unknown = format!("/api/projects/{}/files/{}/cancel", Uuid::new_v4(), app.file.id);
        let (status, _) = send(&app.ctx, "POST", &unknown).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_through_other_project_is_404() {
        let app = test_app();
        let create = format!("/api/projects/{}/files/{}/runs", app.project.id, app.file.id);
        let (_, created) = send(&app.ctx, "POST", &create).await;
        let run_id = Uuid::parse_str(created["runId"].as_str().unwrap()).unwrap();

        let other = app
            .ctx
            .db
            .with_conn(|conn| Ok::<_, DatabaseError>(seed_project(conn, app.project.file_type)))
            .unwrap();
        let cancel = format!("/api/projects/{}/files/{}/cancel", other.id, app.file.id);
        let (status, json) = send(&app.ctx, "POST", &cancel).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "NOT_FOUND");

        let run = app
            .ctx
            .db
            .with_conn(|conn| crate::db::get_run(conn, &run_id))
            .unwrap()
            .unwrap();
        assert_eq!(run.status, RunStatus::Pending);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = test_app();
        let (status, _) = send(&app.ctx, "GET", "/api/nothing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
