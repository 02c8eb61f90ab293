//! Processing service: run creation, cancellation and read models.

use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::scheduler::Scheduler;
use crate::db::{
    cancel_active_runs_for_file, get_project, get_project_file, get_project_run, insert_event,
    insert_run, list_active_run_ids, list_project_runs, list_run_events, list_run_pages,
    requeue_run, Database, DatabaseError, RunListEntry,
};
use crate::models::{
    EventLevel, ProcessingEvent, ProcessingPage, ProcessingRun, ProjectFile, RunStatus,
    UsageSummary,
};

pub const DEFAULT_LIST_LIMIT: u32 = 20;
pub const MAX_LIST_LIMIT: u32 = 100;
pub const DETAIL_EVENT_LIMIT: u32 = 200;

const FILE_REMOVED: &str = "File was removed before processing could complete.";

/// Model settings stamped onto new runs.
#[derive(Debug, Clone)]
pub struct RunDefaults {
    pub model: String,
    pub temperature: f64,
}

/// Insert a pending run for a file of a project.
///
/// Returns `None` when the project does not exist or the file does not
/// belong to it. The caller enqueues the returned id.
pub fn create_run(
    conn: &Connection,
    project_id: &Uuid,
    file_id: &Uuid,
    triggered_by: Option<&str>,
    defaults: &RunDefaults,
) -> Result<Option<Uuid>, DatabaseError> {
    let Some(project) = get_project(conn, project_id)? else {
        return Ok(None);
    };
    let Some(file) = get_project_file(conn, &project.id, file_id)? else {
        return Ok(None);
    };

    let now = chrono::Utc::now();
    let run = ProcessingRun {
        id: Uuid::new_v4(),
        project_id: project.id,
        file_id: file.id,
        instruction_set: project.instruction_set.clone(),
        custom_prompt: project.custom_prompt.clone(),
        model: Some(defaults.model.clone()),
        temperature: Some(defaults.temperature),
        file_type: project.file_type,
        status: RunStatus::Pending,
        error: None,
        warnings: Vec::new(),
        aggregated_output: None,
        usage_summary: None,
        attempts: 0,
        created_at: now,
        updated_at: now,
        started_at: None,
        completed_at: None,
    };
    insert_run(conn, &run)?;
    insert_event(
        conn,
        &run.id,
        EventLevel::Info,
        "Processing run queued",
        Some(&json!({
            "fileName": file.original_name,
            "triggeredBy": triggered_by.unwrap_or("system"),
        })),
    )?;

    tracing::info!(run_id = %run.id, file_id = %file.id, "Processing run created");
    Ok(Some(run.id))
}

/// Cancel every pending or running run of a file. Workers that are mid-run
/// see the status change before writing and discard their results.
///
/// Returns `None` when the file does not belong to the project.
pub fn cancel_runs_for_file(
    conn: &Connection,
    project_id: &Uuid,
    file_id: &Uuid,
) -> Result<Option<Vec<Uuid>>, DatabaseError> {
    let Some(file) = get_project_file(conn, project_id, file_id)? else {
        return Ok(None);
    };
    let cancelled = cancel_active_runs_for_file(conn, project_id, &file.id, FILE_REMOVED)?;
    for run_id in &cancelled {
        insert_event(
            conn,
            run_id,
            EventLevel::Warn,
            "Run cancelled because the associated file was deleted.",
            None,
        )?;
    }
    if !cancelled.is_empty() {
        tracing::info!(file_id = %file.id, count = cancelled.len(), "Cancelled active runs");
    }
    Ok(Some(cancelled))
}

pub fn clamp_list_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunListSummary {
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub active: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunListing {
    pub runs: Vec<RunListEntry>,
    pub summary: RunListSummary,
}

/// Newest runs first, with token, cost and activity totals over the
/// listed runs.
pub fn list_runs_for_project(
    conn: &Connection,
    project_id: &Uuid,
    limit: Option<u32>,
) -> Result<RunListing, DatabaseError> {
    let runs = list_project_runs(conn, project_id, clamp_list_limit(limit))?;
    let usages: Vec<Option<UsageSummary>> = runs.iter().map(|r| r.run.usage()).collect();
    let usage = UsageSummary::sum(usages.iter().map(Option::as_ref)).unwrap_or_default();
    let summary = RunListSummary {
        total_tokens: usage.total_tokens.unwrap_or(0),
        total_cost_usd: usage.total_cost_usd.unwrap_or(0.0),
        active: runs.iter().filter(|r| r.run.status.is_active()).count() as u64,
    };
    Ok(RunListing { runs, summary })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetail {
    pub run: ProcessingRun,
    pub file: Option<ProjectFile>,
    pub pages: Vec<ProcessingPage>,
    pub events: Vec<ProcessingEvent>,
}

pub fn get_run_detail(
    conn: &Connection,
    project_id: &Uuid,
    run_id: &Uuid,
) -> Result<Option<RunDetail>, DatabaseError> {
    let Some(run) = get_project_run(conn, project_id, run_id)? else {
        return Ok(None);
    };
    Ok(Some(RunDetail {
        file: get_project_file(conn, project_id, &run.file_id)?,
        pages: list_run_pages(conn, &run.id)?,
        events: list_run_events(conn, &run.id, DETAIL_EVENT_LIMIT)?,
        run,
    }))
}

/// Re-queue runs a previous process left pending or running.
pub fn recover_in_flight_runs(db: &Database, scheduler: &Scheduler) -> Result<usize, DatabaseError> {
    let ids = db.with_conn(|conn| {
        let ids = list_active_run_ids(conn)?;
        for id in &ids {
            if requeue_run(conn, id)? {
                insert_event(
                    conn,
                    id,
                    EventLevel::Info,
                    "Run was interrupted and has been re-queued",
                    None,
                )?;
            }
        }
        Ok(ids)
    })?;

    let queued = ids.iter().filter(|id| scheduler.enqueue(**id)).count();
    if queued > 0 {
        tracing::info!(count = queued, "Recovered in-flight processing runs");
    }
    Ok(queued)
}
