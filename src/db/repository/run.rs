use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use super::{format_ts, now_ts, parse_opt_ts, parse_ts, parse_uuid};
use crate::db::DatabaseError;
use crate::models::*;

const RUN_COLUMNS: &str = "id, project_id, file_id, instruction_set, custom_prompt, model, temperature,
    file_type, status, error, warnings, aggregated_output, usage_summary, attempts,
    created_at, updated_at, started_at, completed_at";

const ACTIVE_STATUSES_SQL: &str = "('pending', 'running')";

pub fn insert_run(conn: &Connection, run: &ProcessingRun) -> Result<(), DatabaseError> {
    conn.execute(
        &format!("INSERT INTO processing_runs ({RUN_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"),
        params![
            run.id.to_string(),
            run.project_id.to_string(),
            run.file_id.to_string(),
            run.instruction_set,
            run.custom_prompt,
            run.model,
            run.temperature,
            run.file_type.as_str(),
            run.status.as_str(),
            run.error,
            string_list_to_column(&run.warnings),
            run.aggregated_output.as_ref().map(|v| v.to_column()),
            run.usage_summary.as_ref().map(|v| v.to_column()),
            run.attempts,
            format_ts(&run.created_at),
            format_ts(&run.updated_at),
            run.started_at.as_ref().map(format_ts),
            run.completed_at.as_ref().map(format_ts),
        ],
    )?;
    Ok(())
}

fn usage_to_column(usage: Option<&UsageSummary>) -> Option<String> {
    usage.and_then(|u| serde_json::to_string(u).ok())
}


struct RunRow {
    id: String,
    project_id: String,
    file_id: String,
    instruction_set: String,
    custom_prompt: Option<String>,
    model: Option<String>,
    temperature: Option<f64>,
    file_type: String,
    status: String,
    error: Option<String>,
    warnings: Option<String>,
    aggregated_output: Option<String>,
    usage_summary: Option<String>,
    attempts: i64,
    created_at: String,
    updated_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

/// Reads `RUN_COLUMNS` starting at `offset`.
fn run_row(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        id: row.get(offset)?,
        project_id: row.get(offset + 1)?,
        file_id: row.get(offset + 2)?,
        instruction_set: row.get(offset + 3)?,
        custom_prompt: row.get(offset + 4)?,
        model: row.get(offset + 5)?,
        temperature: row.get(offset + 6)?,
        file_type: row.get(offset + 7)?,
        status: row.get(offset + 8)?,
        error: row.get(offset + 9)?,
        warnings: row.get(offset + 10)?,
        aggregated_output: row.get(offset + 11)?,
        usage_summary: row.get(offset + 12)?,
        attempts: row.get(offset + 13)?,
        created_at: row.get(offset + 14)?,
        updated_at: row.get(offset + 15)?,
        started_at: row.get(offset + 16)?,
        completed_at: row.get(offset + 17)?,
    })
}

fn run_from_row(row: RunRow) -> Result<ProcessingRun, DatabaseError> {
    Ok(ProcessingRun {
        id: parse_uuid("processing_runs.id", &row.id)?,
        project_id: parse_uuid("processing_runs.project_id", &row.project_id)?,
        file_id: parse_uuid("processing_runs.file_id", &row.file_id)?,
        instruction_set: row.instruction_set,
        custom_prompt: row.custom_prompt,
        model: row.model,
        temperature: row.temperature,
        file_type: FileType::from_str(&row.file_type)?,
        status: RunStatus::from_str(&row.status)?,
        error: row.error,
        warnings: row
            .warnings
            .as_deref()
            .map(string_list_from_column)
            .unwrap_or_default(),
        aggregated_output: StructuredValue::from_column(row.aggregated_output),
        usage_summary: StructuredValue::from_column(row.usage_summary),
        attempts: row.attempts.max(0) as u32,
        created_at: parse_ts("processing_runs.created_at", &row.created_at)?,
        updated_at: parse_ts("processing_runs.updated_at", &row.updated_at)?,
        started_at: parse_opt_ts("processing_runs.started_at", row.started_at)?,
        completed_at: parse_opt_ts("processing_runs.completed_at", row.completed_at)?,
    })
}

pub fn get_run(conn: &Connection, id: &Uuid) -> Result<Option<ProcessingRun>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {RUN_COLUMNS} FROM processing_runs WHERE id = ?1"),
            params![id.to_string()],
            |row| run_row(row, 0),
        )
        .optional()?;
    row.map(run_from_row).transpose()
}

/// Look up a run, scoped to its project.
pub fn get_project_run(
    conn: &Connection,
    project_id: &Uuid,
    run_id: &Uuid,
) -> Result<Option<ProcessingRun>, DatabaseError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {RUN_COLUMNS} FROM processing_runs WHERE project_id = ?1 AND id = ?2"
            ),
            params![project_id.to_string(), run_id.to_string()],
            |row| run_row(row, 0),
        )
        .optional()?;
    row.map(run_from_row).transpose()
}

pub fn get_run_status(conn: &Connection, id: &Uuid) -> Result<Option<RunStatus>, DatabaseError> {
    let status = conn
        .query_row(
            "SELECT status FROM processing_runs WHERE id = ?1",
            params![id.to_string()],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    status.map(|s| RunStatus::from_str(&s)).transpose()
}

/// Move an active run to `running` and count the attempt.
///
/// Returns the new attempt count, or `None` when the run is no longer
/// pending or running (cancelled, already finished, deleted).
pub fn begin_attempt(conn: &Connection, id: &Uuid) -> Result<Option<u32>, DatabaseError> {
    let now = now_ts();
    let changed = conn.execute(
        &format!(
            "UPDATE processing_runs
             SET status = 'running', attempts = attempts + 1,
                 started_at = COALESCE(started_at, ?1), updated_at = ?1
             WHERE id = ?2 AND status IN {ACTIVE_STATUSES_SQL}"
        ),
        params![now, id.to_string()],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    let attempts: i64 = conn.query_row(
        "SELECT attempts FROM processing_runs WHERE id = ?1",
        params![id.to_string()],
        |row| row.get(0),
    )?;
    Ok(Some(attempts.max(0) as u32))
}

/// Return a running run to `pending` while it waits for a retry.
pub fn requeue_run(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE processing_runs SET status = 'pending', updated_at = ?1
         WHERE id = ?2 AND status = 'running'",
        params![now_ts(), id.to_string()],
    )?;
    Ok(changed > 0)
}

/// Terminal state written when a run finishes.
#[derive(Debug, Clone)]
pub struct RunCompletion<'a> {
    pub status: RunStatus,
    pub error: Option<&'a str>,
    pub warnings: &'a [String],
    pub aggregated_output: Option<&'a serde_json::Value>,
    pub usage_summary: Option<&'a UsageSummary>,
}

/// Write a terminal state. Only applies while the run is still active, so a
/// concurrent cancellation is never overwritten. Returns whether it applied.
pub fn complete_run(
    conn: &Connection,
    id: &Uuid,
    completion: &RunCompletion<'_>,
) -> Result<bool, DatabaseError> {
    let now = now_ts();
    let changed = conn.execute(
        &format!(
            "UPDATE processing_runs
             SET status = ?1, error = ?2, warnings = ?3, aggregated_output = ?4,
                 usage_summary = ?5, completed_at = ?6, updated_at = ?6
             WHERE id = ?7 AND status IN {ACTIVE_STATUSES_SQL}"
        ),
        params![
            completion.status.as_str(),
            completion.error,
            string_list_to_column(completion.warnings),
            completion.aggregated_output.map(|v| v.to_string()),
            usage_to_column(completion.usage_summary),
            now,
            id.to_string(),
        ],
    )?;
    Ok(changed > 0)
}

/// Cancel every pending or running run of a file within a project.
/// Returns the affected ids.
pub fn cancel_active_runs_for_file(
    conn: &Connection,
    project_id: &Uuid,
    file_id: &Uuid,
    reason: &str,
) -> Result<Vec<Uuid>, DatabaseError> {
    let ids = {
        let mut stmt = conn.prepare(&format!(
            "SELECT id FROM processing_runs
             WHERE project_id = ?1 AND file_id = ?2 AND status IN {ACTIVE_STATUSES_SQL}"
        ))?;
        let ids = stmt
            .query_map(params![project_id.to_string(), file_id.to_string()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };

    let now = now_ts();
    let mut cancelled = Vec::with_capacity(ids.len());
    for id in ids {
        let changed = conn.execute(
            &format!(
                "UPDATE processing_runs
                 SET status = 'cancelled', error = ?1, completed_at = ?2, updated_at = ?2
                 WHERE id = ?3 AND status IN {ACTIVE_STATUSES_SQL}"
            ),
            params![reason, now, id],
        )?;
        if changed > 0 {
            cancelled.push(parse_uuid("processing_runs.id", &id)?);
        }
    }
    Ok(cancelled)
}

/// Ids of every pending or running run, oldest first.
pub fn list_active_run_ids(conn: &Connection) -> Result<Vec<Uuid>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id FROM processing_runs WHERE status IN {ACTIVE_STATUSES_SQL}
         ORDER BY created_at, rowid"
    ))?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    ids.iter()
        .map(|id| parse_uuid("processing_runs.id", id))
        .collect()
}

/// A run as listed for a project, with its file's name and size.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunListEntry {
    #[serde(flatten)]
    pub run: ProcessingRun,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}

/// Newest runs of a project first.
pub fn list_project_runs(
    conn: &Connection,
    project_id: &Uuid,
    limit: u32,
) -> Result<Vec<RunListEntry>, DatabaseError> {
    let columns = RUN_COLUMNS
        .split(',')
        .map(|c| format!("r.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {columns}, f.original_name, f.size
         FROM processing_runs r
         LEFT JOIN project_files f ON f.id = r.file_id
         WHERE r.project_id = ?1
         ORDER BY r.created_at DESC, r.rowid DESC
         LIMIT ?2"
    ))?;
    let rows = stmt
        .query_map(params![project_id.to_string(), limit], |row| {
            Ok((
                run_row(row, 0)?,
                row.get::<_, Option<String>>(18)?,
                row.get::<_, Option<i64>>(19)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(run, file_name, file_size)| {
            Ok(RunListEntry {
                run: run_from_row(run)?,
                file_name,
                file_size: file_size.map(|s| s.max(0) as u64),
            })
        })
        .collect()
}

/// The most recently created run of one file.
#[derive(Debug, Clone)]
pub struct LatestFileRun {
    pub file_id: Uuid,
    pub original_name: String,
    pub run_id: Uuid,
    pub status: RunStatus,
    pub aggregated_output: Option<StructuredValue>,
    pub created_at: DateTime<Utc>,
}

/// Latest run per file for a project. Files that never had a run are absent.
pub fn latest_runs_by_file(
    conn: &Connection,
    project_id: &Uuid,
) -> Result<Vec<LatestFileRun>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT f.id, f.original_name, r.id, r.status, r.aggregated_output, r.created_at
         FROM project_files f
         JOIN processing_runs r ON r.id = (
             SELECT r2.id FROM processing_runs r2
             WHERE r2.file_id = f.id
             ORDER BY r2.created_at DESC, r2.rowid DESC
             LIMIT 1
         )
         WHERE f.project_id = ?1",
    )?;
    let rows = stmt
        .query_map(params![project_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(file_id, original_name, run_id, status, output, created_at)| {
            Ok(LatestFileRun {
                file_id: parse_uuid("project_files.id", &file_id)?,
                original_name,
                run_id: parse_uuid("processing_runs.id", &run_id)?,
                status: RunStatus::from_str(&status)?,
                aggregated_output: StructuredValue::from_column(output),
                created_at: parse_ts("processing_runs.created_at", &created_at)?,
            })
        })
        .collect()
}

/// Distinct files of a project with at least one pending or running run.
pub fn count_files_with_active_runs(
    conn: &Connection,
    project_id: &Uuid,
) -> Result<u64, DatabaseError> {
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(DISTINCT file_id) FROM processing_runs
             WHERE project_id = ?1 AND status IN {ACTIVE_STATUSES_SQL}"
        ),
        params![project_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}
