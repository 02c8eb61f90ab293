use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::db::{count_files_with_active_runs, count_project_files, latest_runs_by_file, DatabaseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub total_files: u64,
    /// Files whose latest run reached a terminal status.
    pub completed_files: u64,
    /// Files with any pending or running run.
    pub active_files: u64,
}

pub fn progress_for_project(
    conn: &Connection,
    project_id: &Uuid,
) -> Result<ProgressSnapshot, DatabaseError> {
    let completed_files = latest_runs_by_file(conn, project_id)?
        .iter()
        .filter(|latest| latest.status.is_terminal())
        .count() as u64;

    Ok(ProgressSnapshot {
        total_files: count_project_files(conn, project_id)?,
        completed_files,
        active_files: count_files_with_active_runs(conn, project_id)?,
    })
}
