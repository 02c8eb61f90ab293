use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{format_ts, parse_ts, parse_uuid};
use crate::db::DatabaseError;
use crate::models::*;

pub fn insert_project(conn: &Connection, project: &Project) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO projects (id, name, file_type, instruction_set, custom_prompt,
         token_safety_limit, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            project.id.to_string(),
            project.name,
            project.file_type.as_str(),
            project.instruction_set,
            project.custom_prompt,
            project.token_safety_limit as i64,
            format_ts(&project.created_at),
        ],
    )?;
    Ok(())
}

struct ProjectRow {
    id: String,
    name: String,
    file_type: String,
    instruction_set: String,
    custom_prompt: Option<String>,
    token_safety_limit: i64,
    created_at: String,
}

fn project_from_row(row: ProjectRow) -> Result<Project, DatabaseError> {
    Ok(Project {
        id: parse_uuid("projects.id", &row.id)?,
        name: row.name,
        file_type: FileType::from_str(&row.file_type)?,
        instruction_set: row.instruction_set,
        custom_prompt: row.custom_prompt,
        token_safety_limit: row.token_safety_limit.max(0) as u64,
        created_at: parse_ts("projects.created_at", &row.created_at)?,
    })
}

pub fn get_project(conn: &Connection, id: &Uuid) -> Result<Option<Project>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, name, file_type, instruction_set, custom_prompt, token_safety_limit, created_at
             FROM projects WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok(ProjectRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    file_type: row.get(2)?,
                    instruction_set: row.get(3)?,
                    custom_prompt: row.get(4)?,
                    token_safety_limit: row.get(5)?,
                    created_at: row.get(6)?,
                })
            },
        )
        .optional()?;
    row.map(project_from_row).transpose()
}

pub fn insert_project_file(conn: &Connection, file: &ProjectFile) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO project_files (id, project_id, original_name, storage_path, content_type,
         size, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            file.id.to_string(),
            file.project_id.to_string(),
            file.original_name,
            file.storage_path,
            file.content_type,
            file.size as i64,
            format_ts(&file.created_at),
        ],
    )?;
    Ok(())
}

const FILE_COLUMNS: &str =
    "id, project_id, original_name, storage_path, content_type, size, created_at";

struct ProjectFileRow {
    id: String,
    project_id: String,
    original_name: String,
    storage_path: String,
    content_type: Option<String>,
    size: i64,
    created_at: String,
}

fn file_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectFileRow> {
    Ok(ProjectFileRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        original_name: row.get(2)?,
        storage_path: row.get(3)?,
        content_type: row.get(4)?,
        size: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn file_from_row(row: ProjectFileRow) -> Result<ProjectFile, DatabaseError> {
    Ok(ProjectFile {
        id: parse_uuid("project_files.id", &row.id)?,
        project_id: parse_uuid("project_files.project_id", &row.project_id)?,
        original_name: row.original_name,
        storage_path: row.storage_path,
        content_type: row.content_type,
        size: row.size.max(0) as u64,
        created_at: parse_ts("project_files.created_at", &row.created_at)?,
    })
}

/// Look up a file, scoped to its project.
pub fn get_project_file(
    conn: &Connection,
    project_id: &Uuid,
    file_id: &Uuid,
) -> Result<Option<ProjectFile>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {FILE_COLUMNS} FROM project_files WHERE project_id = ?1 AND id = ?2"),
            params![project_id.to_string(), file_id.to_string()],
            file_row,
        )
        .optional()?;
    row.map(file_from_row).transpose()
}

pub fn list_project_files(
    conn: &Connection,
    project_id: &Uuid,
) -> Result<Vec<ProjectFile>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FILE_COLUMNS} FROM project_files WHERE project_id = ?1 ORDER BY created_at, rowid"
    ))?;
    let rows = stmt
        .query_map(params![project_id.to_string()], file_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(file_from_row).collect()
}

pub fn count_project_files(conn: &Connection, project_id: &Uuid) -> Result<u64, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM project_files WHERE project_id = ?1",
        params![project_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}
