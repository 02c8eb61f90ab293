//! Seed helpers shared by repository and pipeline tests.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use super::repository::*;
use crate::models::*;

pub fn seed_project(conn: &Connection, file_type: FileType) -> Project {
    let project = Project {
        id: Uuid::new_v4(),
        name: "Test project".into(),
        file_type,
        instruction_set: "ocr_all_text".into(),
        custom_prompt: None,
        token_safety_limit: 100_000,
        created_at: Utc::now(),
    };
    insert_project(conn, &project).unwrap();
    project
}

pub fn seed_file(conn: &Connection, project: &Project, name: &str) -> ProjectFile {
    let id = Uuid::new_v4();
    let file = ProjectFile {
        id,
        project_id: project.id,
        original_name: name.into(),
        storage_path: format!("{}/{id}", project.id),
        content_type: None,
        size: 0,
        created_at: Utc::now(),
    };
    insert_project_file(conn, &file).unwrap();
    file
}

pub fn seed_project_with_file(conn: &Connection, name: &str) -> (Project, ProjectFile) {
    let project = seed_project(conn, FileType::Pdf);
    let file = seed_file(conn, &project, name);
    (project, file)
}

pub fn new_pending_run(project: &Project, file: &ProjectFile) -> ProcessingRun {
    let now = Utc::now();
    ProcessingRun {
        id: Uuid::new_v4(),
        project_id: project.id,
        file_id: file.id,
        instruction_set: project.instruction_set.clone(),
        custom_prompt: project.custom_prompt.clone(),
        model: Some("test/model".into()),
        temperature: Some(0.2),
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
    }
}

pub fn new_pending_run_at(project: &Project, file: &ProjectFile, created_at: &str) -> ProcessingRun {
    let ts = DateTime::parse_from_rfc3339(created_at)
        .unwrap()
        .with_timezone(&Utc);
    ProcessingRun {
        created_at: ts,
        updated_at: ts,
        ..new_pending_run(project, file)
    }
}

/// Insert a finished run with the given output.
pub fn seed_finished_run(
    conn: &Connection,
    project: &Project,
    file: &ProjectFile,
    status: RunStatus,
    output: Option<serde_json::Value>,
) -> ProcessingRun {
    let run = ProcessingRun {
        status,
        aggregated_output: output.map(StructuredValue::Json),
        attempts: 1,
        ..new_pending_run(project, file)
    };
    insert_run(conn, &run).unwrap();
    run
}
