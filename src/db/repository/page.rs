use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{now_ts, parse_ts, parse_uuid};
use crate::db::DatabaseError;
use crate::models::*;

/// Replace every page row of a run in one transaction.
///
/// Rows from a previous attempt never survive alongside the new ones.
pub fn replace_run_pages(
    conn: &mut Connection,
    run_id: &Uuid,
    pages: &[PageOutcome],
) -> Result<(), DatabaseError> {
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM processing_pages WHERE run_id = ?1",
        params![run_id.to_string()],
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO processing_pages (id, run_id, page_number, status, status_code, entries,
             raw_response, warnings, error, usage, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        let now = now_ts();
        for page in pages {
            let entries = (!page.entries.is_empty())
                .then(|| serde_json::Value::Array(page.entries.clone()).to_string());
            let usage = page
                .usage
                .as_ref()
                .and_then(|u| serde_json::to_string(u).ok());
            stmt.execute(params![
                Uuid::new_v4().to_string(),
                run_id.to_string(),
                page.page_number,
                page.status.as_str(),
                page.status_code,
                entries,
                page.raw_response,
                string_list_to_column(&page.warnings),
                page.error,
                usage,
                now,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Pages of a run in page order.
pub fn list_run_pages(
    conn: &Connection,
    run_id: &Uuid,
) -> Result<Vec<ProcessingPage>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, run_id, page_number, status, status_code, entries, raw_response, warnings,
         error, usage, created_at
         FROM processing_pages WHERE run_id = ?1 ORDER BY page_number",
    )?;
    let rows = stmt
        .query_map(params![run_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, Option<String>>(9)?,
                row.get::<_, String>(10)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(
            |(id, run_id, page_number, status, status_code, entries, raw, warnings, error, usage, created_at)| {
                Ok(ProcessingPage {
                    id: parse_uuid("processing_pages.id", &id)?,
                    run_id: parse_uuid("processing_pages.run_id", &run_id)?,
                    page_number: page_number.max(0) as u32,
                    status: PageStatus::from_str(&status)?,
                    status_code: status_code.and_then(|c| u16::try_from(c).ok()),
                    entries: StructuredValue::from_column(entries),
                    raw_response: raw,
                    warnings: warnings
                        .as_deref()
                        .map(string_list_from_column)
                        .unwrap_or_default(),
                    error,
                    usage: StructuredValue::from_column(usage),
                    created_at: parse_ts("processing_pages.created_at", &created_at)?,
                })
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::insert_run;
    use crate::db::sqlite::open_memory_database;
    use crate::db::test_fixtures::*;
    use serde_json::json;

    fn outcome(page_number: u32, status: PageStatus, entries: Vec<serde_json::Value>) -> PageOutcome {
        PageOutcome {
            page_number,
            status,
            status_code: None,
            entries,
            raw_response: Some("{}".into()),
            warnings: Vec::new(),
            error: None,
            usage: None,
        }
    }

    #[test]
    fn replace_discards_previous_attempt() {
        let mut conn = open_memory_database().unwrap();
        let (project, file) = seed_project_with_file(&conn, "a.pdf");
        let run = new_pending_run(&project, &file);
        insert_run(&conn, &run).unwrap();

        let first = vec![
            outcome(1, PageStatus::Failed, vec![]),
            outcome(2, PageStatus::Failed, vec![]),
            outcome(3, PageStatus::Failed, vec![]),
        ];
        replace_run_pages(&mut conn, &run.id, &first).unwrap();

        let second = vec![outcome(1, PageStatus::Succeeded, vec![json!({"page": 1})])];
        replace_run_pages(&mut conn, &run.id, &second).unwrap();

        let pages = list_run_pages(&conn, &run.id).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].status, PageStatus::Succeeded);
        assert_eq!(
            pages[0].entries.as_ref().and_then(|e| e.as_json()),
            Some(&json!([{"page": 1}]))
        );
    }

    #[test]
    fn pages_come_back_in_page_order() {
        let mut conn = open_memory_database().unwrap();
        let (project, file) = seed_project_with_file(&conn, "a.pdf");
        let run = new_pending_run(&project, &file);
        insert_run(&conn, &run).unwrap();

        let mut failed = outcome(2, PageStatus::Failed, vec![]);
        failed.status_code = Some(400);
        failed.error = Some("bad request".into());
        replace_run_pages(
            &mut conn,
            &run.id,
            &[failed, outcome(1, PageStatus::Succeeded, vec![json!({"page": 1})])],
        )
        .unwrap();

        let pages = list_run_pages(&conn, &run.id).unwrap();
        assert_eq!(pages.iter().map(|p| p.page_number).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(pages[1].status_code, Some(400));
        assert!(pages[1].entries.is_none());
    }

    #[test]
    fn empty_replace_clears_rows() {
        let mut conn = open_memory_database().unwrap();
        let (project, file) = seed_project_with_file(&conn, "a.pdf");
        let run = new_pending_run(&project, &file);
        insert_run(&conn, &run).unwrap();
        replace_run_pages(&mut conn, &run.id, &[outcome(1, PageStatus::Succeeded, vec![])]).unwrap();

        replace_run_pages(&mut conn, &run.id, &[]).unwrap();
        assert!(list_run_pages(&conn, &run.id).unwrap().is_empty());
    }
}
