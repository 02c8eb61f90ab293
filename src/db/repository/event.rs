use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{now_ts, parse_ts, parse_uuid};
use crate::db::DatabaseError;
use crate::models::*;

/// Append one entry to a run's event log.
pub fn insert_event(
    conn: &Connection,
    run_id: &Uuid,
    level: EventLevel,
    message: &str,
    context: Option<&serde_json::Value>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO processing_events (id, run_id, level, message, context, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            Uuid::new_v4().to_string(),
            run_id.to_string(),
            level.as_str(),
            message,
            context.map(|c| c.to_string()),
            now_ts(),
        ],
    )?;
    Ok(())
}

/// Oldest first, at most `limit` entries.
pub fn list_run_events(
    conn: &Connection,
    run_id: &Uuid,
    limit: u32,
) -> Result<Vec<ProcessingEvent>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, run_id, level, message, context, created_at
         FROM processing_events WHERE run_id = ?1
         ORDER BY created_at, rowid
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![run_id.to_string(), limit], |row| {
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
        .map(|(id, run_id, level, message, context, created_at)| {
            Ok(ProcessingEvent {
                id: parse_uuid("processing_events.id", &id)?,
                run_id: parse_uuid("processing_events.run_id", &run_id)?,
                level: EventLevel::from_str(&level)?,
                message,
                context: StructuredValue::from_column(context),
                created_at: parse_ts("processing_events.created_at", &created_at)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::insert_run;
    use crate::db::sqlite::open_memory_database;
    use crate::db::test_fixtures::*;
    use serde_json::json;

    #[test]
    fn events_are_returned_in_insertion_order() {
        let conn = open_memory_database().unwrap();
        let (project, file) = seed_project_with_file(&conn, "a.pdf");
        let run = new_pending_run(&project, &file);
        insert_run(&conn, &run).unwrap();

        insert_event(&conn, &run.id, EventLevel::Info, "Processing run queued", Some(&json!({"fileName": "a.pdf"}))).unwrap();
        insert_event(&conn, &run.id, EventLevel::Warn, "Retrying in 2 seconds", None).unwrap();
        insert_event(&conn, &run.id, EventLevel::Error, "Max retry attempts reached", None).unwrap();

        let events = list_run_events(&conn, &run.id, 200).unwrap();
        let messages: Vec<_> = events.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["Processing run queued", "Retrying in 2 seconds", "Max retry attempts reached"]
        );
        assert_eq!(events[0].context.as_ref().and_then(|c| c.as_json()), Some(&json!({"fileName": "a.pdf"})));
        assert_eq!(events[2].level, EventLevel::Error);
    }

    #[test]
    fn limit_caps_event_count() {
        let conn = open_memory_database().unwrap();
        let (project, file) = seed_project_with_file(&conn, "a.pdf");
        let run = new_pending_run(&project, &file);
        insert_run(&conn, &run).unwrap();
        for i in 0..5 {
            insert_event(&conn, &run.id, EventLevel::Info, &format!("event {i}"), None).unwrap();
        }
        let events = list_run_events(&conn, &run.id, 3).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].message, "event 0");
    }
}
