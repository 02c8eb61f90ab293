//! Repository layer: entity-scoped database operations.
//!
//! Free functions over `&Connection`. JSON columns are encoded and decoded
//! here and nowhere else.

mod event;
mod page;
mod project;
mod run;

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use super::DatabaseError;

pub use event::*;
pub use page::*;
pub use project::*;
pub use run::*;

/// Timestamps are stored as fixed-width RFC 3339 so TEXT ordering is time ordering.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn now_ts() -> String {
    format_ts(&Utc::now())
}

pub(crate) fn parse_ts(field: &str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| DatabaseError::InvalidColumn {
            field: field.into(),
            value: value.into(),
        })
}

pub(crate) fn parse_opt_ts(
    field: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    value.map(|v| parse_ts(field, &v)).transpose()
}

pub(crate) fn parse_uuid(field: &str, value: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(value).map_err(|_| DatabaseError::InvalidColumn {
        field: field.into(),
        value: value.into(),
    })
}
