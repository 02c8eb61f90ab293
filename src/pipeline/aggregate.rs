//! Folder-shaped view of extracted records across a project.
//!
//! Each file contributes its latest run. File names are treated as
//! `/`-separated paths; folders carry the recursive record count of
//! everything below them.

use std::cmp::Ordering;

use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::db::{latest_runs_by_file, DatabaseError, LatestFileRun};
use crate::models::{RunStatus, StructuredValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedFolderNode {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub record_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    /// The run's aggregated output; `null` on a leaf without output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<AggregatedFolderNode>>,
}

/// Records held by a run output.
///
/// An array counts its elements, `{"records": [...]}` counts that array,
/// any other object is one record. Null, scalars and unparsed text count
/// as none.
pub fn record_count(output: Option<&StructuredValue>) -> u64 {
    match output.and_then(StructuredValue::as_json) {
        Some(Value::Array(items)) => items.len() as u64,
        Some(Value::Object(obj)) => match obj.get("records") {
            Some(Value::Array(records)) => records.len() as u64,
            _ => 1,
        },
        _ => 0,
    }
}

/// Numeric-aware, case-insensitive ordering: `file2` sorts before `file10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let ln = take_digits(&mut left);
                let rn = take_digits(&mut right);
                let ord = compare_digit_runs(&ln, &rn);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(l), Some(r)) => {
                let ord = l.to_lowercase().cmp(r.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
        digits.push(c);
        chars.next();
    }
    digits
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn path_segments(original_name: &str) -> Vec<String> {
    original_name
        .replace('\\', "/")
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Default)]
struct FolderBuilder {
    folders: Vec<(String, FolderBuilder)>,
    files: Vec<AggregatedFolderNode>,
}

impl FolderBuilder {
    fn folder(&mut self, name: &str) -> &mut FolderBuilder {
        let index = match self.folders.iter().position(|(n, _)| n == name) {
            Some(index) => index,
            None => {
                self.folders.push((name.to_string(), FolderBuilder::default()));
                self.folders.len() - 1
            }
        };
        &mut self.folders[index].1
    }

    fn into_nodes(self, parent_path: &str) -> Vec<AggregatedFolderNode> {
        let mut nodes: Vec<AggregatedFolderNode> = self
            .folders
            .into_iter()
            .map(|(name, builder)| {
                let path = join_path(parent_path, &name);
                let children = builder.into_nodes(&path);
                AggregatedFolderNode {
                    record_count: children.iter().map(|c| c.record_count).sum(),
                    name,
                    path,
                    kind: NodeKind::Folder,
                    run_id: None,
                    status: None,
                    records: None,
                    children: Some(children),
                }
            })
            .chain(self.files)
            .collect();
        nodes.sort_by(|a, b| natural_cmp(&a.name, &b.name).then_with(|| a.path.cmp(&b.path)));
        nodes
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Arrange latest runs into a folder tree. Siblings are naturally ordered.
pub fn build_folder_tree(entries: &[LatestFileRun]) -> Vec<AggregatedFolderNode> {
    let mut root = FolderBuilder::default();

    for entry in entries {
        let mut segments = path_segments(&entry.original_name);
        let leaf_name = segments
            .pop()
            .unwrap_or_else(|| entry.file_id.to_string());

        let mut folder = &mut root;
        for segment in &segments {
            folder = folder.folder(segment);
        }

        segments.push(leaf_name.clone());
        folder.files.push(AggregatedFolderNode {
            name: leaf_name,
            path: segments.join("/"),
            kind: NodeKind::File,
            record_count: record_count(entry.aggregated_output.as_ref()),
            run_id: Some(entry.run_id),
            status: Some(entry.status),
            records: Some(
                entry
                    .aggregated_output
                    .as_ref()
                    .map(|o| match o {
                        StructuredValue::Json(v) => v.clone(),
                        StructuredValue::Raw(text) => Value::String(text.clone()),
                    })
                    .unwrap_or(Value::Null),
            ),
            children: None,
        });
    }

    root.into_nodes("")
}

pub fn aggregate_results_by_folder(
    conn: &Connection,
    project_id: &Uuid,
) -> Result<Vec<AggregatedFolderNode>, DatabaseError> {
    let latest = latest_runs_by_file(conn, project_id)?;
    Ok(build_folder_tree(&latest))
}
