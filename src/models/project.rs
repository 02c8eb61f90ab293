use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::FileType;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub file_type: FileType,
    pub instruction_set: String,
    pub custom_prompt: Option<String>,
    /// Per-project ceiling on estimated tokens for a single run.
    pub token_safety_limit: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFile {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Upload name, possibly with `/`-separated folders ("scans/2024/a.pdf").
    pub original_name: String,
    /// Location relative to the storage root.
    pub storage_path: String,
    pub content_type: Option<String>,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}
