use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{EventLevel, FileType, PageStatus, RunStatus};
use super::structured::StructuredValue;

/// One attempt-tracked execution of the pipeline over a single file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingRun {
    pub id: Uuid,
    pub project_id: Uuid,
    pub file_id: Uuid,
    pub instruction_set: String,
    pub custom_prompt: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub file_type: FileType,
    pub status: RunStatus,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub aggregated_output: Option<StructuredValue>,
    pub usage_summary: Option<StructuredValue>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProcessingRun {
    /// Stored usage totals, when the column holds a well-formed summary.
    pub fn usage(&self) -> Option<UsageSummary> {
        self.usage_summary.as_ref().and_then(StructuredValue::decode)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingPage {
    pub id: Uuid,
    pub run_id: Uuid,
    pub page_number: u32,
    pub status: PageStatus,
    pub status_code: Option<u16>,
    pub entries: Option<StructuredValue>,
    pub raw_response: Option<String>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub usage: Option<StructuredValue>,
    pub created_at: DateTime<Utc>,
}

/// Page row as produced by the executor, before ids and timestamps are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct PageOutcome {
    pub page_number: u32,
    pub status: PageStatus,
    pub status_code: Option<u16>,
    pub entries: Vec<serde_json::Value>,
    pub raw_response: Option<String>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub usage: Option<UsageSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingEvent {
    pub id: Uuid,
    pub run_id: Uuid,
    pub level: EventLevel,
    pub message: String,
    pub context: Option<StructuredValue>,
    pub created_at: DateTime<Utc>,
}

/// Provider-reported token usage. Every field is optional because
/// providers omit them freely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
}

impl UsageSummary {
    pub fn is_empty(&self) -> bool {
        self.prompt_tokens.is_none()
            && self.completion_tokens.is_none()
            && self.total_tokens.is_none()
            && self.total_cost_usd.is_none()
    }

    /// Add `other` into `self`, field by field. A field stays `None` only
    /// while neither side has reported it.
    pub fn accumulate(&mut self, other: &UsageSummary) {
        fn add_u64(slot: &mut Option<u64>, value: Option<u64>) {
            if let Some(v) = value {
                *slot = Some(slot.unwrap_or(0) + v);
            }
        }
        add_u64(&mut self.prompt_tokens, other.prompt_tokens);
        add_u64(&mut self.completion_tokens, other.completion_tokens);
        add_u64(&mut self.total_tokens, other.total_tokens);
        if let Some(cost) = other.total_cost_usd {
            self.total_cost_usd = Some(self.total_cost_usd.unwrap_or(0.0) + cost);
        }
    }

    /// Sum a sequence of optional usages; `None` when nothing was reported.
    pub fn sum<'a>(items: impl IntoIterator<Item = Option<&'a UsageSummary>>) -> Option<UsageSummary> {
        let mut total = UsageSummary::default();
        for usage in items.into_iter().flatten() {
            total.accumulate(usage);
        }
        (!total.is_empty()).then_some(total)
    }
}
