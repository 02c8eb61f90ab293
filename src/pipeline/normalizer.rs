//! Turns a raw model reply into page records.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecords {
    pub records: Vec<Value>,
    pub warnings: Vec<String>,
}

/// The reply held nothing usable. Warnings gathered so far are kept.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeFailure {
    pub error: String,
    pub warnings: Vec<String>,
}

impl NormalizeFailure {
    fn bare(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            warnings: Vec::new(),
        }
    }
}

/// Remove a surrounding markdown code fence, if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // drop the language tag line
    match body.split_once('\n') {
        Some((tag, content)) if tag.trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
            content.trim()
        }
        _ => body.trim(),
    }
}

/// Parse a reply into records for `page_number`.
///
/// Accepts `{"records": [...]}`, a bare array, or a single object. Non-object
/// entries are dropped and records without a numeric `page` get one.
pub fn normalize_records(raw: &str, page_number: u32) -> Result<NormalizedRecords, NormalizeFailure> {
    let root: Value = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| NormalizeFailure::bare(e.to_string()))?;

    let candidates = match root {
        Value::Object(mut obj) => match obj.remove("records") {
            Some(Value::Array(records)) => records,
            Some(other) => {
                obj.insert("records".into(), other);
                vec![Value::Object(obj)]
            }
            None => vec![Value::Object(obj)],
        },
        Value::Array(items) => items,
        _ => {
            return Err(NormalizeFailure::bare(
                "LLM response did not include a records array.",
            ))
        }
    };

    let mut records = Vec::with_capacity(candidates.len());
    let mut warnings = Vec::new();
    for item in candidates {
        let Value::Object(mut record) = item else {
            warnings.push("Discarded a non-object entry returned by the model.".to_string());
            continue;
        };
        if !record.get("page").is_some_and(Value::is_number) {
            record.insert("page".into(), Value::from(page_number));
            warnings.push("Added missing page number to a record returned by the model.".to_string());
        }
        records.push(Value::Object(record));
    }

    if records.is_empty() {
        return Err(NormalizeFailure {
            error: "The model response did not contain any usable records.".into(),
            warnings,
        });
    }

    Ok(NormalizedRecords { records, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_array_is_used() {
        let out = normalize_records(r#"{"records": [{"page": 1, "text": "a"}, {"page": 1}]}"#, 1).unwrap();
        assert_eq!(out.records.len(), 2);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn bare_array_and_single_object() {
        let out = normalize_records(r#"[{"page": 2}]"#, 2).unwrap();
        assert_eq!(out.records, vec![json!({"page": 2})]);

        let out = normalize_records(r#"{"page": 4, "text": "x"}"#, 4).unwrap();
        assert_eq!(out.records, vec![json!({"page": 4, "text": "x"})]);
    }

    #[test]
    fn missing_or_textual_page_is_filled_in() {
        let out = normalize_records(r#"{"records": [{"text": "a"}, {"page": "7"}]}"#, 5).unwrap();
        assert_eq!(out.records[0]["page"], 5);
        assert_eq!(out.records[1]["page"], 5);
        assert_eq!(out.warnings.len(), 2);
    }

    #[test]
    fn non_objects_are_discarded() {
        let out = normalize_records(r#"{"records": [1, "two", null, {"page": 3}]}"#, 3).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(
            out.warnings,
            vec!["Discarded a non-object entry returned by the model."; 3]
        );
    }

    #[test]
    fn nothing_usable_is_a_failure() {
        let err = normalize_records(r#"{"records": [1, 2]}"#, 1).unwrap_err();
        assert_eq!(err.error, "The model response did not contain any usable records.");
        assert_eq!(err.warnings.len(), 2);

        let err = normalize_records(r#"{"records": []}"#, 1).unwrap_err();
        assert!(err.warnings.is_empty());
    }

    #[test]
    fn scalar_root_is_rejected() {
        let err = normalize_records("42", 1).unwrap_err();
        assert_eq!(err.error, "LLM response did not include a records array.");
    }

    #[test]
    fn invalid_json_reports_parser_error() {
        let err = normalize_records("not json", 1).unwrap_err();
        assert!(err.error.contains("expected"));
    }

    #[test]
    fn code_fences_are_stripped() {
        let out = normalize_records("```json\n{\"records\": [{\"page\": 1}]}\n```", 1).unwrap();
        assert_eq!(out.records.len(), 1);
        let out = normalize_records("```\n[{\"page\": 1}]\n```", 1).unwrap();
        assert_eq!(out.records.len(), 1);
    }
}
