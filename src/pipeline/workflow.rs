//! Built-in extraction workflows (instruction sets).

use serde::Serialize;

pub const DEFAULT_WORKFLOW_ID: &str = "ocr_all_text";

#[derive(Debug, Clone, Copy, Serialize)]
pub struct WorkflowField {
    pub name: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Workflow {
    pub id: &'static str,
    pub name: &'static str,
    pub summary: &'static str,
    pub steps: &'static [&'static str],
    pub outputs: &'static [&'static str],
    pub fields: &'static [WorkflowField],
}

const fn field(name: &'static str, description: &'static str) -> WorkflowField {
    WorkflowField { name, description }
}

pub const WORKFLOWS: &[Workflow] = &[
    Workflow {
        id: "ocr_all_text",
        name: "Full-document OCR",
        summary: "Extract searchable text from every page in reading order, preserving paragraphs where possible.",
        steps: &[
            "Process each page with high-accuracy OCR tuned for dense documents.",
            "Normalize whitespace while retaining headings and paragraph boundaries.",
            "Return the full plain-text output grouped by page number.",
        ],
        outputs: &[
            "Page-level plain text suitable for downstream search or embeddings.",
            "Metadata indicating OCR confidence scores for each page.",
        ],
        fields: &[
            field("page", "The page index (1-based)."),
            field("text", "Full OCR text extracted from the page."),
            field("confidence", "Overall OCR confidence expressed as a decimal between 0 and 1."),
        ],
    },
    Workflow {
        id: "page_breakdown",
        name: "Page structure breakdown",
        summary: "Return a detailed inventory of textual blocks, tables, and visual regions for each page.",
        steps: &[
            "Segment each page into logical regions (heading, paragraph, table, figure).",
            "Capture the bounding boxes for every detected region.",
            "Summarize the important textual content and describe relevant visual elements.",
        ],
        outputs: &[
            "A structured JSON array of all detected regions per page.",
            "Bounding box coordinates and human-readable descriptions for figures or charts.",
        ],
        fields: &[
            field("page", "The page index (1-based)."),
            field("regionType", "The classification for the region (heading, paragraph, table, figure)."),
            field("bounds", "Bounding box coordinates in PDF points: [x, y, width, height]."),
            field("content", "Primary text or a description of the detected region."),
        ],
    },
    Workflow {
        id: "form_field_extraction",
        name: "Filled form extraction",
        summary: "Detect filled form fields and return their values as normalized JSON objects.",
        steps: &[
            "Locate form inputs, checkboxes, and signature lines on each page.",
            "Determine the captured value or selection state for every field.",
            "Normalize the values using consistent keys for easy downstream ingestion.",
        ],
        outputs: &[
            "Structured JSON keyed by form field names with detected values.",
            "A per-field confidence score and location metadata.",
        ],
        fields: &[
            field("fieldName", "Identifier inferred from nearby labels or PDF form metadata."),
            field("value", "Detected input value, checkbox state, or signature presence."),
            field("page", "The page number where the field appears."),
            field("confidence", "Confidence score between 0 and 1."),
        ],
    },
    Workflow {
        id: "signature_detection",
        name: "Signature detection",
        summary: "Flag and describe signatures or initials placed on uploaded pages.",
        steps: &[
            "Scan each page for handwritten regions and signature blocks.",
            "Differentiate between typed names and genuine handwriting strokes.",
            "Return cropped location details to support downstream verification workflows.",
        ],
        outputs: &[
            "A list of detected signature regions with bounding boxes.",
            "Confidence scores and a label describing whether the mark is a signature or set of initials.",
        ],
        fields: &[
            field("page", "The page number containing the signature."),
            field("bounds", "Bounding box coordinates in PDF points: [x, y, width, height]."),
            field("type", "Whether the detection appears to be a full signature or initials."),
            field("confidence", "Confidence score between 0 and 1."),
        ],
    },
];

pub fn lookup(id: &str) -> Option<&'static Workflow> {
    WORKFLOWS.iter().find(|w| w.id == id)
}

/// The requested workflow, or the default when the id is unknown.
pub fn resolve(id: Option<&str>) -> &'static Workflow {
    id.and_then(lookup)
        .or_else(|| lookup(DEFAULT_WORKFLOW_ID))
        .unwrap_or(&WORKFLOWS[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_workflow_exists() {
        assert_eq!(lookup(DEFAULT_WORKFLOW_ID).unwrap().name, "Full-document OCR");
    }

    #[test]
    fn unknown_id_resolves_to_default() {
        assert_eq!(resolve(Some("nope")).id, DEFAULT_WORKFLOW_ID);
        assert_eq!(resolve(None).id, DEFAULT_WORKFLOW_ID);
        assert_eq!(resolve(Some("signature_detection")).id, "signature_detection");
    }

    #[test]
    fn every_workflow_asks_for_a_page_field() {
        for workflow in WORKFLOWS {
            assert!(
                workflow.fields.iter().any(|f| f.name == "page"),
                "{} has no page field",
                workflow.id
            );
        }
    }
}
