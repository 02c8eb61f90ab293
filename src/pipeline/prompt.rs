//! Per-page prompt construction.

use base64::Engine;

use super::llm::{ChatMessage, ContentPart, ImageUrl};
use super::loader::{DocumentPage, PageImage};
use super::workflow::{Workflow, WorkflowField};

const EMPTY_PAGE_TEXT: &str = "No text content was provided for this page.";
const TEXT_DELIMITER: &str = "\"\"\"";

pub fn describe_fields(fields: &[WorkflowField]) -> String {
    if fields.is_empty() {
        return "No structured fields were provided.".to_string();
    }
    let lines: Vec<String> = fields
        .iter()
        .map(|f| format!("- \"{}\": {}", f.name, f.description))
        .collect();
    format!(
        "Each record must include the following fields:\n{}",
        lines.join("\n")
    )
}

pub fn image_data_url(image: &PageImage) -> String {
    format!(
        "data:{};base64,{}",
        image.mime_type,
        base64::engine::general_purpose::STANDARD.encode(&image.data)
    )
}

pub fn system_prompt(workflow: &Workflow, custom_prompt: Option<&str>) -> String {
    let mut instructions = vec![
        format!(
            "You are assisting with the \"{}\" workflow for document extraction.",
            workflow.name
        ),
        workflow.summary.to_string(),
        "Analyze the provided page independently and produce structured JSON records.".into(),
        "Return your response as a JSON object with a top-level \"records\" array.".into(),
        describe_fields(workflow.fields),
        "Ensure every record includes a numeric \"page\" field representing the page number you analyzed.".into(),
        "If a field is not applicable, set it to null rather than omitting it.".into(),
        "Do not include explanatory text outside of the JSON object.".into(),
    ];

    if !workflow.steps.is_empty() {
        instructions.push("Follow these high-level steps:".into());
        instructions.push(
            workflow
                .steps
                .iter()
                .enumerate()
                .map(|(i, step)| format!("{}. {step}", i + 1))
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }

    if let Some(custom) = custom_prompt.map(str::trim).filter(|c| !c.is_empty()) {
        instructions.push("Additional project-specific guidance:".into());
        instructions.push(custom.to_string());
    }

    instructions.join("\n\n")
}

pub fn user_text(page: &DocumentPage) -> String {
    let text = page
        .text_content
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(EMPTY_PAGE_TEXT);

    let mut parts = vec![
        format!("Document page number: {}.", page.page_number),
        "Extracted text content:".to_string(),
        TEXT_DELIMITER.to_string(),
        text.to_string(),
        TEXT_DELIMITER.to_string(),
    ];

    if !page.metadata.is_empty() {
        parts.push("Additional metadata:".into());
        parts.push(
            serde_json::to_string_pretty(&page.metadata).unwrap_or_else(|_| "{}".into()),
        );
    }

    parts.join("\n")
}

/// System instructions plus one user message: the page text, followed by
/// each page image as a base64 data URL part.
pub fn build_page_messages(
    page: &DocumentPage,
    workflow: &Workflow,
    custom_prompt: Option<&str>,
) -> Vec<ChatMessage> {
    let mut parts = vec![ContentPart::Text {
        text: user_text(page),
    }];
    parts.extend(page.images.iter().map(|image| ContentPart::ImageUrl {
        image_url: ImageUrl {
            url: image_data_url(image),
        },
    }));

    vec![
        ChatMessage::system(system_prompt(workflow, custom_prompt)),
        ChatMessage::user_parts(parts),
    ]
}
