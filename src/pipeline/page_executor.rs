//! Sequential per-page model calls.

use serde_json::Value;

use super::llm::{CompletionOptions, LanguageModel};
use super::loader::DocumentPage;
use super::normalizer::normalize_records;
use super::prompt::build_page_messages;
use super::workflow::Workflow;
use crate::models::{PageOutcome, PageStatus, UsageSummary};

pub struct PagePromptRequest<'a> {
    pub pages: &'a [DocumentPage],
    pub workflow: &'a Workflow,
    pub custom_prompt: Option<&'a str>,
    pub options: &'a CompletionOptions,
}

#[derive(Debug, Clone, Default)]
pub struct PagePromptResult {
    pub pages: Vec<PageOutcome>,
    /// Records of the successful pages, in page order.
    pub combined: Vec<Value>,
    /// Failed pages whose model call failed in a retryable way.
    pub retryable_failures: usize,
}

impl PagePromptResult {
    pub fn failed_count(&self) -> usize {
        self.pages
            .iter()
            .filter(|p| p.status == PageStatus::Failed)
            .count()
    }

    /// Every page failed and every failure was transient.
    pub fn all_failed_retryably(&self) -> bool {
        !self.pages.is_empty()
            && self.failed_count() == self.pages.len()
            && self.retryable_failures == self.pages.len()
    }

    pub fn usage_summary(&self) -> Option<UsageSummary> {
        UsageSummary::sum(self.pages.iter().map(|p| p.usage.as_ref()))
    }
}

/// Run one model call per page, in page order.
///
/// Failures stay page-scoped: a failed call or an unusable reply marks that
/// page failed and processing moves on.
pub fn run_page_prompts(model: &dyn LanguageModel, request: &PagePromptRequest<'_>) -> PagePromptResult {
    let mut result = PagePromptResult::default();

    for page in request.pages {
        let messages = build_page_messages(page, request.workflow, request.custom_prompt);

        let completion = match model.complete(&messages, request.options) {
            Ok(completion) => completion,
            Err(failure) => {
                tracing::warn!(
                    page = page.page_number,
                    status = ?failure.status(),
                    retryable = failure.is_retryable(),
                    "Page prompt failed"
                );
                if failure.is_retryable() {
                    result.retryable_failures += 1;
                }
                result.pages.push(PageOutcome {
                    page_number: page.page_number,
                    status: PageStatus::Failed,
                    status_code: failure.status(),
                    entries: Vec::new(),
                    raw_response: None,
                    warnings: Vec::new(),
                    error: Some(failure.to_string()),
                    usage: None,
                });
                continue;
            }
        };

        let outcome = match normalize_records(&completion.output, page.page_number) {
            Ok(normalized) => {
                result.combined.extend(normalized.records.iter().cloned());
                PageOutcome {
                    page_number: page.page_number,
                    status: PageStatus::Succeeded,
                    status_code: None,
                    entries: normalized.records,
                    raw_response: Some(completion.output),
                    warnings: normalized.warnings,
                    error: None,
                    usage: completion.usage,
                }
            }
            Err(failure) => {
                tracing::debug!(page = page.page_number, error = %failure.error, "Page reply unusable");
                PageOutcome {
                    page_number: page.page_number,
                    status: PageStatus::Failed,
                    status_code: None,
                    entries: Vec::new(),
                    raw_response: Some(completion.output),
                    warnings: failure.warnings,
                    error: Some(failure.error),
                    usage: completion.usage,
                }
            }
        };
        result.pages.push(outcome);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::mock::{http_failure, text, ScriptedModel};
    use crate::pipeline::llm::{Completion, CompletionFailure};
    use crate::pipeline::workflow;
    use serde_json::Map;

    fn pages(count: u32) -> Vec<DocumentPage> {
        (1..=count)
            .map(|n| DocumentPage {
                page_number: n,
                text_content: Some(format!("page {n}")),
                images: Vec::new(),
                metadata: Map::new(),
            })
            .collect()
    }

    fn run(model: &ScriptedModel, pages: &[DocumentPage]) -> PagePromptResult {
        let options = CompletionOptions::default();
        run_page_prompts(
            model,
            &PagePromptRequest {
                pages,
                workflow: workflow::resolve(None),
                custom_prompt: None,
                options: &options,
            },
        )
    }

    #[test]
    fn mixed_outcomes_are_page_scoped() {
        let model = ScriptedModel::new(vec![
            Ok(text(r#"{"records": [{"page": 1}, {"page": 1}]}"#)),
            Err(http_failure(400)),
            Ok(text("not json")),
        ]);
        let result = run(&model, &pages(3));

        assert_eq!(model.call_count(), 3);
        assert_eq!(result.combined.len(), 2);
        assert_eq!(result.failed_count(), 2);
        assert_eq!(result.pages[1].status_code, Some(400));
        assert_eq!(result.pages[2].raw_response.as_deref(), Some("not json"));
        assert!(!result.all_failed_retryably());
    }

    #[test]
    fn all_transient_failures_escalate() {
        let model = ScriptedModel::new(vec![
            Err(http_failure(500)),
            Err(http_failure(429)),
            Err(CompletionFailure::Transport("Request timed out after 120s".into())),
        ]);
        assert!(run(&model, &pages(3)).all_failed_retryably());
    }

    #[test]
    fn one_permanent_failure_prevents_escalation() {
        let model = ScriptedModel::new(vec![Err(http_failure(500)), Err(http_failure(401))]);
        let result = run(&model, &pages(2));
        assert_eq!(result.failed_count(), 2);
        assert!(!result.all_failed_retryably());
    }

    #[test]
    fn usage_is_summed_over_reporting_pages() {
        let with_usage = |tokens| {
            Ok(Completion {
                output: r#"[{"page": 1}]"#.into(),
                usage: Some(UsageSummary {
                    total_tokens: Some(tokens),
                    ..Default::default()
                }),
            })
        };
        let model = ScriptedModel::new(vec![with_usage(10), Ok(text(r#"[{"page": 2}]"#)), with_usage(5)]);
        let result = run(&model, &pages(3));
        assert_eq!(result.usage_summary().unwrap().total_tokens, Some(15));
    }

    #[test]
    fn no_usage_means_no_summary() {
        let model = ScriptedModel::always(r#"[{"page": 1}]"#);
        assert!(run(&model, &pages(1)).usage_summary().is_none());
    }
}
