//! Run executor: one attempt of the pipeline for one run.
//!
//! Loader → token gate → page prompts → normalizer, then persistence and
//! outcome classification. Synchronous; the scheduler calls it from a
//! blocking worker thread.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use super::llm::openrouter::{DEFAULT_MODEL, DEFAULT_TEMPERATURE};
use super::llm::{CompletionOptions, LanguageModel};
use super::loader::{DocumentLoader, SourceFile};
use super::page_executor::{run_page_prompts, PagePromptRequest};
use super::scheduler::RunProcessor;
use super::token_gate::{check_token_budget, resolve_token_limit, DEFAULT_TOKEN_LIMIT};
use super::workflow;
use crate::db::{
    begin_attempt, complete_run, get_project, get_project_file, get_run, get_run_status,
    insert_event, replace_run_pages, requeue_run, Database, DatabaseError, RunCompletion,
};
use crate::models::{EventLevel, PageStatus, ProcessingRun, Project, ProjectFile, RunStatus};
use crate::storage::FileStorage;

pub const ALL_PAGES_RETRYABLE: &str =
    "OpenRouter returned retryable errors for every page in this run.";

/// How an attempt ended when it did not finish the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// Transient. The run is back in `pending` awaiting a retry.
    #[error("{0}")]
    Retryable(String),

    /// The run is `failed` (or gone).
    #[error("{0}")]
    Fatal(String),
}

impl RunError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A terminal status was written.
    Finished(RunStatus),
    /// Nothing was written because the run was no longer active.
    Skipped(Option<RunStatus>),
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Token limit for projects without one of their own.
    pub default_token_limit: u64,
    pub default_model: String,
    pub default_temperature: f64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            default_token_limit: DEFAULT_TOKEN_LIMIT,
            default_model: DEFAULT_MODEL.to_string(),
            default_temperature: DEFAULT_TEMPERATURE,
        }
    }
}

pub struct RunExecutor {
    db: Arc<Database>,
    storage: Arc<dyn FileStorage>,
    loader: Arc<DocumentLoader>,
    model: Arc<dyn LanguageModel>,
    settings: ExecutorSettings,
}

fn unexpected(err: DatabaseError) -> RunError {
    tracing::error!(error = %err, "Unexpected error while executing the processing run");
    RunError::Fatal(format!(
        "Unexpected error while executing the processing run: {err}"
    ))
}

impl RunExecutor {
    pub fn new(
        db: Arc<Database>,
        storage: Arc<dyn FileStorage>,
        loader: Arc<DocumentLoader>,
        model: Arc<dyn LanguageModel>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            db,
            storage,
            loader,
            model,
            settings,
        }
    }

    /// Execute one attempt of `run_id`.
    ///
    /// On `Err(Retryable)` the run has been returned to `pending`; on
    /// `Err(Fatal)` it has been marked `failed` where it still exists.
    /// An invocation that finds the run inactive writes nothing, so it is
    /// not counted in `attempts`.
    pub fn execute(&self, run_id: &Uuid) -> Result<RunOutcome, RunError> {
        let run = self
            .db
            .with_conn(|conn| get_run(conn, run_id))
            .map_err(unexpected)?
            .ok_or_else(|| RunError::Fatal("Processing run was not found".into()))?;

        if !run.status.is_active() {
            self.log_skip(run_id, Some(run.status));
            return Ok(RunOutcome::Skipped(Some(run.status)));
        }

        let context = self.db.with_conn(|conn| {
            Ok((
                get_project(conn, &run.project_id)?,
                get_project_file(conn, &run.project_id, &run.file_id)?,
            ))
        });
        let (project, file) = match context {
            Ok((Some(project), Some(file))) => (project, file),
            Ok((None, _)) => {
                return Err(self.fail(
                    run_id,
                    "Project was removed before processing could complete".into(),
                ))
            }
            Ok((Some(_), None)) => {
                return Err(self.fail(
                    run_id,
                    "Project file was removed before processing could complete".into(),
                ))
            }
            Err(e) => return Err(self.fail_unexpected(run_id, e)),
        };

        let attempt = match self.db.with_conn(|conn| begin_attempt(conn, run_id)) {
            Ok(Some(attempt)) => attempt,
            Ok(None) => {
                let status = self
                    .db
                    .with_conn(|conn| get_run_status(conn, run_id))
                    .ok()
                    .flatten();
                self.log_skip(run_id, status);
                return Ok(RunOutcome::Skipped(status));
            }
            Err(e) => return Err(self.fail_unexpected(run_id, e)),
        };

        tracing::info!(run_id = %run_id, attempt, "Processing attempt started");
        self.log_event(
            run_id,
            EventLevel::Info,
            "Processing attempt started",
            Some(json!({ "attempt": attempt })),
        );

        match self.run_attempt(&run, &project, &file) {
            Ok(outcome) => Ok(outcome),
            Err(RunError::Retryable(reason)) => {
                tracing::warn!(run_id = %run_id, attempt, reason = %reason, "Retryable run failure");
                self.log_event(
                    run_id,
                    EventLevel::Warn,
                    &reason,
                    Some(json!({ "attempt": attempt, "retryable": true })),
                );
                if let Err(e) = self.db.with_conn(|conn| requeue_run(conn, run_id)) {
                    return Err(self.fail_unexpected(run_id, e));
                }
                Err(RunError::Retryable(reason))
            }
            Err(RunError::Fatal(reason)) => Err(self.fail(run_id, reason)),
        }
    }

    fn run_attempt(
        &self,
        run: &ProcessingRun,
        project: &Project,
        file: &ProjectFile,
    ) -> Result<RunOutcome, RunError> {
        let bytes = self
            .storage
            .read_bytes(&file.storage_path)
            .map_err(|e| RunError::Fatal(format!("Unable to read stored file: {e}")))?
            .ok_or_else(|| RunError::Fatal("Stored file is no longer available".into()))?;

        let source = SourceFile {
            bytes: &bytes,
            original_name: &file.original_name,
            content_type: file.content_type.as_deref(),
        };
        let loaded = self
            .loader
            .load(run.file_type.into(), &source)
            .map_err(|e| RunError::Fatal(e.to_string()))?;

        if !loaded.warnings.is_empty() {
            self.log_event(
                &run.id,
                EventLevel::Warn,
                "Document extraction produced warnings",
                Some(json!({ "warnings": loaded.warnings })),
            );
        }

        let limit = resolve_token_limit(
            Some(project.token_safety_limit).filter(|l| *l > 0),
            self.settings.default_token_limit,
        );
        if let Err(exceeded) = check_token_budget(&loaded.pages, limit) {
            let message = exceeded.message();
            tracing::warn!(run_id = %run.id, estimate = exceeded.estimate, limit, "Token safety limit exceeded");
            self.log_event(&run.id, EventLevel::Warn, &message, None);
            let applied = self
                .db
                .with_conn(|conn| {
                    complete_run(
                        conn,
                        &run.id,
                        &RunCompletion {
                            status: RunStatus::Failed,
                            error: Some(&message),
                            warnings: &loaded.warnings,
                            aggregated_output: None,
                            usage_summary: None,
                        },
                    )
                })
                .map_err(unexpected)?;
            return Ok(if applied {
                RunOutcome::Finished(RunStatus::Failed)
            } else {
                RunOutcome::Skipped(None)
            });
        }

        let workflow = workflow::resolve(Some(&run.instruction_set));
        let options = CompletionOptions {
            model: Some(
                run.model
                    .clone()
                    .unwrap_or_else(|| self.settings.default_model.clone()),
            ),
            temperature: Some(run.temperature.unwrap_or(self.settings.default_temperature)),
            max_tokens: None,
            json_response: true,
        };
        let result = run_page_prompts(
            self.model.as_ref(),
            &PagePromptRequest {
                pages: &loaded.pages,
                workflow,
                custom_prompt: run
                    .custom_prompt
                    .as_deref()
                    .or(project.custom_prompt.as_deref()),
                options: &options,
            },
        );

        if result.all_failed_retryably() {
            return Err(RunError::Retryable(ALL_PAGES_RETRYABLE.into()));
        }

        let failed = result.failed_count();
        let mut warnings = loaded.warnings;
        if failed > 0 {
            warnings.push(format!("{failed} page(s) failed during processing."));
        }
        let status = if failed == 0 {
            RunStatus::Succeeded
        } else if failed < result.pages.len() {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Failed
        };
        let error = (status == RunStatus::Failed)
            .then(|| {
                result
                    .pages
                    .iter()
                    .find(|p| p.status == PageStatus::Failed)
                    .and_then(|p| {
                        p.error
                            .as_ref()
                            .map(|e| format!("Page {}: {e}", p.page_number))
                    })
            })
            .flatten();
        let output = Value::Array(result.combined.clone());
        let usage = result.usage_summary();

        // Status check and writes share one lock hold so a cancellation
        // cannot interleave.
        let persisted = self
            .db
            .with_conn(|conn| {
                let current = get_run_status(conn, &run.id)?;
                if current != Some(RunStatus::Running) {
                    return Ok(Err(current));
                }
                replace_run_pages(conn, &run.id, &result.pages)?;
                complete_run(
                    conn,
                    &run.id,
                    &RunCompletion {
                        status,
                        error: error.as_deref(),
                        warnings: &warnings,
                        aggregated_output: Some(&output),
                        usage_summary: usage.as_ref(),
                    },
                )?;
                Ok(Ok(()))
            })
            .map_err(unexpected)?;

        if let Err(current) = persisted {
            tracing::info!(run_id = %run.id, status = ?current, "Discarding results of inactive run");
            self.log_event(
                &run.id,
                EventLevel::Info,
                &format!(
                    "Discarding results because run status is {}.",
                    current.map(|s| s.as_str()).unwrap_or("unknown")
                ),
                None,
            );
            return Ok(RunOutcome::Skipped(current));
        }

        tracing::info!(
            run_id = %run.id,
            status = %status,
            pages = result.pages.len(),
            failed,
            records = result.combined.len(),
            "Processing run completed"
        );
        self.log_event(
            &run.id,
            if failed > 0 {
                EventLevel::Warn
            } else {
                EventLevel::Info
            },
            "Processing run completed",
            Some(json!({ "status": status, "warnings": warnings, "summary": usage })),
        );
        Ok(RunOutcome::Finished(status))
    }

    /// Retries exhausted: mark the run failed with the last reason.
    pub fn give_up(&self, run_id: &Uuid, attempts: u32, reason: &str) {
        tracing::warn!(run_id = %run_id, attempts, reason, "Max retry attempts reached");
        let message = format!("Max retry attempts reached: {reason}");
        self.write_failure(run_id, &message);
        self.log_event(
            run_id,
            EventLevel::Error,
            "Max retry attempts reached",
            Some(json!({ "attempts": attempts, "reason": reason })),
        );
    }

    /// `next_attempt` is the attempt number the retry will run as.
    pub fn record_retry(&self, run_id: &Uuid, next_attempt: u32, delay: Duration, reason: &str) {
        let delay_ms = delay.as_millis() as u64;
        self.log_event(
            run_id,
            EventLevel::Warn,
            &format!("Retrying in {} seconds", (delay_ms + 500) / 1000),
            Some(json!({ "attempt": next_attempt, "delayMs": delay_ms, "reason": reason })),
        );
    }

    /// Fail closed after an error nothing classified.
    pub fn fail_closed(&self, run_id: &Uuid, message: &str) {
        tracing::error!(run_id = %run_id, message, "Processing run failed unexpectedly");
        self.write_failure(run_id, message);
        self.log_event(run_id, EventLevel::Error, message, None);
    }

    fn fail(&self, run_id: &Uuid, reason: String) -> RunError {
        tracing::warn!(run_id = %run_id, reason = %reason, "Processing run failed");
        self.write_failure(run_id, &reason);
        self.log_event(run_id, EventLevel::Error, &reason, None);
        RunError::Fatal(reason)
    }

    fn fail_unexpected(&self, run_id: &Uuid, err: DatabaseError) -> RunError {
        match unexpected(err) {
            RunError::Fatal(reason) | RunError::Retryable(reason) => self.fail(run_id, reason),
        }
    }

    fn write_failure(&self, run_id: &Uuid, message: &str) {
        let result = self.db.with_conn(|conn| {
            complete_run(
                conn,
                run_id,
                &RunCompletion {
                    status: RunStatus::Failed,
                    error: Some(message),
                    warnings: &[],
                    aggregated_output: None,
                    usage_summary: None,
                },
            )
        });
        if let Err(e) = result {
            tracing::error!(run_id = %run_id, error = %e, "Failed to mark run as failed");
        }
    }

    fn log_skip(&self, run_id: &Uuid, status: Option<RunStatus>) {
        let status = status.map(|s| s.as_str()).unwrap_or("unknown");
        tracing::info!(run_id = %run_id, status, "Skipping inactive run");
        self.log_event(
            run_id,
            EventLevel::Info,
            &format!("Skipping run because status is {status}."),
            None,
        );
    }

    fn log_event(&self, run_id: &Uuid, level: EventLevel, message: &str, context: Option<Value>) {
        let result = self
            .db
            .with_conn(|conn| insert_event(conn, run_id, level, message, context.as_ref()));
        if let Err(e) = result {
            tracing::warn!(run_id = %run_id, error = %e, "Failed to record run event");
        }
    }
}

impl RunProcessor for RunExecutor {
    fn process(&self, run_id: &Uuid) -> Result<(), RunError> {
        self.execute(run_id).map(|_| ())
    }

    fn on_retry_scheduled(&self, run_id: &Uuid, next_attempt: u32, delay: Duration, reason: &str) {
        self.record_retry(run_id, next_attempt, delay, reason);
    }

    fn on_attempts_exhausted(&self, run_id: &Uuid, attempts: u32, reason: &str) {
        self.give_up(run_id, attempts, reason);
    }

    fn on_crash(&self, run_id: &Uuid, message: &str) {
        self.fail_closed(run_id, message);
    }
}
