use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::llm::openrouter::{self, OpenRouterConfig};
use crate::pipeline::loader::{self, pdf, LoaderLimits};
use crate::pipeline::scheduler::{self, SchedulerConfig};
use crate::pipeline::token_gate;

/// Application-level constants
pub const APP_NAME: &str = "docflow";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3400";
pub const DEFAULT_STORAGE_ROOT: &str = "./uploads";

pub const MIN_RETRY_BASE_MS: u64 = 500;
pub const MAX_RENDER_DPI: u32 = 600;

/// Per-user data directory, falling back to the working directory when the
/// platform has none.
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

pub fn default_database_path() -> PathBuf {
    app_data_dir().join("docflow.db")
}

/// Fallback filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "docflow=info,tower_http=warn"
}

// ═══════════════════════════════════════════════════════════
// Settings
// ═══════════════════════════════════════════════════════════

/// Everything the process reads from its environment, resolved once at
/// startup. Out-of-range values are clamped rather than rejected.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub database_path: PathBuf,
    pub bind_addr: String,
    pub storage_root: PathBuf,
    pub openrouter: OpenRouterConfig,
    pub scheduler: SchedulerConfig,
    pub loader: LoaderLimits,
    pub max_tokens_per_run: u64,
}

impl PipelineSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let number = |key: &str| text(key).and_then(|v| v.parse::<u64>().ok());

        let base_ms = number("OPENROUTER_RETRY_BASE_MS")
            .unwrap_or(scheduler::DEFAULT_BASE_DELAY.as_millis() as u64)
            .max(MIN_RETRY_BASE_MS);
        let max_ms = number("OPENROUTER_RETRY_MAX_MS")
            .unwrap_or(scheduler::DEFAULT_MAX_DELAY.as_millis() as u64)
            .max(base_ms);

        let temperature = text("OPENROUTER_TEMPERATURE")
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|t| t.is_finite())
            .map(|t| t.clamp(0.0, 2.0))
            .unwrap_or(openrouter::DEFAULT_TEMPERATURE);

        Self {
            database_path: text("DOCFLOW_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_database_path),
            bind_addr: text("DOCFLOW_BIND").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            storage_root: PathBuf::from(
                text("FILE_STORAGE_ROOT").unwrap_or_else(|| DEFAULT_STORAGE_ROOT.to_string()),
            ),
            openrouter: OpenRouterConfig {
                api_key: text("OPENROUTER_API_KEY"),
                api_url: text("OPENROUTER_API_URL")
                    .unwrap_or_else(|| openrouter::DEFAULT_API_URL.to_string()),
                default_model: text("OPENROUTER_MODEL")
                    .unwrap_or_else(|| openrouter::DEFAULT_MODEL.to_string()),
                default_temperature: temperature,
                site_url: text("OPENROUTER_SITE_URL"),
                app_name: text("OPENROUTER_APP_NAME"),
                timeout_secs: number("OPENROUTER_TIMEOUT_SECS")
                    .unwrap_or(openrouter::DEFAULT_TIMEOUT_SECS)
                    .max(1),
            },
            scheduler: SchedulerConfig {
                concurrency: number("OPENROUTER_CONCURRENCY")
                    .map(|n| n as usize)
                    .unwrap_or(scheduler::DEFAULT_CONCURRENCY)
                    .max(1),
                max_attempts: number("OPENROUTER_MAX_ATTEMPTS")
                    .map(|n| n.min(u32::MAX as u64) as u32)
                    .unwrap_or(scheduler::DEFAULT_MAX_ATTEMPTS)
                    .max(1),
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_ms),
            },
            loader: LoaderLimits {
                max_pages: number("OPENROUTER_MAX_PAGES_PER_RUN")
                    .map(|n| n as usize)
                    .unwrap_or(loader::DEFAULT_MAX_PAGES_PER_RUN)
                    .max(1),
                max_page_chars: number("OPENROUTER_MAX_PAGE_CHARS")
                    .map(|n| n as usize)
                    .unwrap_or(loader::DEFAULT_MAX_PAGE_CHARS)
                    .max(loader::MIN_PAGE_CHARS),
                render_dpi: number("OPENROUTER_PDF_RENDER_DPI")
                    .map(|n| n.min(MAX_RENDER_DPI as u64) as u32)
                    .unwrap_or(pdf::DEFAULT_RENDER_DPI)
                    .max(1),
            },
            max_tokens_per_run: token_gate::clamp_token_limit(
                number("OPENROUTER_MAX_TOKENS_PER_RUN").unwrap_or(token_gate::DEFAULT_TOKEN_LIMIT),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> PipelineSettings {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineSettings::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn app_data_dir_is_named_after_app() {
        assert!(app_data_dir().ends_with("docflow"));
        assert!(default_database_path().starts_with(app_data_dir()));
    }

    #[test]
    fn defaults_without_environment() {
        let s = settings(&[]);
        assert_eq!(s.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(s.storage_root, PathBuf::from("./uploads"));
        assert!(s.openrouter.api_key.is_none());
        assert_eq!(s.openrouter.default_model, "google/gemini-2.5-flash");
        assert_eq!(s.openrouter.default_temperature, 0.2);
        assert_eq!(s.openrouter.timeout_secs, 120);
        assert_eq!(s.scheduler.concurrency, 2);
        assert_eq!(s.scheduler.max_attempts, 3);
        assert_eq!(s.scheduler.base_delay, Duration::from_millis(2_000));
        assert_eq!(s.scheduler.max_delay, Duration::from_millis(60_000));
        assert_eq!(s.loader, LoaderLimits::default());
        assert_eq!(s.max_tokens_per_run, 100_000);
    }

    #[test]
    fn values_are_clamped() {
        let s = settings(&[
            ("OPENROUTER_CONCURRENCY", "0"),
            ("OPENROUTER_MAX_ATTEMPTS", "0"),
            ("OPENROUTER_RETRY_BASE_MS", "10"),
            ("OPENROUTER_RETRY_MAX_MS", "100"),
            ("OPENROUTER_MAX_PAGE_CHARS", "20"),
            ("OPENROUTER_MAX_TOKENS_PER_RUN", "5"),
            ("OPENROUTER_TEMPERATURE", "9"),
        ]);
        assert_eq!(s.scheduler.concurrency, 1);
        assert_eq!(s.scheduler.max_attempts, 1);
        assert_eq!(s.scheduler.base_delay, Duration::from_millis(500));
        assert_eq!(s.scheduler.max_delay, Duration::from_millis(500));
        assert_eq!(s.loader.max_page_chars, 500);
        assert_eq!(s.max_tokens_per_run, token_gate::MIN_TOKEN_LIMIT);
        assert_eq!(s.openrouter.default_temperature, 2.0);
    }

    #[test]
    fn explicit_values_and_garbage() {
        let s = settings(&[
            ("OPENROUTER_API_KEY", "  sk-test  "),
            ("OPENROUTER_MODEL", "openai/gpt-4o-mini"),
            ("OPENROUTER_MAX_PAGES_PER_RUN", "12"),
            ("OPENROUTER_CONCURRENCY", "lots"),
            ("DOCFLOW_DB_PATH", "/tmp/x.db"),
            ("OPENROUTER_SITE_URL", ""),
        ]);
        assert_eq!(s.openrouter.api_key.as_deref(), Some("sk-test"));
        assert_eq!(s.openrouter.default_model, "openai/gpt-4o-mini");
        assert_eq!(s.loader.max_pages, 12);
        assert_eq!(s.scheduler.concurrency, 2);
        assert_eq!(s.database_path, PathBuf::from("/tmp/x.db"));
        assert!(s.openrouter.site_url.is_none());
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, env!("CARGO_PKG_VERSION"));
    }
}
