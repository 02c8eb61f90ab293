use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::{ChatMessage, Completion, CompletionFailure, CompletionOptions, LanguageModel};
use crate::models::UsageSummary;

pub const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "google/gemini-2.5-flash";
pub const DEFAULT_TEMPERATURE: f64 = 0.2;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

const MISSING_KEY: &str =
    "Missing OpenRouter API key. Set OPENROUTER_API_KEY in the environment before running prompts.";

#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub default_model: String,
    pub default_temperature: f64,
    /// Sent as `HTTP-Referer` for OpenRouter attribution.
    pub site_url: Option<String>,
    /// Sent as `X-Title`.
    pub app_name: Option<String>,
    pub timeout_secs: u64,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            default_temperature: DEFAULT_TEMPERATURE,
            site_url: None,
            app_name: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// OpenRouter chat-completions client.
///
/// Holds a blocking reqwest client. Build and drop it outside the async
/// runtime; calls happen on blocking worker threads.
pub struct OpenRouterClient {
    config: OpenRouterConfig,
    client: reqwest::blocking::Client,
}

impl OpenRouterClient {
    pub fn new(config: OpenRouterConfig) -> Result<Self, CompletionFailure> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                CompletionFailure::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &OpenRouterConfig {
        &self.config
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key().is_some()
    }

    fn api_key(&self) -> Option<&str> {
        self.config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    stream: bool,
}

fn build_request<'a>(
    config: &'a OpenRouterConfig,
    messages: &'a [ChatMessage],
    options: &'a CompletionOptions,
) -> ChatRequest<'a> {
    ChatRequest {
        model: options
            .model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(&config.default_model),
        messages,
        temperature: options.temperature.unwrap_or(config.default_temperature),
        max_tokens: options.max_tokens,
        response_format: options
            .json_response
            .then_some(ResponseFormat { kind: "json_object" }),
        stream: false,
    }
}

/// Pull the assistant text from a chat-completions payload.
///
/// `content` may be a plain string or a list of segments carrying `text`
/// or `content`; segments are joined with newlines.
pub fn extract_message_content(payload: &Value) -> Result<String, CompletionFailure> {
    let choices = payload
        .as_object()
        .ok_or_else(|| {
            CompletionFailure::InvalidResponse("Unexpected response payload from OpenRouter".into())
        })?
        .get("choices")
        .and_then(Value::as_array)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            CompletionFailure::InvalidResponse(
                "OpenRouter response did not include any choices".into(),
            )
        })?;

    let no_content = || {
        CompletionFailure::InvalidResponse(
            "OpenRouter response did not include any message content".into(),
        )
    };

    match choices[0].get("message").and_then(|m| m.get("content")) {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Array(segments)) => {
            let joined = segments
                .iter()
                .filter_map(|segment| match segment {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(obj) => obj
                        .get("text")
                        .or_else(|| obj.get("content"))
                        .and_then(Value::as_str),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            if joined.trim().is_empty() {
                Err(no_content())
            } else {
                Ok(joined)
            }
        }
        _ => Err(no_content()),
    }
}

/// Token counts and cost from the `usage` block, when present.
pub fn parse_usage(payload: &Value) -> Option<UsageSummary> {
    let usage = payload.get("usage")?.as_object()?;
    let summary = UsageSummary {
        prompt_tokens: usage.get("prompt_tokens").and_then(Value::as_u64),
        completion_tokens: usage.get("completion_tokens").and_then(Value::as_u64),
        total_tokens: usage.get("total_tokens").and_then(Value::as_u64),
        total_cost_usd: usage
            .get("cost")
            .or_else(|| usage.get("total_cost"))
            .and_then(Value::as_f64),
    };
    (!summary.is_empty()).then_some(summary)
}

/// Error text from a failed response body, or a generic status message.
pub fn error_message(status: u16, body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        let error = v.get("error")?;
        error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .map(str::to_string)
    });
    from_json
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| format!("OpenRouter request failed with status {status}"))
}

impl LanguageModel for OpenRouterClient {
    fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<Completion, CompletionFailure> {
        let api_key = self
            .api_key()
            .ok_or_else(|| CompletionFailure::Configuration(MISSING_KEY.into()))?;

        let body = build_request(&self.config, messages, options);
        let mut request = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(api_key)
            .json(&body);
        if let Some(site) = self.config.site_url.as_deref().filter(|s| !s.is_empty()) {
            request = request.header("HTTP-Referer", site);
        }
        if let Some(title) = self.config.app_name.as_deref().filter(|s| !s.is_empty()) {
            request = request.header("X-Title", title);
        }

        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                CompletionFailure::Transport(format!(
                    "Request timed out after {}s",
                    self.config.timeout_secs
                ))
            } else if e.is_connect() {
                CompletionFailure::Transport(format!(
                    "Could not connect to OpenRouter at {}",
                    self.config.api_url
                ))
            } else {
                CompletionFailure::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "OpenRouter request failed");
            return Err(CompletionFailure::Http {
                status: status.as_u16(),
                message: error_message(status.as_u16(), &body),
            });
        }

        let payload: Value = response.json().map_err(|_| {
            CompletionFailure::InvalidResponse("Unexpected response payload from OpenRouter".into())
        })?;

        Ok(Completion {
            output: extract_message_content(&payload)?,
            usage: parse_usage(&payload),
        })
    }
}
