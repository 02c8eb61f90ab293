//! Language model seam.
//!
//! The pipeline talks to a chat-completions style model through the
//! `LanguageModel` trait. Calls are blocking; the executor runs on a
//! blocking worker thread.

#[cfg(test)]
pub mod mock;
pub mod openrouter;

use serde::Serialize;
use thiserror::Error;

use crate::models::UsageSummary;

/// HTTP statuses worth retrying the whole run for.
pub const RETRYABLE_HTTP_STATUSES: [u16; 8] = [408, 409, 425, 429, 500, 502, 503, 504];

pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_HTTP_STATUSES.contains(&status)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// All text segments joined; image parts are skipped.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: ChatRole::User,
            content: MessageContent::Parts(parts),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON object response.
    pub json_response: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub output: String,
    pub usage: Option<UsageSummary>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompletionFailure {
    #[error("{0}")]
    Configuration(String),

    #[error("{message}")]
    Http { status: u16, message: String },

    /// Connect errors and timeouts: no status, but worth retrying.
    #[error("{0}")]
    Transport(String),

    #[error("{0}")]
    InvalidResponse(String),
}

impl CompletionFailure {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => is_retryable_status(*status),
            Self::Transport(_) => true,
            Self::Configuration(_) | Self::InvalidResponse(_) => false,
        }
    }
}

pub trait LanguageModel: Send + Sync {
    fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<Completion, CompletionFailure>;
}
