//! Token safety gate.
//!
//! Estimates the token cost of a whole run before any model call and
//! rejects runs over the limit. The estimate is deliberately crude:
//! one token per four characters of whitespace-normalized text, and one
//! per four bytes of image payload.

use super::loader::DocumentPage;

pub const DEFAULT_TOKEN_LIMIT: u64 = 100_000;
pub const MIN_TOKEN_LIMIT: u64 = 1_000;
pub const MAX_TOKEN_LIMIT: u64 = 1_000_000;

pub fn clamp_token_limit(limit: u64) -> u64 {
    limit.clamp(MIN_TOKEN_LIMIT, MAX_TOKEN_LIMIT)
}

/// Project limit when set, otherwise the server default. Both clamped.
pub fn resolve_token_limit(project_limit: Option<u64>, server_default: u64) -> u64 {
    clamp_token_limit(project_limit.unwrap_or(server_default))
}

pub fn approximate_text_tokens(text: &str) -> u64 {
    let normalized_len = text
        .split_whitespace()
        .map(|word| word.chars().count())
        .sum::<usize>()
        + text.split_whitespace().count().saturating_sub(1);
    (normalized_len as u64).div_ceil(4)
}

pub fn approximate_image_tokens(payload_len: usize) -> u64 {
    (payload_len as u64).div_ceil(4)
}

pub fn estimate_run_tokens(pages: &[DocumentPage]) -> u64 {
    pages
        .iter()
        .map(|page| {
            let text = page
                .text_content
                .as_deref()
                .map(approximate_text_tokens)
                .unwrap_or(0);
            let images: u64 = page
                .images
                .iter()
                .map(|image| approximate_image_tokens(image.data.len()))
                .sum();
            text + images
        })
        .sum()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenLimitExceeded {
    pub estimate: u64,
    pub limit: u64,
}

impl TokenLimitExceeded {
    pub fn message(&self) -> String {
        format!(
            "Estimated token usage ({}) exceeds the safety limit of {}. Reduce the document size or adjust the limit before retrying.",
            self.estimate, self.limit
        )
    }
}

/// `Ok(estimate)` when the run fits under `limit`.
pub fn check_token_budget(pages: &[DocumentPage], limit: u64) -> Result<u64, TokenLimitExceeded> {
    let estimate = estimate_run_tokens(pages);
    if estimate > limit {
        return Err(TokenLimitExceeded { estimate, limit });
    }
    Ok(estimate)
}
