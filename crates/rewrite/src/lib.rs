//! Text length adjustment.
//!
//! A [`TextRewriter`] shortens or lengthens a translated line so it can be
//! spoken inside its window. Rewriting is best-effort: implementations may
//! return the input unchanged, and callers keep the original text on error.

mod heuristic;
mod llm;

pub use heuristic::{HeuristicRewriter, MAX_REDUCTION};
pub use llm::{LlmConfig, LlmRewriter};

use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("rewrite service unavailable: {0}")]
    Unavailable(String),

    #[error("rewrite returned no usable text")]
    EmptyResult,
}

pub type Result<T> = std::result::Result<T, RewriteError>;

#[derive(Debug, Clone, PartialEq)]
pub struct RewriteRequest<'a> {
    pub text: &'a str,
    /// ISO 639-1 code of `text`.
    pub language: &'a str,
    /// Desired length relative to the input: `0.8` asks for 20% shorter.
    pub target_length_factor: f64,
}

impl RewriteRequest<'_> {
    /// Signed percent change asked for (negative = shorter).
    pub fn percent_change(&self) -> i32 {
        ((self.target_length_factor - 1.0) * 100.0).round() as i32
    }
}

#[async_trait]
pub trait TextRewriter: Send + Sync {
    async fn rewrite(&self, request: &RewriteRequest<'_>) -> Result<String>;

    fn name(&self) -> &str;
}

/// Leaves text untouched.
pub struct NoopRewriter;

#[async_trait]
impl TextRewriter for NoopRewriter {
    async fn rewrite(&self, request: &RewriteRequest<'_>) -> Result<String> {
        Ok(request.text.to_string())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// Tries `primary`, falling back to `secondary` when it errors.
pub struct FallbackRewriter {
    primary: Arc<dyn TextRewriter>,
    secondary: Arc<dyn TextRewriter>,
}

impl FallbackRewriter {
    pub fn new(primary: Arc<dyn TextRewriter>, secondary: Arc<dyn TextRewriter>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl TextRewriter for FallbackRewriter {
    async fn rewrite(&self, request: &RewriteRequest<'_>) -> Result<String> {
        match self.primary.rewrite(request).await {
            Ok(text) => Ok(text),
            Err(e) => {
                tracing::warn!(
                    primary = self.primary.name(),
                    secondary = self.secondary.name(),
                    error = %e,
                    "rewrite_fallback"
                );
                self.secondary.rewrite(request).await
            }
        }
    }

    fn name(&self) -> &str {
        "fallback"
    }
}
