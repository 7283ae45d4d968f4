//! Chat-completion backed rewriting (OpenAI-compatible endpoints).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Result, RewriteError, RewriteRequest, TextRewriter};

/// Requests closer to 1.0 than this are returned unchanged without a call.
const MIN_CHANGE: f64 = 0.02;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Kept low so repeated requests give stable lengths.
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 500,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

fn language_name(code: &str) -> &str {
    match code.split(['-', '_']).next().unwrap_or(code) {
        "en" => "English",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "ja" => "Japanese",
        "ko" => "Korean",
        "zh" => "Chinese",
        "pt" => "Portuguese",
        "it" => "Italian",
        other => other,
    }
}

fn build_messages(request: &RewriteRequest<'_>) -> Vec<ChatMessage> {
    let language = language_name(request.language);
    let change = request.percent_change();
    let direction = if change < 0 { "shorter" } else { "longer" };
    let system = format!(
        "You are a {language} dubbing editor. You adjust the length of translated lines \
         so they fit their on-screen time. Keep the meaning and register. \
         Reply with the rewritten line only, without quotes or explanations."
    );
    let user = format!(
        "Make this line about {}% {direction} when spoken aloud:\n{}",
        change.abs(),
        request.text
    );
    vec![
        ChatMessage {
            role: "system".into(),
            content: system,
        },
        ChatMessage {
            role: "user".into(),
            content: user,
        },
    ]
}

/// Strip whitespace and one layer of wrapping quotes.
fn clean_reply(reply: &str) -> String {
    let trimmed = reply.trim();
    let pairs = [('"', '"'), ('\'', '\''), ('“', '”'), ('«', '»'), ('「', '」')];
    for (open, close) in pairs {
        if let Some(inner) = trimmed
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

pub struct LlmRewriter {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: String,
}

impl LlmRewriter {
    pub fn new(config: LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| RewriteError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            config,
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl TextRewriter for LlmRewriter {
    async fn rewrite(&self, request: &RewriteRequest<'_>) -> Result<String> {
        if (request.target_length_factor - 1.0).abs() < MIN_CHANGE {
            return Ok(request.text.to_string());
        }

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = ChatRequest {
            model: &self.config.model,
            messages: build_messages(request),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RewriteError::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(RewriteError::Unavailable(resp.status().to_string()));
        }

        let parsed = resp
            .json::<ChatResponse>()
            .await
            .map_err(|e| RewriteError::Unavailable(e.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| clean_reply(&c.message.content))
            .filter(|t| !t.is_empty())
            .ok_or(RewriteError::EmptyResult)?;

        tracing::debug!(
            model = %self.config.model,
            change = request.percent_change(),
            from = request.text.chars().count(),
            to = text.chars().count(),
            "llm_rewrite"
        );
        Ok(text)
    }

    fn name(&self) -> &str {
        "llm"
    }
}
