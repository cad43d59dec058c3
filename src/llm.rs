//! Generation capability boundary.
//!
//! The assistant treats text generation as an opaque service behind the
//! [`Generator`] trait: a composed prompt goes in, text comes out, failures
//! are typed. [`HttpGenerator`] talks to any OpenAI-compatible chat
//! completions endpoint; [`MockGenerator`] serves tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::error::LlmError;

/// Per-call output bounds.
#[derive(Debug, Clone, Copy)]
pub struct GenerateOptions {
    pub temperature: f64,
    pub max_output_tokens: u32,
}

impl From<&GenerationConfig> for GenerateOptions {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        }
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce text for a fully composed prompt.
    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<String, LlmError>;
}

// ============ OpenAI-compatible HTTP implementation ============

#[derive(Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<CompletionMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize)]
struct CompletionMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

pub struct HttpGenerator {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpGenerator {
    /// Build from configuration. The API key, if any, comes from the
    /// environment variable named in `config.api_key_env`; endpoints that
    /// need no key (local runtimes) work without one.
    pub fn new(config: &GenerationConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("docpilot/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<String, LlmError> {
        let body = CompletionRequest {
            model: self.model.clone(),
            messages: vec![CompletionMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: opts.temperature,
            max_tokens: opts.max_output_tokens,
        };

        let mut req = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let data: CompletionResponse = resp.json().await?;
        let content = data
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(content)
    }
}

// ============ Mock implementation for tests ============

/// Deterministic generator used by tests and `--dry-run` style checks.
pub struct MockGenerator {
    reply: String,
    fail: bool,
}

impl MockGenerator {
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: String::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, _prompt: &str, _opts: &GenerateOptions) -> Result<String, LlmError> {
        if self.fail {
            return Err(LlmError::Api {
                status: 503,
                message: "mock generator configured to fail".to_string(),
            });
        }
        Ok(self.reply.clone())
    }
}
