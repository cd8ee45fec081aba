//! Language-model backends behind one chat-completion capability
//!
//! Every backend answers a [`ChatRequest`] with a [`ChatOutput`]: free text,
//! or a JSON object when the request asked for structured output. Backend
//! specific response shapes are handled by one parsing adapter per backend.

pub mod ollama;
pub mod openai;

pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

use crate::context::models::Turn;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Output shape requested from the model
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFormat {
    Text,
    /// A JSON object; `schema` is a hint embedded by backends that support it
    Json { schema: Option<serde_json::Value> },
}

/// A single chat-completion call
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Turn>,
    pub max_tokens: Option<usize>,
    pub format: ResponseFormat,
}

impl ChatRequest {
    pub fn text(messages: Vec<Turn>) -> Self {
        Self {
            messages,
            max_tokens: None,
            format: ResponseFormat::Text,
        }
    }

    pub fn json(messages: Vec<Turn>) -> Self {
        Self {
            messages,
            max_tokens: None,
            format: ResponseFormat::Json { schema: None },
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Model answer
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutput {
    Text(String),
    Structured(serde_json::Value),
}

impl ChatOutput {
    /// Text content; structured output is rendered back to JSON text
    pub fn into_text(self) -> String {
        match self {
            ChatOutput::Text(text) => text,
            ChatOutput::Structured(value) => value.to_string(),
        }
    }

    /// Structured object, parsing text output if needed
    pub fn into_structured(self) -> Result<serde_json::Value, LlmError> {
        match self {
            ChatOutput::Structured(value) => Ok(value),
            ChatOutput::Text(text) => extract_json_object(&text),
        }
    }
}

/// Chat-completion capability
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatOutput, LlmError>;
}

/// LLM errors
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Malformed output: {0}")]
    MalformedOutput(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout(e.to_string())
        } else {
            LlmError::NetworkError(e.to_string())
        }
    }
}

/// Pull the JSON object out of free text.
///
/// Models often wrap the object in prose or code fences, so everything from
/// the first `{` to the last `}` is parsed.
pub fn extract_json_object(text: &str) -> Result<serde_json::Value, LlmError> {
    let start = text
        .find('{')
        .ok_or_else(|| LlmError::MalformedOutput("no JSON object in output".to_string()))?;
    let end = text
        .rfind('}')
        .filter(|&end| end > start)
        .ok_or_else(|| LlmError::MalformedOutput("unterminated JSON object".to_string()))?;

    let value: serde_json::Value = serde_json::from_str(&text[start..=end])
        .map_err(|e| LlmError::MalformedOutput(e.to_string()))?;
    if !value.is_object() {
        return Err(LlmError::MalformedOutput("expected a JSON object".to_string()));
    }
    Ok(value)
}

/// Supported chat backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    OpenAi,
    Ollama,
}

/// Chat backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_backend")]
    pub backend: LlmBackend,

    /// Base URL, e.g. `http://localhost:8080/v1` or `http://localhost:11434`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// API key (read from env LLM_API_KEY if not set)
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

fn default_backend() -> LlmBackend { LlmBackend::OpenAi }
fn default_endpoint() -> String { "http://localhost:8080/v1".to_string() }
fn default_model() -> String { "llama-3.3-70b-specdec".to_string() }
fn default_timeout_ms() -> u64 { 30_000 }
fn default_temperature() -> f32 { 0.1 }
fn default_top_p() -> f32 { 0.9 }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            endpoint: default_endpoint(),
            api_key: None,
            model: default_model(),
            timeout_ms: default_timeout_ms(),
            temperature: default_temperature(),
            top_p: default_top_p(),
        }
    }
}

impl LlmConfig {
    /// Override selected fields from environment variables
    pub fn from_env(mut self) -> Self {
        if let Ok(val) = std::env::var("LLM_BACKEND") {
            match val.to_lowercase().as_str() {
                "openai" => self.backend = LlmBackend::OpenAi,
                "ollama" => self.backend = LlmBackend::Ollama,
                _ => {}
            }
        }

        if let Ok(val) = std::env::var("LLM_ENDPOINT") {
            self.endpoint = val;
        }

        if let Ok(val) = std::env::var("LLM_API_KEY") {
            self.api_key = Some(val);
        }

        if let Ok(val) = std::env::var("LLM_MODEL") {
            self.model = val;
        }

        if let Ok(val) = std::env::var("LLM_TIMEOUT_MS") {
            if let Ok(timeout) = val.parse() {
                self.timeout_ms = timeout;
            }
        }

        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Construct the configured backend
pub fn build_chat_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>, LlmError> {
    let model: Arc<dyn ChatModel> = match config.backend {
        LlmBackend::OpenAi => Arc::new(OpenAiClient::new(config.clone())?),
        LlmBackend::Ollama => Arc::new(OllamaClient::new(config.clone())?),
    };
    Ok(model)
}
