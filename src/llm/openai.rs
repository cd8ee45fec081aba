//! OpenAI-compatible chat-completion client

use super::{
    extract_json_object, ChatModel, ChatOutput, ChatRequest, LlmConfig, LlmError, ResponseFormat,
};
use crate::context::models::Turn;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

/// Client for `/chat/completions` endpoints (OpenAI, Groq, LocalAI, vLLM)
pub struct OpenAiClient {
    http: Client,
    config: LlmConfig,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LlmError::InitializationError(e.to_string()))?;

        Ok(Self { http, config })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    /// Parsing adapter for this backend
    fn parse_response(
        response: ChatCompletionResponse,
        format: &ResponseFormat,
    ) -> Result<ChatOutput, LlmError> {
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::ApiError("No choices in response".to_string()))?;

        match format {
            ResponseFormat::Text => Ok(ChatOutput::Text(content)),
            ResponseFormat::Json { .. } => {
                Ok(ChatOutput::Structured(extract_json_object(&content)?))
            }
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatOutput, LlmError> {
        let body = ChatCompletionRequest {
            model: &self.config.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: Some(self.config.temperature),
            top_p: Some(self.config.top_p),
            response_format: response_format(&request.format),
        };

        debug!(
            "Chat completion: {} messages, max_tokens={:?}",
            request.messages.len(),
            request.max_tokens
        );

        let mut req = self.http.post(self.url()).json(&body);
        if let Some(api_key) = &self.config.api_key {
            req = req.bearer_auth(api_key);
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError(format!("HTTP {}: {}", status, body)));
        }

        let parsed = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| LlmError::ApiError(format!("Failed to parse response: {}", e)))?;

        Self::parse_response(parsed, &request.format)
    }
}

// OpenAI-compatible API types
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

/// `json_schema` when a schema is given, plain `json_object` otherwise
fn response_format(format: &ResponseFormat) -> Option<serde_json::Value> {
    match format {
        ResponseFormat::Text => None,
        ResponseFormat::Json { schema: None } => Some(json!({"type": "json_object"})),
        ResponseFormat::Json { schema: Some(schema) } => Some(json!({
            "type": "json_schema",
            "json_schema": {
                "name": "response",
                "schema": schema,
            }
        })),
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
