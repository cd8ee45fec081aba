//! Ollama chat client

use super::{
    extract_json_object, ChatModel, ChatOutput, ChatRequest, LlmConfig, LlmError, ResponseFormat,
};
use crate::context::models::Turn;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

/// Client for Ollama's `/api/chat` endpoint
pub struct OllamaClient {
    http: Client,
    config: LlmConfig,
}

impl OllamaClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LlmError::InitializationError(e.to_string()))?;

        Ok(Self { http, config })
    }

    /// Parsing adapter for this backend
    fn parse_response(
        response: OllamaChatResponse,
        format: &ResponseFormat,
    ) -> Result<ChatOutput, LlmError> {
        let content = response.message.content;
        match format {
            ResponseFormat::Text => Ok(ChatOutput::Text(content)),
            ResponseFormat::Json { .. } => {
                Ok(ChatOutput::Structured(extract_json_object(&content)?))
            }
        }
    }
}

#[async_trait]
impl ChatModel for OllamaClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatOutput, LlmError> {
        let url = format!("{}/api/chat", self.config.endpoint.trim_end_matches('/'));
        let body = OllamaChatRequest {
            model: &self.config.model,
            messages: &request.messages,
            stream: false,
            // a schema constrains the output; bare "json" only asks for an object
            format: match &request.format {
                ResponseFormat::Text => None,
                ResponseFormat::Json { schema: None } => Some(json!("json")),
                ResponseFormat::Json { schema: Some(schema) } => Some(schema.clone()),
            },
            options: OllamaOptions {
                num_predict: request.max_tokens,
                temperature: self.config.temperature,
                top_p: self.config.top_p,
            },
        };

        debug!("Ollama chat: {} messages", request.messages.len());

        let response = self.http.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError(format!("HTTP {}: {}", status, body)));
        }

        let parsed = response
            .json::<OllamaChatResponse>()
            .await
            .map_err(|e| LlmError::ApiError(format!("Failed to parse response: {}", e)))?;

        Self::parse_response(parsed, &request.format)
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<serde_json::Value>,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<usize>,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmBackend;

    #[tokio::test]
    async fn test_json_chat() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_body(mockito::Matcher::PartialJson(json!({"stream": false, "format": "json"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "message": {
                        "role": "assistant",
                        "content": r#"{"rewritten_query": ["a", "b"]}"#
                    },
                    "done": true
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = OllamaClient::new(LlmConfig {
            backend: LlmBackend::Ollama,
            endpoint: server.url(),
            ..LlmConfig::default()
        })
        .unwrap();

        let output = client
            .complete(ChatRequest::json(vec![Turn::user("split this")]))
            .await
            .unwrap();

        assert_eq!(output, ChatOutput::Structured(json!({"rewritten_query": ["a", "b"]})));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_schema_is_sent_as_format() {
        let schema = json!({
            "type": "object",
            "properties": {"rewritten_query": {"type": "array", "items": {"type": "string"}}},
            "required": ["rewritten_query"]
        });
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_body(mockito::Matcher::PartialJson(json!({"format": schema.clone()})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "message": {"role": "assistant", "content": r#"{"rewritten_query": ["a"]}"#},
                    "done": true
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = OllamaClient::new(LlmConfig {
            backend: LlmBackend::Ollama,
            endpoint: server.url(),
            ..LlmConfig::default()
        })
        .unwrap();
        let request = ChatRequest {
            format: ResponseFormat::Json { schema: Some(schema) },
            ..ChatRequest::json(vec![Turn::user("split this")])
        };

        let output = client.complete(request).await.unwrap();
        assert_eq!(output, ChatOutput::Structured(json!({"rewritten_query": ["a"]})));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_text_chat() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":{"role":"assistant","content":"plain answer"},"done":true}"#)
            .create_async()
            .await;

        let client = OllamaClient::new(LlmConfig {
            endpoint: server.url(),
            ..LlmConfig::default()
        })
        .unwrap();

        let output = client
            .complete(ChatRequest::text(vec![Turn::user("hello")]))
            .await
            .unwrap();
        assert_eq!(output, ChatOutput::Text("plain answer".to_string()));
    }
}
