//! Query contextualization
//!
//! Rewrites the latest user query so it stands on its own, using the prior
//! turns of the conversation. Every failure falls back to the original query.

use crate::context::models::{Role, Turn};
use crate::llm::{ChatModel, ChatRequest, LlmError, ResponseFormat};
use crate::metrics::METRICS;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const CONTEXTUALIZE_SYSTEM_PROMPT: &str = "You rewrite a user's latest question so that \
it is fully self-contained, using the conversation history for context. \
Resolve pronouns and references such as \"this program\" to the entities they refer to. \
If the question is already self-contained, return it unchanged. \
Answer in the language of the question. \
Respond only with a JSON object of the form \
{\"contextualized_query\": \"<rewritten question>\"}.";

const OUTPUT_KEY: &str = "contextualized_query";

/// Stateless LLM call that makes a query self-contained
pub struct QueryContextualizer {
    model: Arc<dyn ChatModel>,
    system_prompt: String,
    timeout: Duration,
}

impl QueryContextualizer {
    pub fn new(model: Arc<dyn ChatModel>, timeout: Duration) -> Self {
        Self {
            model,
            system_prompt: CONTEXTUALIZE_SYSTEM_PROMPT.to_string(),
            timeout,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Contextualized query, or `query` itself when the model call fails,
    /// times out or returns output without a usable `contextualized_query`.
    pub async fn contextualize(&self, query: &str, history: &[Turn]) -> String {
        match tokio::time::timeout(self.timeout, self.request(query, history)).await {
            Ok(Ok(rewritten)) => {
                debug!("Query contextualized ({} history turns)", history.len());
                rewritten
            }
            Ok(Err(e)) => {
                warn!("Contextualization failed, using original query: {}", e);
                METRICS.record_contextualization_fallback();
                query.to_string()
            }
            Err(_) => {
                warn!("Contextualization timed out after {:?}, using original query", self.timeout);
                METRICS.record_contextualization_fallback();
                query.to_string()
            }
        }
    }

    async fn request(&self, query: &str, history: &[Turn]) -> Result<String, LlmError> {
        let messages = vec![
            Turn::system(self.system_prompt.clone()),
            Turn::user(format!("History Chat: {}\n\nQuery: {}", render_history(history), query)),
        ];
        let request = ChatRequest {
            format: ResponseFormat::Json {
                schema: Some(json!({
                    "type": "object",
                    "properties": { OUTPUT_KEY: { "type": "string" } },
                    "required": [OUTPUT_KEY]
                })),
            },
            ..ChatRequest::json(messages)
        };

        let output = self.model.complete(request).await?.into_structured()?;
        let rewritten = output
            .get(OUTPUT_KEY)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LlmError::MalformedOutput(format!("missing '{}'", OUTPUT_KEY)))?;

        Ok(rewritten.to_string())
    }
}

/// Render history as `User: ...` / `Assistant: ...` lines.
///
/// Any non-user turn is rendered as the assistant; empty history renders as "".
pub fn render_history(history: &[Turn]) -> String {
    history
        .iter()
        .map(|turn| match turn.role {
            Role::User => format!("User: {}", turn.content),
            _ => format!("Assistant: {}", turn.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
