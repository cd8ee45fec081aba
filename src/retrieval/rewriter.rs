//! Query rewriting into self-contained sub-queries

use crate::context::models::Turn;
use crate::llm::{ChatModel, ChatRequest, LlmError, ResponseFormat};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

pub const REWRITE_SYSTEM_PROMPT: &str = "You split a user's question into its distinct \
sub-questions. Rewrite each sub-question so it is clear, self-contained and keeps the \
original meaning. Return at most 3 sub-questions; if the question has no sub-questions, \
return it unchanged as the only item. \
Answer in the language of the question. \
Respond only with a JSON object of the form \
{\"rewritten_query\": [\"<first>\", \"<second>\"]}.";

/// Upper bound on sub-queries returned per query
pub const MAX_SUB_QUERIES: usize = 3;

const OUTPUT_KEY: &str = "rewritten_query";

/// Splits a query into up to [`MAX_SUB_QUERIES`] sub-queries
pub struct QueryRewriter {
    model: Arc<dyn ChatModel>,
    system_prompt: String,
}

impl QueryRewriter {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            system_prompt: REWRITE_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Sub-queries for `query`; `[query]` on any failure
    pub async fn rewrite(&self, query: &str) -> Vec<String> {
        match self.request(query).await {
            Ok(queries) => {
                debug!("Query rewritten into {} sub-queries", queries.len());
                queries
            }
            Err(e) => {
                warn!("Query rewriting failed, using original query: {}", e);
                vec![query.to_string()]
            }
        }
    }

    async fn request(&self, query: &str) -> Result<Vec<String>, LlmError> {
        let messages = vec![Turn::system(self.system_prompt.clone()), Turn::user(query)];
        let request = ChatRequest {
            format: ResponseFormat::Json {
                schema: Some(json!({
                    "type": "object",
                    "properties": {
                        OUTPUT_KEY: {
                            "type": "array",
                            "items": { "type": "string" },
                            "maxItems": MAX_SUB_QUERIES
                        }
                    },
                    "required": [OUTPUT_KEY]
                })),
            },
            ..ChatRequest::json(messages)
        };

        let output = self.model.complete(request).await?.into_structured()?;
        let items = output
            .get(OUTPUT_KEY)
            .and_then(|v| v.as_array())
            .ok_or_else(|| LlmError::MalformedOutput(format!("missing '{}'", OUTPUT_KEY)))?;

        let queries: Vec<String> = items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .take(MAX_SUB_QUERIES)
            .map(str::to_string)
            .collect();

        if queries.is_empty() {
            return Err(LlmError::MalformedOutput("no sub-queries returned".to_string()));
        }
        Ok(queries)
    }
}
