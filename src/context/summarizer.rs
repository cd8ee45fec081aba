//! LLM-based summarization of discarded conversation turns

use super::models::Turn;
use crate::llm::{ChatModel, ChatRequest, LlmError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub const SUMMARIZER_SYSTEM: &str = "Your task is to summarize the earlier part of a \
conversation between an AI assistant and a user. \
The messages are enclosed in triple backticks and may be incomplete. \
Messages sent by the AI are marked with the role 'assistant'; \
messages from the user carry the role 'user'. \
Summarize what happened from the AI's point of view, in the first person. \
Output only the summary, with no explanation and nothing else.";

pub const SUMMARIZER_HUMAN_TEMPLATE: &str =
    "```{input}```\nSummarize the conversation above in at most {max_tokens} tokens.";

/// Summarizer trait for different summarization strategies
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Messages sent to the model when summarizing `turns`.
    ///
    /// The buffer manager counts this rendering against the summarizer ceiling.
    fn build_prompt(
        &self,
        turns: &[Turn],
        max_tokens: usize,
    ) -> Result<Vec<Turn>, SummarizerError>;

    /// Summarize `turns` into a text of at most `max_tokens` tokens
    async fn summarize(
        &self,
        turns: &[Turn],
        max_tokens: usize,
    ) -> Result<String, SummarizerError>;
}

/// Summarizer backed by a chat model
pub struct LlmSummarizer {
    model: Arc<dyn ChatModel>,
    system_prompt: String,
    human_template: String,
}

impl LlmSummarizer {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            system_prompt: SUMMARIZER_SYSTEM.to_string(),
            human_template: SUMMARIZER_HUMAN_TEMPLATE.to_string(),
        }
    }

    /// Replace the prompts; the human template must contain `{input}`
    pub fn with_prompts(
        mut self,
        system_prompt: impl Into<String>,
        human_template: impl Into<String>,
    ) -> Self {
        self.system_prompt = system_prompt.into();
        self.human_template = human_template.into();
        self
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    fn build_prompt(
        &self,
        turns: &[Turn],
        max_tokens: usize,
    ) -> Result<Vec<Turn>, SummarizerError> {
        let history = format_history(&escape_braces(turns));
        let body = self.human_template.replace("{input}", &history);
        let max_tokens = max_tokens.to_string();
        let user = render_template(&body, &[("max_tokens", max_tokens.as_str())])?;

        Ok(vec![Turn::system(self.system_prompt.clone()), Turn::user(user)])
    }

    async fn summarize(
        &self,
        turns: &[Turn],
        max_tokens: usize,
    ) -> Result<String, SummarizerError> {
        if turns.is_empty() {
            return Ok(String::new());
        }

        debug!("Summarizing {} turns, target: {} tokens", turns.len(), max_tokens);

        let prompt = self.build_prompt(turns, max_tokens)?;
        let output = self
            .model
            .complete(ChatRequest::text(prompt).with_max_tokens(max_tokens))
            .await?;

        Ok(output.into_text().trim().to_string())
    }
}

/// Simple concatenation-based summarizer (fallback)
///
/// Keeps the newest `max_tokens` whitespace-separated words of the rendered
/// history, one word standing in for one token.
#[derive(Debug, Default)]
pub struct ConcatenationSummarizer;

#[async_trait]
impl Summarizer for ConcatenationSummarizer {
    fn build_prompt(
        &self,
        turns: &[Turn],
        _max_tokens: usize,
    ) -> Result<Vec<Turn>, SummarizerError> {
        Ok(turns.to_vec())
    }

    async fn summarize(
        &self,
        turns: &[Turn],
        max_tokens: usize,
    ) -> Result<String, SummarizerError> {
        let history = format_history(turns);
        let words: Vec<&str> = history.split_whitespace().collect();
        let start = words.len().saturating_sub(max_tokens);
        Ok(words[start..].join(" "))
    }
}

/// Double every brace so turn text cannot be read as a placeholder
pub fn escape_braces(turns: &[Turn]) -> Vec<Turn> {
    turns
        .iter()
        .map(|turn| Turn::new(turn.role, escape_text(&turn.content)))
        .collect()
}

fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '{' => escaped.push_str("{{"),
            '}' => escaped.push_str("}}"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Render turns as `role: content` lines
pub fn format_history(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|turn| format!("{}: {}", turn.role, turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Substitute `{name}` placeholders; `{{` and `}}` render as literal braces.
///
/// A brace with no matching partner is kept as-is. A placeholder that is not in
/// `vars` is an error.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> Result<String, SummarizerError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        match ch {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                out.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let tail = &template[idx + 1..];
                match tail.find(|c: char| c == '}' || c == '{') {
                    Some(end) if tail.as_bytes()[end] == b'}' => {
                        let name = &tail[..end];
                        let value = vars
                            .iter()
                            .find(|(key, _)| *key == name)
                            .map(|(_, value)| *value)
                            .ok_or_else(|| {
                                SummarizerError::Template(format!(
                                    "unknown placeholder '{{{}}}'",
                                    name
                                ))
                            })?;
                        out.push_str(value);
                        for _ in 0..=end {
                            chars.next();
                        }
                    }
                    _ => out.push('{'),
                }
            }
            other => out.push(other),
        }
    }

    Ok(out)
}

/// Summarizer errors
#[derive(Debug, thiserror::Error)]
pub enum SummarizerError {
    #[error("Template error: {0}")]
    Template(String),

    #[error("Model error: {0}")]
    Model(#[from] LlmError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatOutput;
    use std::sync::Mutex;

    struct RecordingModel {
        requests: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl ChatModel for RecordingModel {
        async fn complete(&self, request: ChatRequest) -> Result<ChatOutput, LlmError> {
            self.requests.lock().unwrap().push(request);
            Ok(ChatOutput::Text("  I greeted the user.  ".to_string()))
        }
    }

    #[test]
    fn test_escape_braces() {
        let turns = vec![Turn::user("use {name} and {x{y} but not { alone")];
        let escaped = escape_braces(&turns);
        assert_eq!(escaped[0].content, "use {{name}} and {{x{{y}} but not {{ alone");
        assert_eq!(escaped[0].role, turns[0].role);
    }

    #[test]
    fn test_format_history() {
        let turns = vec![Turn::user("hi"), Turn::assistant("hello")];
        assert_eq!(format_history(&turns), "user: hi\nassistant: hello");
    }

    #[test]
    fn test_render_template() {
        let rendered = render_template("a {x} {{b}} { c", &[("x", "1")]).unwrap();
        assert_eq!(rendered, "a 1 {b} { c");
        assert!(render_template("{missing}", &[]).is_err());
    }

    #[test]
    fn test_build_prompt_keeps_user_braces_literal() {
        let model = Arc::new(RecordingModel { requests: Mutex::new(Vec::new()) });
        let summarizer = LlmSummarizer::new(model);
        let prompt = summarizer
            .build_prompt(&[Turn::user("format is {input}")], 100)
            .unwrap();

        assert_eq!(prompt.len(), 2);
        assert_eq!(prompt[0].content, SUMMARIZER_SYSTEM);
        assert!(prompt[1].content.contains("user: format is {input}"));

        let nested = summarizer
            .build_prompt(&[Turn::user("json like {\"a\": {\"b\": 1}}")], 100)
            .unwrap();
        assert!(nested[1].content.contains("{\"a\": {\"b\": 1}}"));
        assert!(prompt[1].content.contains("at most 100 tokens"));
    }

    #[tokio::test]
    async fn test_llm_summarizer_passes_max_tokens() {
        let model = Arc::new(RecordingModel { requests: Mutex::new(Vec::new()) });
        let summarizer = LlmSummarizer::new(model.clone());

        let summary = summarizer.summarize(&[Turn::user("hello")], 42).await.unwrap();
        assert_eq!(summary, "I greeted the user.");

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].max_tokens, Some(42));
    }

    #[tokio::test]
    async fn test_empty_input_skips_model() {
        let model = Arc::new(RecordingModel { requests: Mutex::new(Vec::new()) });
        let summarizer = LlmSummarizer::new(model.clone());
        assert_eq!(summarizer.summarize(&[], 42).await.unwrap(), "");
        assert!(model.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concatenation_summarizer() {
        let summarizer = ConcatenationSummarizer;
        let turns = vec![Turn::user("Hello"), Turn::assistant("World")];
        let result = summarizer.summarize(&turns, 100).await.unwrap();
        assert_eq!(result, "user: Hello assistant: World");
    }

    #[tokio::test]
    async fn test_concatenation_summarizer_keeps_newest_words() {
        let summarizer = ConcatenationSummarizer;
        let turns = vec![
            Turn::user("one two three"),
            Turn::assistant("four five six"),
        ];

        let result = summarizer.summarize(&turns, 3).await.unwrap();
        assert_eq!(result, "four five six");
        assert_eq!(summarizer.summarize(&turns, 0).await.unwrap(), "");
    }
}
