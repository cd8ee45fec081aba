//! Token counting over chat turns rendered through a chat template
//!
//! Counts are only meaningful relative to the exact rendering the downstream
//! model receives, so every comparison against a budget in this crate goes
//! through the same [`TokenCounter`].

use super::models::Turn;
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Counts tokens for a sequence of chat turns
pub trait TokenCounter: Send + Sync {
    /// Count tokens of `turns` rendered through the chat template.
    /// An empty slice counts as zero.
    fn count(&self, turns: &[Turn]) -> usize;
}

/// Chat template used to render turns before tokenization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTemplate {
    pub turn_open: String,
    pub turn_close: String,
    /// Appended after the last turn, mirroring `add_generation_prompt`
    pub generation_prompt: Option<String>,
}

impl Default for ChatTemplate {
    fn default() -> Self {
        Self::chatml()
    }
}

impl ChatTemplate {
    /// ChatML layout with an assistant generation prompt
    pub fn chatml() -> Self {
        Self {
            turn_open: "<|im_start|>".to_string(),
            turn_close: "<|im_end|>\n".to_string(),
            generation_prompt: Some("<|im_start|>assistant\n".to_string()),
        }
    }

    /// Render turns into the exact text the model receives
    pub fn render(&self, turns: &[Turn]) -> String {
        if turns.is_empty() {
            return String::new();
        }

        let mut rendered = String::new();
        for turn in turns {
            rendered.push_str(&self.turn_open);
            rendered.push_str(turn.role.as_str());
            rendered.push('\n');
            rendered.push_str(&turn.content);
            rendered.push_str(&self.turn_close);
        }
        if let Some(prompt) = &self.generation_prompt {
            rendered.push_str(prompt);
        }
        rendered
    }
}

/// Tiktoken-based counter using cl100k_base
pub struct TiktokenCounter {
    bpe: Arc<CoreBPE>,
    template: ChatTemplate,
}

impl TiktokenCounter {
    /// Create a counter with the cl100k_base encoding and ChatML template
    pub fn new() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Self::with_template(ChatTemplate::default())
    }

    pub fn with_template(
        template: ChatTemplate,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let bpe = cl100k_base().map_err(|e| e.to_string())?;
        Ok(Self {
            bpe: Arc::new(bpe),
            template,
        })
    }

    pub fn template(&self) -> &ChatTemplate {
        &self.template
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, turns: &[Turn]) -> usize {
        if turns.is_empty() {
            return 0;
        }
        let rendered = self.template.render(turns);
        self.bpe.encode_with_special_tokens(&rendered).len()
    }
}

/// Word-based counter (fallback, ~1.3 tokens per word)
pub struct WordBasedCounter {
    tokens_per_word: f64,
    template: ChatTemplate,
}

impl WordBasedCounter {
    pub fn new(tokens_per_word: f64) -> Self {
        Self {
            tokens_per_word,
            template: ChatTemplate::default(),
        }
    }

    pub fn with_template(mut self, template: ChatTemplate) -> Self {
        self.template = template;
        self
    }
}

impl Default for WordBasedCounter {
    fn default() -> Self {
        Self::new(1.3)
    }
}

impl TokenCounter for WordBasedCounter {
    fn count(&self, turns: &[Turn]) -> usize {
        if turns.is_empty() {
            return 0;
        }
        let words = self.template.render(turns).split_whitespace().count();
        (words as f64 * self.tokens_per_word).ceil() as usize
    }
}
