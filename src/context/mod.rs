//! Conversation memory management with token budget enforcement
//!
//! This module keeps an unbounded chat history inside a fixed token budget by
//! trimming the oldest turns and folding them into a running summary.

pub mod buffer_manager;
pub mod models;
pub mod summarizer;
pub mod token_budget;
pub mod token_counter;

pub use buffer_manager::{ConversationBufferManager, SummaryOutcome, TrimmedBuffer};
pub use models::{Conversation, Role, Turn};
pub use summarizer::{ConcatenationSummarizer, LlmSummarizer, Summarizer, SummarizerError};
pub use token_budget::{BudgetError, MemoryBudget};
pub use token_counter::{ChatTemplate, TiktokenCounter, TokenCounter, WordBasedCounter};
