//! Conversational context management for retrieval-augmented chat
//!
//! Keeps a chat history inside a token budget by trimming and summarizing the
//! oldest turns, and retrieves relevant passages for each user turn with query
//! contextualization, reciprocal rank fusion and knee-based cutting.

pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod retrieval;
pub mod turn;

pub use crate::config::Config;
pub use context::{
    Conversation, ConversationBufferManager, MemoryBudget, Role, SummaryOutcome, TokenCounter,
    TrimmedBuffer, Turn,
};
pub use error::{ContextError, Result};
pub use llm::{ChatModel, ChatOutput, ChatRequest, LlmConfig, LlmError};
pub use retrieval::{RelevanceCutter, RetrievalPipeline, RetrievalPolicy, ScoredCandidate};
pub use turn::{TurnContext, TurnContextBuilder};
