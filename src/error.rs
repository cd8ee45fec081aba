//! Crate-level error type

use thiserror::Error;

use crate::context::summarizer::SummarizerError;
use crate::context::token_budget::BudgetError;
use crate::llm::LlmError;
use crate::retrieval::embedding::EmbeddingError;
use crate::retrieval::store::StoreError;

/// Errors surfaced by the context pipeline
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid turn: {0}")]
    InvalidTurn(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error(transparent)]
    Summarizer(#[from] SummarizerError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<config::ConfigError> for ContextError {
    fn from(e: config::ConfigError) -> Self {
        ContextError::Configuration(e.to_string())
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ContextError>;
