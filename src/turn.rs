//! Per-turn context assembly
//!
//! Runs retrieval and buffer trimming side by side for one user turn. Both
//! results feed the answer-generation call made by the caller.

use crate::context::buffer_manager::{ConversationBufferManager, TrimmedBuffer};
use crate::context::models::Turn;
use crate::retrieval::models::ScoredCandidate;
use crate::retrieval::pipeline::RetrievalPipeline;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Inputs for the answer-generation call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnContext {
    /// Conversation memory within the buffer limit
    pub buffer: TrimmedBuffer,
    /// Retrieved passages, best first; empty when retrieval failed
    pub passages: Vec<ScoredCandidate>,
}

/// Builds a [`TurnContext`] for each user turn
#[derive(Clone)]
pub struct TurnContextBuilder {
    buffer_manager: Arc<ConversationBufferManager>,
    pipeline: Arc<RetrievalPipeline>,
}

impl TurnContextBuilder {
    pub fn new(
        buffer_manager: Arc<ConversationBufferManager>,
        pipeline: Arc<RetrievalPipeline>,
    ) -> Self {
        Self {
            buffer_manager,
            pipeline,
        }
    }

    /// Retrieve passages for `query` and trim `history`, concurrently.
    ///
    /// `history` holds the turns before `query`; it is used both to
    /// contextualize the query and as the memory to trim.
    pub async fn prepare(&self, query: &str, history: &[Turn]) -> TurnContext {
        let (passages, buffer) = tokio::join!(
            self.pipeline.retrieve(query, history),
            self.buffer_manager.trim(history),
        );

        info!(
            "Turn context ready: {} passages, {} buffer turns ({} tokens)",
            passages.len(),
            buffer.turns.len(),
            buffer.token_count
        );

        TurnContext { buffer, passages }
    }
}
