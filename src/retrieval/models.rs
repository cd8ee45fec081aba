//! Data models for retrieval

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A retrieved passage with its relevance score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub id: String,
    pub content: String,
    pub score: f32,
}

impl ScoredCandidate {
    pub fn new(id: impl Into<String>, content: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            score,
        }
    }
}

/// Candidates in rank order; after fusion, rank is position, not score
pub type RankedList = Vec<ScoredCandidate>;

/// Raw hit from the vector store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    /// Cosine similarity, higher is more relevant
    pub score: f32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SearchHit {
    /// Passage text carried in the hit's payload, if any
    pub fn content(&self) -> Option<&str> {
        self.metadata.get("content").map(String::as_str)
    }
}
