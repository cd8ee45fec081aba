//! Passage retrieval for a conversational turn
//!
//! Contextualization, vector search, reciprocal rank fusion and knee-based
//! cutting of the long tail of low-relevance passages.

pub mod autocut;
pub mod contextualizer;
pub mod embedding;
pub mod fusion;
pub mod models;
pub mod pipeline;
pub mod rewriter;
pub mod store;

pub use autocut::{Curve, Direction, RelevanceCutter};
pub use contextualizer::QueryContextualizer;
pub use embedding::{
    CachedEmbedder, Embedder, EmbeddingConfig, EmbeddingError, EmbeddingInput, HttpEmbedder,
};
pub use fusion::{fuse_candidates, reciprocal_rank_fusion};
pub use models::{RankedList, ScoredCandidate, SearchHit};
pub use pipeline::{CutPolicy, RetrievalPipeline, RetrievalPolicy};
pub use rewriter::QueryRewriter;
pub use store::{
    DocumentStore, InMemoryDocumentStore, InMemoryVectorStore, QdrantVectorStore, StoreError,
    VectorDbConfig, VectorStore,
};
