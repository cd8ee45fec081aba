//! Retrieval orchestration
//!
//! One call contextualizes the query, optionally splits it into sub-queries,
//! embeds and searches every query concurrently, then fuses and cuts the
//! candidate lists. The whole call runs under the turn deadline; any failure
//! yields no passages.

use super::autocut::{Curve, Direction, RelevanceCutter};
use super::contextualizer::QueryContextualizer;
use super::embedding::Embedder;
use super::fusion::fuse_candidates;
use super::models::{RankedList, ScoredCandidate, SearchHit};
use super::rewriter::QueryRewriter;
use super::store::{DocumentStore, VectorStore};
use crate::context::models::Turn;
use crate::error::{ContextError, Result};
use crate::llm::ChatModel;
use crate::metrics::METRICS;
use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// What to do with the long tail of the fused list
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum CutPolicy {
    /// Keep every candidate
    Disabled,
    /// Keep candidates up to and including the knee
    Knee {
        #[serde(default = "default_sensitivity")]
        sensitivity: f64,
        #[serde(default)]
        curve: Curve,
        #[serde(default)]
        direction: Direction,
    },
}

fn default_sensitivity() -> f64 { 1.0 }

impl Default for CutPolicy {
    fn default() -> Self {
        CutPolicy::Knee {
            sensitivity: default_sensitivity(),
            curve: Curve::default(),
            direction: Direction::default(),
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalPolicy {
    /// Hits requested from the vector store per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Reciprocal rank fusion damping constant
    #[serde(default = "default_rrf_k")]
    pub rrf_k: usize,

    /// Split the contextualized query into sub-queries
    #[serde(default)]
    pub rewrite: bool,

    /// Fuse multiple candidate lists by reciprocal rank; otherwise merge by score
    #[serde(default = "default_fusion")]
    pub fusion: bool,

    #[serde(default)]
    pub cut: CutPolicy,

    /// Raw hits scoring below this are dropped before fusion
    #[serde(default)]
    pub min_score: Option<f32>,

    #[serde(default = "default_turn_deadline_ms")]
    pub turn_deadline_ms: u64,

    #[serde(default = "default_contextualize_timeout_ms")]
    pub contextualize_timeout_ms: u64,
}

fn default_top_k() -> usize { 3 }
fn default_rrf_k() -> usize { 60 }
fn default_fusion() -> bool { true }
fn default_turn_deadline_ms() -> u64 { 20_000 }
fn default_contextualize_timeout_ms() -> u64 { 8_000 }

impl Default for RetrievalPolicy {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            rrf_k: default_rrf_k(),
            rewrite: false,
            fusion: default_fusion(),
            cut: CutPolicy::default(),
            min_score: None,
            turn_deadline_ms: default_turn_deadline_ms(),
            contextualize_timeout_ms: default_contextualize_timeout_ms(),
        }
    }
}

impl RetrievalPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(ContextError::Configuration(
                "retrieval.top_k must be greater than zero".to_string(),
            ));
        }
        if self.rrf_k == 0 {
            return Err(ContextError::Configuration(
                "retrieval.rrf_k must be greater than zero".to_string(),
            ));
        }
        if let CutPolicy::Knee { sensitivity, .. } = self.cut {
            if !sensitivity.is_finite() || sensitivity < 0.0 {
                return Err(ContextError::Configuration(
                    "retrieval.cut.sensitivity must be finite and non-negative".to_string(),
                ));
            }
        }
        if self.turn_deadline_ms == 0 || self.contextualize_timeout_ms == 0 {
            return Err(ContextError::Configuration(
                "retrieval timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn turn_deadline(&self) -> Duration {
        Duration::from_millis(self.turn_deadline_ms)
    }

    pub fn contextualize_timeout(&self) -> Duration {
        Duration::from_millis(self.contextualize_timeout_ms)
    }

    fn cutter(&self) -> Option<RelevanceCutter> {
        match self.cut {
            CutPolicy::Disabled => None,
            CutPolicy::Knee { sensitivity, curve, direction } => {
                Some(RelevanceCutter::new(sensitivity, curve, direction))
            }
        }
    }
}

/// Retrieval pipeline over injected collaborators
pub struct RetrievalPipeline {
    contextualizer: QueryContextualizer,
    rewriter: Option<QueryRewriter>,
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    documents: Option<Arc<dyn DocumentStore>>,
    cutter: Option<RelevanceCutter>,
    policy: RetrievalPolicy,
}

impl RetrievalPipeline {
    pub fn new(
        chat_model: Arc<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        policy: RetrievalPolicy,
    ) -> Result<Self> {
        policy.validate()?;

        let rewriter = policy.rewrite.then(|| QueryRewriter::new(chat_model.clone()));
        Ok(Self {
            contextualizer: QueryContextualizer::new(chat_model, policy.contextualize_timeout()),
            rewriter,
            embedder,
            vector_store,
            documents: None,
            cutter: policy.cutter(),
            policy,
        })
    }

    /// Materialize passages missing a `content` payload from `documents`
    pub fn with_document_store(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn policy(&self) -> &RetrievalPolicy {
        &self.policy
    }

    /// Passages relevant to `query`, best first.
    ///
    /// Never fails: store, embedding and model errors as well as an expired
    /// turn deadline all produce an empty list.
    pub async fn retrieve(&self, query: &str, history: &[Turn]) -> Vec<ScoredCandidate> {
        let started = Instant::now();
        let deadline = self.policy.turn_deadline();

        let outcome = tokio::time::timeout(deadline, self.run(query, history)).await;
        let (status, passages) = match outcome {
            Ok(Ok(passages)) => ("success", passages),
            Ok(Err(e)) => {
                error!("Retrieval failed, continuing without passages: {}", e);
                ("error", Vec::new())
            }
            Err(_) => {
                warn!(
                    "Retrieval exceeded turn deadline of {:?}, continuing without passages",
                    deadline
                );
                ("timeout", Vec::new())
            }
        };

        let elapsed = started.elapsed();
        METRICS.record_retrieval(status, elapsed, passages.len());
        info!("Retrieved {} passages in {:?} ({})", passages.len(), elapsed, status);
        passages
    }

    async fn run(&self, query: &str, history: &[Turn]) -> Result<Vec<ScoredCandidate>> {
        let contextualized = self.contextualizer.contextualize(query, history).await;

        let queries = match &self.rewriter {
            Some(rewriter) => rewriter.rewrite(&contextualized).await,
            None => vec![contextualized],
        };
        debug!("Searching with {} queries", queries.len());

        let embeddings = self.embedder.embed_batch(&queries).await?;

        let searches = embeddings
            .iter()
            .map(|embedding| self.vector_store.search(embedding, self.policy.top_k));
        let mut lists = Vec::with_capacity(queries.len());
        for hits in join_all(searches).await {
            lists.push(self.materialize(hits?).await?);
        }

        let merged = if lists.len() == 1 {
            lists.pop().unwrap_or_default()
        } else if self.policy.fusion {
            fuse_candidates(&lists, self.policy.rrf_k)?
        } else {
            merge_by_score(lists)
        };

        Ok(self.cut(merged))
    }

    /// Turn raw hits into candidates, dropping those below `min_score` and
    /// those whose text cannot be found
    async fn materialize(&self, hits: Vec<SearchHit>) -> Result<RankedList> {
        let mut candidates = Vec::with_capacity(hits.len());
        for hit in hits {
            if self.policy.min_score.map_or(false, |min| hit.score < min) {
                debug!("Dropping hit {} with score {:.3}", hit.id, hit.score);
                continue;
            }

            let content = match hit.content() {
                Some(text) => Some(text.to_string()),
                None => match &self.documents {
                    Some(documents) => documents.get_text(&hit.id).await?,
                    None => None,
                },
            };

            match content {
                Some(content) => candidates.push(ScoredCandidate::new(hit.id, content, hit.score)),
                None => warn!("No text found for hit {}, skipping", hit.id),
            }
        }
        Ok(candidates)
    }

    fn cut(&self, mut candidates: RankedList) -> RankedList {
        let Some(cutter) = &self.cutter else {
            return candidates;
        };

        let scores: Vec<f32> = candidates.iter().map(|c| c.score).collect();
        match cutter.find_knee(&scores) {
            Some(knee) => {
                debug!("Cutting {} candidates after index {}", candidates.len(), knee);
                METRICS.record_autocut("knee");
                candidates.truncate(knee + 1);
            }
            None => METRICS.record_autocut("no_knee"),
        }
        candidates
    }
}

/// Merge lists by raw score, keeping the best-scoring copy of duplicate text
fn merge_by_score(lists: Vec<RankedList>) -> RankedList {
    let mut best: IndexMap<String, ScoredCandidate> = IndexMap::new();
    for candidate in lists.into_iter().flatten() {
        match best.get_mut(&candidate.content) {
            Some(existing) if existing.score >= candidate.score => {}
            Some(existing) => *existing = candidate,
            None => {
                best.insert(candidate.content.clone(), candidate);
            }
        }
    }

    let mut merged: RankedList = best.into_values().collect();
    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged
}
