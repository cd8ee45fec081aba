//! Vector similarity and document stores

use super::models::SearchHit;
use async_trait::async_trait;
use dashmap::DashMap;
use qdrant_client::{
    client::QdrantClient,
    qdrant::{point_id::PointIdOptions, value::Kind, PointId, SearchPoints, Value},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Nearest-neighbour search over passage embeddings
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Top `top_k` hits for `embedding`, best first
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchHit>, StoreError>;
}

/// Passage text lookup by identifier
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_text(&self, id: &str) -> Result<Option<String>, StoreError>;
}

/// Vector database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDbConfig {
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_collection")]
    pub collection_name: String,

    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_url() -> String { "http://localhost:6334".to_string() }
fn default_collection() -> String { "knowledge_base".to_string() }

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            collection_name: default_collection(),
            api_key: None,
        }
    }
}

/// Qdrant-backed vector store
///
/// Passage text is read from the `content` payload key; string fields of a
/// nested `metadata` object are flattened into the hit metadata.
pub struct QdrantVectorStore {
    client: QdrantClient,
    collection_name: String,
}

impl QdrantVectorStore {
    pub fn new(client: QdrantClient, collection_name: impl Into<String>) -> Self {
        Self {
            client,
            collection_name: collection_name.into(),
        }
    }

    pub fn from_config(config: &VectorDbConfig) -> Result<Self, StoreError> {
        let mut builder = QdrantClient::from_url(&config.url);
        if let Some(api_key) = &config.api_key {
            builder = builder.with_api_key(api_key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| StoreError::Connection(format!("Failed to create Qdrant client: {}", e)))?;
        Ok(Self::new(client, config.collection_name.clone()))
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchHit>, StoreError> {
        debug!("Searching collection {} for top-{}", self.collection_name, top_k);

        let response = self
            .client
            .search_points(&SearchPoints {
                collection_name: self.collection_name.clone(),
                vector: embedding.to_vec(),
                limit: top_k as u64,
                with_payload: Some(true.into()),
                ..Default::default()
            })
            .await
            .map_err(|e| StoreError::Search(format!("Failed to search points: {}", e)))?;

        let hits = response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = point_id_to_string(point.id.as_ref()?)?;
                Some(SearchHit {
                    id,
                    score: point.score,
                    metadata: flatten_payload(&point.payload),
                })
            })
            .collect();

        Ok(hits)
    }
}

fn point_id_to_string(id: &PointId) -> Option<String> {
    match id.point_id_options.as_ref()? {
        PointIdOptions::Num(n) => Some(n.to_string()),
        PointIdOptions::Uuid(u) => Some(u.clone()),
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value.kind.as_ref()? {
        Kind::StringValue(s) => Some(s.clone()),
        Kind::IntegerValue(i) => Some(i.to_string()),
        Kind::DoubleValue(d) => Some(d.to_string()),
        Kind::BoolValue(b) => Some(b.to_string()),
        _ => None,
    }
}

fn flatten_payload(payload: &HashMap<String, Value>) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    for (key, value) in payload {
        match value.kind.as_ref() {
            Some(Kind::StructValue(nested)) if key == "metadata" => {
                for (inner_key, inner_value) in &nested.fields {
                    if let Some(text) = value_to_string(inner_value) {
                        metadata.insert(inner_key.clone(), text);
                    }
                }
            }
            _ => {
                if let Some(text) = value_to_string(value) {
                    metadata.insert(key.clone(), text);
                }
            }
        }
    }
    metadata
}

struct StoredVector {
    id: String,
    vector: Vec<f32>,
    metadata: HashMap<String, String>,
}

/// Brute-force cosine store held in memory
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<Vec<StoredVector>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a vector
    pub fn upsert(
        &self,
        id: impl Into<String>,
        vector: Vec<f32>,
        metadata: HashMap<String, String>,
    ) {
        let id = id.into();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.iter_mut().find(|e| e.id == id) {
            Some(existing) => {
                existing.vector = vector;
                existing.metadata = metadata;
            }
            None => entries.push(StoredVector { id, vector, metadata }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchHit>, StoreError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());

        let mut hits = Vec::with_capacity(entries.len());
        for entry in entries.iter() {
            if entry.vector.len() != embedding.len() {
                return Err(StoreError::DimensionMismatch {
                    expected: entry.vector.len(),
                    actual: embedding.len(),
                });
            }
            hits.push(SearchHit {
                id: entry.id.clone(),
                score: cosine_similarity(embedding, &entry.vector),
                metadata: entry.metadata.clone(),
            });
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// Cosine similarity; zero vectors score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Document store held in memory
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: DashMap<String, String>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, text: impl Into<String>) {
        self.documents.insert(id.into(), text.into());
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_text(&self, id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.documents.get(id).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(content: &str) -> HashMap<String, String> {
        HashMap::from([("content".to_string(), content.to_string())])
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_in_memory_search_orders_by_similarity() {
        let store = InMemoryVectorStore::new();
        store.upsert("far", vec![0.0, 1.0], meta("far away"));
        store.upsert("near", vec![1.0, 0.1], meta("close by"));
        store.upsert("exact", vec![1.0, 0.0], meta("identical"));

        let hits = store.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "exact");
        assert_eq!(hits[1].id, "near");
        assert_eq!(hits[0].content(), Some("identical"));
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing() {
        let store = InMemoryVectorStore::new();
        store.upsert("a", vec![1.0, 0.0], meta("old"));
        store.upsert("a", vec![0.0, 1.0], meta("new"));
        assert_eq!(store.len(), 1);

        let hits = store.search(&[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits[0].content(), Some("new"));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_an_error() {
        let store = InMemoryVectorStore::new();
        store.upsert("a", vec![1.0, 0.0, 0.0], HashMap::new());
        let result = store.search(&[1.0, 0.0], 1).await;
        assert!(matches!(result, Err(StoreError::DimensionMismatch { expected: 3, actual: 2 })));
    }

    #[test]
    fn test_document_store_lookup() {
        let docs = InMemoryDocumentStore::new();
        docs.insert("d1", "Tuition is due in August.");

        let found = tokio_test::block_on(docs.get_text("d1")).unwrap();
        assert_eq!(found.as_deref(), Some("Tuition is due in August."));
        assert_eq!(tokio_test::block_on(docs.get_text("missing")).unwrap(), None);
    }

    #[test]
    fn test_flatten_payload_reads_nested_metadata() {
        use qdrant_client::qdrant::Struct;

        let nested = Struct {
            fields: HashMap::from([(
                "content".to_string(),
                Value { kind: Some(Kind::StringValue("passage".to_string())) },
            )]),
        };
        let payload = HashMap::from([
            ("metadata".to_string(), Value { kind: Some(Kind::StructValue(nested)) }),
            ("page".to_string(), Value { kind: Some(Kind::IntegerValue(3)) }),
        ]);

        let flat = flatten_payload(&payload);
        assert_eq!(flat.get("content").map(String::as_str), Some("passage"));
        assert_eq!(flat.get("page").map(String::as_str), Some("3"));
    }
}
