//! Embedding backends

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Embedding errors
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Request payload shape: one text or many
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Single(String),
    Batch(Vec<String>),
}

impl EmbeddingInput {
    pub fn len(&self) -> usize {
        match self {
            EmbeddingInput::Single(_) => 1,
            EmbeddingInput::Batch(texts) => texts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turns text into vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed several texts; output order matches input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".to_string()))
    }
}

/// Embedding backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Query embedding cache TTL in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_cache_size")]
    pub cache_max_entries: u64,
}

fn default_endpoint() -> String { "http://localhost:8080/v1".to_string() }
fn default_model() -> String { "nomic-embed-text:v1.5".to_string() }
fn default_timeout_ms() -> u64 { 5000 }
fn default_cache_ttl() -> u64 { 600 }
fn default_cache_size() -> u64 { 1000 }

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            model: default_model(),
            timeout_ms: default_timeout_ms(),
            cache_ttl_secs: default_cache_ttl(),
            cache_max_entries: default_cache_size(),
        }
    }
}

impl EmbeddingConfig {
    /// Override selected fields from environment variables
    pub fn from_env(mut self) -> Self {
        if let Ok(val) = std::env::var("EMBEDDING_ENDPOINT") {
            self.endpoint = val;
        }

        if let Ok(val) = std::env::var("EMBEDDING_API_KEY") {
            self.api_key = Some(val);
        }

        if let Ok(val) = std::env::var("EMBEDDING_MODEL") {
            self.model = val;
        }

        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Client for OpenAI-compatible `/embeddings` endpoints
pub struct HttpEmbedder {
    http: Client,
    config: EmbeddingConfig,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self { http, config })
    }

    async fn request(&self, input: EmbeddingInput) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let expected = input.len();
        let url = format!("{}/embeddings", self.config.endpoint.trim_end_matches('/'));
        let body = EmbeddingRequest {
            model: &self.config.model,
            input,
            encoding_format: "float",
        };

        debug!("Embedding {} texts", expected);

        let mut req = self.http.post(&url).json(&body);
        if let Some(api_key) = &self.config.api_key {
            req = req.bearer_auth(api_key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| EmbeddingError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::RequestFailed(format!("HTTP {}: {}", status, body)));
        }

        let mut parsed = response
            .json::<EmbeddingResponse>()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        if parsed.data.len() != expected {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                expected,
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(EmbeddingInput::Batch(texts.to_vec())).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.request(EmbeddingInput::Single(text.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: EmbeddingInput,
    encoding_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// Caches single-text embeddings of repeated queries
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Cache<String, Arc<Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, ttl: Duration, max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { inner, cache }
    }

    pub fn from_config(inner: Arc<dyn Embedder>, config: &EmbeddingConfig) -> Self {
        Self::new(inner, config.cache_ttl(), config.cache_max_entries)
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut embeddings: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut misses = Vec::new();
        for text in texts {
            match self.cache.get(text.as_str()).await {
                Some(hit) => embeddings.push(Some(hit.as_ref().clone())),
                None => {
                    misses.push(text.clone());
                    embeddings.push(None);
                }
            }
        }
        debug!("Embedding cache: {} hits, {} misses", texts.len() - misses.len(), misses.len());

        if !misses.is_empty() {
            let fetched = self.inner.embed_batch(&misses).await?;
            if fetched.len() != misses.len() {
                return Err(EmbeddingError::InvalidResponse(format!(
                    "expected {} embeddings, got {}",
                    misses.len(),
                    fetched.len()
                )));
            }
            let mut fetched = fetched.into_iter();
            for (slot, text) in embeddings.iter_mut().filter(|e| e.is_none()).zip(&misses) {
                if let Some(embedding) = fetched.next() {
                    self.cache.insert(text.clone(), Arc::new(embedding.clone())).await;
                    *slot = Some(embedding);
                }
            }
        }

        Ok(embeddings.into_iter().flatten().collect())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if let Some(hit) = self.cache.get(text).await {
            debug!("Embedding cache hit");
            return Ok(hit.as_ref().clone());
        }

        let embedding = self.inner.embed(text).await?;
        self.cache
            .insert(text.to_string(), Arc::new(embedding.clone()))
            .await;
        Ok(embedding)
    }
}
