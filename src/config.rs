//! Crate configuration
//!
//! Values come from an optional file, then `RAG_CONTEXT__<SECTION>__<KEY>`
//! environment variables, then the well-known single variables each section
//! reads in its `from_env` (e.g. `LLM_API_KEY`).

use crate::context::token_budget::MemoryBudget;
use crate::error::{ContextError, Result};
use crate::llm::LlmConfig;
use crate::logging::LoggingConfig;
use crate::retrieval::embedding::EmbeddingConfig;
use crate::retrieval::pipeline::RetrievalPolicy;
use crate::retrieval::store::VectorDbConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

const ENV_PREFIX: &str = "RAG_CONTEXT";
const ENV_SEPARATOR: &str = "__";

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub memory: MemoryBudget,

    #[serde(default)]
    pub retrieval: RetrievalPolicy,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub vector_db: VectorDbConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from `path` (format inferred from the extension) layered with
    /// environment overrides, and validate
    pub fn from_file(path: &str) -> Result<Self> {
        let _ = dotenvy::dotenv();
        debug!("Loading configuration from {}", path);

        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(environment())
            .build()?;

        Self::finish(settings.try_deserialize()?)
    }

    /// Defaults layered with environment overrides, validated
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let settings = config::Config::builder().add_source(environment()).build()?;

        Self::finish(settings.try_deserialize()?)
    }

    fn finish(mut config: Config) -> Result<Self> {
        config.llm = config.llm.from_env();
        config.embedding = config.embedding.from_env();
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        self.memory.validate()?;
        self.retrieval.validate()?;

        if self.llm.endpoint.is_empty() || self.llm.model.is_empty() {
            return Err(ContextError::Configuration(
                "llm.endpoint and llm.model must be set".to_string(),
            ));
        }
        if self.embedding.endpoint.is_empty() {
            return Err(ContextError::Configuration("embedding.endpoint must be set".to_string()));
        }
        if self.vector_db.collection_name.is_empty() {
            return Err(ContextError::Configuration(
                "vector_db.collection_name must be set".to_string(),
            ));
        }
        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}
