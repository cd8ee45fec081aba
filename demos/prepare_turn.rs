//! Prepare the context for one chat turn against live backends.
//!
//! Usage: cargo run --example prepare_turn -- [config.toml] "question"

use rag_context::context::{LlmSummarizer, TiktokenCounter};
use rag_context::llm::build_chat_model;
use rag_context::logging::init_tracing;
use rag_context::retrieval::{CachedEmbedder, HttpEmbedder, QdrantVectorStore};
use rag_context::{Config, ConversationBufferManager, RetrievalPipeline, Turn, TurnContextBuilder};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config, query) = match args.as_slice() {
        [path, query] => (Config::from_file(path)?, query.clone()),
        [query] => (Config::from_env()?, query.clone()),
        _ => anyhow::bail!("usage: prepare_turn [config.toml] \"question\""),
    };

    init_tracing(&config.logging);

    let chat_model = build_chat_model(&config.llm)?;
    let counter = Arc::new(TiktokenCounter::new().map_err(|e| anyhow::anyhow!("{}", e))?);
    let summarizer = Arc::new(LlmSummarizer::new(chat_model.clone()));
    let buffer_manager =
        ConversationBufferManager::new(counter, summarizer, config.memory.clone())?;

    let embedder = Arc::new(CachedEmbedder::from_config(
        Arc::new(HttpEmbedder::new(config.embedding.clone())?),
        &config.embedding,
    ));
    let store = Arc::new(QdrantVectorStore::from_config(&config.vector_db)?);
    let pipeline = RetrievalPipeline::new(chat_model, embedder, store, config.retrieval.clone())?;

    let builder = TurnContextBuilder::new(Arc::new(buffer_manager), Arc::new(pipeline));

    let history = vec![
        Turn::user("Hi, I'm interested in the accounting program."),
        Turn::assistant("Great choice! What would you like to know about it?"),
    ];
    let context = builder.prepare(&query, &history).await;

    println!("Buffer ({} tokens):", context.buffer.token_count);
    for turn in &context.buffer.turns {
        println!("  {}: {}", turn.role, turn.content);
    }
    println!("Passages:");
    for passage in &context.passages {
        println!("  [{:.3}] {}", passage.score, passage.content);
    }

    Ok(())
}
