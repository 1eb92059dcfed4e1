//! Hybrid query against a real embedding service
//!
//! Reads `config.json` (or defaults) plus the environment overlay, so
//! `OPENAI_API_KEY` and `REDIS_HOST` are honored. Embeddings are memoized in
//! the cache layer, which falls back to process memory without Redis.
//!
//! Run with: OPENAI_API_KEY=... cargo run --example hybrid_query -- "money laundering"

use regwatch_core::embedder::{CachedEmbedder, OpenAIEmbedder};
use regwatch_core::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("regwatch_core=info").init();

    let mut config = Config::load("config.json").unwrap_or_default();
    config.apply_env();

    let cache = Arc::new(ResultCache::connect(&config.cache).await);
    println!("Cache backend: {:?}", cache.backend_kind());

    let embedder: Arc<dyn Embedder> = Arc::new(CachedEmbedder::new(
        Arc::new(OpenAIEmbedder::new(&config.embedding)?),
        cache.clone(),
        Duration::from_secs(config.embedding.cache_ttl_secs),
    ));

    let store = Arc::new(DocumentStore::new());
    let ingestor = Ingestor::new(store.clone()).with_embedder(embedder.clone());

    let samples = [
        "FinCEN and the SEC announce joint action against money laundering through brokerage accounts",
        "ESMA updates MiFID II transaction reporting guidance for investment firms",
        "RBI issues revised KYC master direction for regulated entities in India",
        "MAS Singapore consults on stablecoin reserve requirements",
    ];
    for content in samples {
        let doc = ingestor
            .ingest(IngestRequest {
                title: content.chars().take(40).collect(),
                content: content.to_string(),
                source: "demo".to_string(),
                ..IngestRequest::default()
            })
            .await?;
        println!("📝 {} -> {} ({:?})", doc.id, doc.jurisdiction, store.visibility(&doc.id));
    }

    let query = std::env::args().nth(1).unwrap_or_else(|| "money laundering".to_string());
    let searcher = HybridSearcher::new(store, embedder, cache.clone())
        .with_scoring(config.scoring)
        .with_query_ttl(Duration::from_secs(config.cache.query_ttl_secs));

    println!("\n🔍 Results for {:?}:", query);
    for result in searcher.query(&query, None, 3).await {
        println!("   {:.4}  {}  {}", result.score, result.jurisdiction, result.excerpt);
    }

    // Second run is served from the cache
    searcher.query(&query, None, 3).await;
    println!("\nCache stats: {:?}", cache.stats());

    Ok(())
}
