//! Simple Embedded Application Example
//!
//! A minimal example showing regwatch as an embedded library, with a toy
//! bag-of-words embedder standing in for an embedding service.
//!
//! Run with: cargo run --example simple_embedded

use regwatch_core::*;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

const DIMENSIONS: usize = 32;

/// Buckets each lower-cased word into one of `DIMENSIONS` slots
struct BagOfWords;

#[async_trait::async_trait]
impl Embedder for BagOfWords {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut vector = vec![0.0; DIMENSIONS];
        for word in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            vector[(hasher.finish() as usize) % DIMENSIONS] += 1.0;
        }
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("Simple regwatch Embedded Example\n");

    let store = Arc::new(DocumentStore::new());
    let cache = Arc::new(ResultCache::in_memory(1_000));
    let embedder: Arc<dyn Embedder> = Arc::new(BagOfWords);
    println!("✅ Store initialized\n");

    let docs = [
        ("sec-1", "SEC charges trader", "SEC charges trader with insider trading", Jurisdiction::Us),
        ("esma-1", "ESMA guidance", "ESMA publishes MiFID reporting guidance", Jurisdiction::Eu),
        ("sebi-1", "SEBI order", "SEBI fines broker over insider trading", Jurisdiction::India),
    ];
    for (id, title, content, jurisdiction) in docs {
        store.upsert(Document::new(id, title, content, "demo", jurisdiction));
        store.set_embedding(id, embedder.embed(content).await?);
        println!("📝 Added document: {}", id);
    }

    let searcher = HybridSearcher::new(store.clone(), embedder, cache);

    println!("\n🔍 Results for 'insider trading':");
    for (i, result) in searcher.query("insider trading", None, 5).await.iter().enumerate() {
        println!("   {}. {} [{}] (score: {:.4})", i + 1, result.title, result.jurisdiction, result.score);
    }

    println!("\n🔍 Results for 'insider trading' in INDIA:");
    for result in searcher.query_code("insider trading", Some("india"), 5).await {
        println!("   {} (score: {:.4})", result.id, result.score);
    }

    Ok(())
}
