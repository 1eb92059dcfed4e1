//! Ingestion pipeline with risk analysis, alerts and the background worker
//!
//! Documents are registered immediately and embedded later by the worker;
//! the latest-documents listing sees them before ranked queries do.
//!
//! Run with: cargo run --example ingest_pipeline

use regwatch_core::embedder::DisabledEmbedder;
use regwatch_core::ingest::LogAlertSink;
use regwatch_core::risk::KeywordRiskClassifier;
use regwatch_core::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("regwatch_core=info").init();

    let store = Arc::new(DocumentStore::new());
    let ingestor = Ingestor::new(store.clone())
        .with_classifier(Arc::new(KeywordRiskClassifier))
        .with_alert_sink(Arc::new(LogAlertSink))
        .with_alert_threshold(0.7)
        .defer_embedding(true);

    let feed = [
        ("SEC Litigation Release", "The SEC charged two executives with insider trading and fraud ahead of a merger."),
        ("ESMA Statement", "ESMA reminds firms of GDPR obligations in MiFID disclosure documents."),
        ("Exchange Notice", "Trading hours will change next month for the holiday calendar."),
    ];
    for (title, content) in feed {
        let doc = ingestor
            .ingest(IngestRequest {
                title: title.to_string(),
                content: content.to_string(),
                source: "feed".to_string(),
                ..IngestRequest::default()
            })
            .await?;
        println!(
            "📝 {} [{}] risk {:.2} ({})",
            doc.title,
            doc.jurisdiction,
            doc.risk_score,
            RiskLevel::from_score(doc.risk_score)
        );
    }

    let searcher = HybridSearcher::new(
        store.clone(),
        Arc::new(DisabledEmbedder::new(2)),
        Arc::new(ResultCache::in_memory(100)),
    );

    println!("\n📋 High-risk documents:");
    for doc in searcher.list_latest(None, Some(RiskLevel::High), None, 10) {
        println!("   {} - {}", doc.title, doc.summary);
    }

    // Stand-in embeddings so the worker has something to attach
    let worker = Arc::new(BackgroundWorker::new(
        store.clone(),
        Arc::new(Uniform),
        4,
        Duration::from_millis(100),
    ));
    let handle = worker.clone().start();
    tokio::time::sleep(Duration::from_millis(300)).await;
    worker.stop();
    handle.await?;

    println!("\n✅ Embedded {}/{} documents", store.embedded_count(), store.len());
    Ok(())
}

struct Uniform;

#[async_trait::async_trait]
impl Embedder for Uniform {
    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(vec![1.0, 1.0])
    }

    async fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 1.0]).collect())
    }

    fn dimensions(&self) -> usize {
        2
    }
}
