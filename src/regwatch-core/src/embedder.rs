use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::cache::{embedding_key, ResultCache};
use crate::config::EmbeddingConfig;

/// Embedder trait for converting text to vectors
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
    fn dimensions(&self) -> usize;
}

/// OpenAI-compatible embedding client (`/v1/embeddings`)
pub struct OpenAIEmbedder {
    client: Client,
    base_url: String,
    dimensions: usize,
    model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    input: serde_json::Value, // String or array of strings
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build embedding HTTP client")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            dimensions: config.dimensions,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    async fn request(&self, input: serde_json::Value) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            input,
            model: self.model.clone(),
        };

        let mut builder = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .context("Failed to call embedding service")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding service returned status {}: {}", status, body);
        }

        let embedding_response: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        if embedding_response.data.is_empty() {
            anyhow::bail!("No embedding data in response");
        }

        let vectors: Vec<Vec<f32>> = embedding_response
            .data
            .into_iter()
            .map(|d| d.embedding)
            .collect();

        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
            anyhow::bail!(
                "Expected embedding dimension {}, got {}",
                self.dimensions,
                bad.len()
            );
        }

        Ok(vectors)
    }
}

#[async_trait::async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self
            .request(serde_json::Value::String(text.to_string()))
            .await?;
        Ok(vectors.swap_remove(0))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let input = serde_json::Value::Array(
            texts
                .iter()
                .map(|t| serde_json::Value::String(t.to_string()))
                .collect(),
        );
        let vectors = self.request(input).await?;
        if vectors.len() != texts.len() {
            anyhow::bail!(
                "Embedding service returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            );
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Stand-in when no embedding service is configured. Every call fails, so
/// queries degrade to lexical ranking over caller-supplied embeddings.
pub struct DisabledEmbedder {
    dimensions: usize,
}

impl DisabledEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait::async_trait]
impl Embedder for DisabledEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("Embedding is disabled")
    }

    async fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("Embedding is disabled")
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Memoizes another embedder's output in the cache layer, keyed by a hash of the text
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Arc<ResultCache>,
    ttl: Duration,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, cache: Arc<ResultCache>, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }
}

#[async_trait::async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = embedding_key(text);
        if let Some(vector) = self.cache.get_json::<Vec<f32>>(&key).await {
            return Ok(vector);
        }

        let vector = self.inner.embed(text).await?;
        self.cache.set_json(&key, &vector, self.ttl).await;
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        // Individually, so every text can hit the cache
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// Parallel embedding worker pool
/// Processes texts in parallel with configurable concurrency
pub struct ParallelEmbedder {
    embedder: Arc<dyn Embedder>,
    semaphore: Arc<Semaphore>,
    batch_size: usize,
}

impl ParallelEmbedder {
    pub fn new(embedder: Arc<dyn Embedder>, max_workers: usize, batch_size: usize) -> Self {
        Self {
            embedder,
            semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
            batch_size: batch_size.max(1),
        }
    }

    /// Embed texts in parallel. Each slot of the output matches the input
    /// position. A failed batch is retried text by text, so one rejected
    /// input only fails its own slot.
    pub async fn embed_parallel(&self, texts: Vec<String>) -> Result<Vec<Result<Vec<f32>>>> {
        use futures::stream::{FuturesUnordered, StreamExt};

        let mut tasks = FuturesUnordered::new();

        for (batch_idx, batch) in texts.chunks(self.batch_size).enumerate() {
            let permit = self.semaphore.clone().acquire_owned().await?;
            let embedder = self.embedder.clone();
            let batch_owned: Vec<String> = batch.to_vec();

            tasks.push(tokio::spawn(async move {
                let results = embed_batch_isolated(embedder.as_ref(), &batch_owned).await;
                drop(permit); // Release worker slot
                (batch_idx, results)
            }));
        }

        let mut slots: Vec<Option<Result<Vec<f32>>>> = (0..texts.len()).map(|_| None).collect();
        while let Some(joined) = tasks.next().await {
            let (batch_idx, results) = joined.context("Embedding task panicked")?;
            let start = batch_idx * self.batch_size;
            for (offset, result) in results.into_iter().enumerate() {
                if let Some(slot) = slots.get_mut(start + offset) {
                    *slot = Some(result);
                }
            }
        }

        Ok(slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(anyhow::anyhow!("No embedding produced"))))
            .collect())
    }

    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }
}

/// One result per text: the whole batch when it succeeds, else each text alone
async fn embed_batch_isolated(embedder: &dyn Embedder, texts: &[String]) -> Vec<Result<Vec<f32>>> {
    let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
    let batch_error = match embedder.embed_batch(&refs).await {
        Ok(vectors) if vectors.len() == texts.len() => return vectors.into_iter().map(Ok).collect(),
        Ok(vectors) => anyhow::anyhow!(
            "Embedding service returned {} vectors for {} inputs",
            vectors.len(),
            texts.len()
        ),
        Err(e) => e,
    };

    if texts.len() == 1 {
        return vec![Err(batch_error)];
    }

    tracing::debug!("Batch of {} failed ({}), embedding texts one by one", texts.len(), batch_error);
    let mut results = Vec::with_capacity(texts.len());
    for text in refs {
        results.push(embedder.embed(text).await);
    }
    results
}
