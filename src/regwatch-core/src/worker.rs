use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time;
use tracing::{error, info, warn};

use crate::embedder::{Embedder, ParallelEmbedder};
use crate::store::DocumentStore;

/// Documents embedded per request
const BATCH_SIZE: usize = 4;

/// Failed attempts after which a document is no longer retried
pub const MAX_EMBED_ATTEMPTS: u32 = 3;

/// Retry bookkeeping for a document whose embedding failed
#[derive(Debug, Clone, Copy)]
struct FailureState {
    attempts: u32,
    /// First tick at which the document is eligible again
    retry_at: u64,
}

impl FailureState {
    fn eligible(&self, tick: u64) -> bool {
        self.attempts < MAX_EMBED_ATTEMPTS && tick >= self.retry_at
    }
}

/// Background worker that embeds registered documents that have no vector yet.
///
/// Failing documents back off exponentially (2, 4, ... ticks) and are given
/// up after [`MAX_EMBED_ATTEMPTS`], so they never hold back newer documents.
pub struct BackgroundWorker {
    store: Arc<DocumentStore>,
    embedder: ParallelEmbedder,
    interval: Duration,
    max_per_tick: usize,
    tick: AtomicU64,
    failures: Mutex<HashMap<String, FailureState>>,
    shutdown: Arc<tokio::sync::Notify>,
}

impl BackgroundWorker {
    pub fn new(
        store: Arc<DocumentStore>,
        embedder: Arc<dyn Embedder>,
        num_workers: usize,
        interval: Duration,
    ) -> Self {
        let num_workers = num_workers.max(1);
        Self {
            store,
            embedder: ParallelEmbedder::new(embedder, num_workers, BATCH_SIZE),
            interval,
            max_per_tick: num_workers,
            tick: AtomicU64::new(0),
            failures: Mutex::new(HashMap::new()),
            shutdown: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("Background embedding worker started");

            let mut interval = time::interval(self.interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = self.shutdown.notified() => {
                        info!("Background embedding worker stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.process_pending().await {
                            error!("Error embedding pending documents: {}", e);
                        }
                    }
                }
            }
        })
    }

    /// Stop the background worker
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    /// Embed one batch of pending documents; returns how many became searchable
    pub async fn process_pending(&self) -> anyhow::Result<usize> {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed) + 1;

        let docs = {
            let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            failures.retain(|id, _| self.store.contains(id));
            self.store.pending_where(self.max_per_tick, |doc| {
                failures.get(&doc.id).map_or(true, |state| state.eligible(tick))
            })
        };
        if docs.is_empty() {
            tracing::debug!("Embedding worker: no documents to process");
            return Ok(0);
        }

        info!("Embedding worker: found {} pending documents", docs.len());

        let texts: Vec<String> = docs.iter().map(|doc| doc.content.clone()).collect();
        let results = self.embedder.embed_parallel(texts).await?;

        let mut processed = 0;
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        for (doc, result) in docs.iter().zip(results) {
            match result {
                Ok(vector) => {
                    failures.remove(&doc.id);
                    // Lost races (upsert removal, explicit set) are not errors
                    if self.store.set_embedding_if_absent(&doc.id, vector) {
                        processed += 1;
                    }
                }
                Err(e) => {
                    let state = failures.entry(doc.id.clone()).or_insert(FailureState {
                        attempts: 0,
                        retry_at: 0,
                    });
                    state.attempts += 1;
                    state.retry_at = tick + (1u64 << state.attempts.min(16));
                    if state.attempts >= MAX_EMBED_ATTEMPTS {
                        warn!(
                            "Giving up on embedding document {} after {} attempts: {}",
                            doc.id, state.attempts, e
                        );
                    } else {
                        warn!("Failed to embed document {}: {}", doc.id, e);
                    }
                }
            }
        }
        drop(failures);

        if processed > 0 {
            info!("Background embedding: processed {} documents", processed);
        }
        Ok(processed)
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::tests::FakeEmbedder;
    use crate::models::{Document, Jurisdiction};
    use crate::store::Visibility;

    fn seeded_store(count: usize) -> Arc<DocumentStore> {
        let store = Arc::new(DocumentStore::new());
        for i in 0..count {
            store.upsert(Document::new(
                format!("doc-{:02}", i),
                "t",
                format!("content {}", i),
                "src",
                Jurisdiction::Us,
            ));
        }
        store
    }

    #[tokio::test]
    async fn test_process_pending_embeds_registered_documents() {
        let store = seeded_store(3);
        let worker = BackgroundWorker::new(
            store.clone(),
            Arc::new(FakeEmbedder::new(3)),
            4,
            Duration::from_secs(60),
        );

        assert_eq!(worker.process_pending().await.unwrap(), 3);
        assert_eq!(store.embedded_count(), 3);
        assert_eq!(store.visibility("doc-00"), Some(Visibility::Embedded));
        // Nothing left on the next tick
        assert_eq!(worker.process_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_process_pending_never_overwrites_existing_vectors() {
        let store = seeded_store(2);
        store.set_embedding("doc-00", vec![9.0, 9.0]);
        let worker = BackgroundWorker::new(
            store.clone(),
            Arc::new(FakeEmbedder::new(2)),
            1,
            Duration::from_secs(60),
        );

        assert_eq!(worker.process_pending().await.unwrap(), 1);
        assert_eq!(*store.get_embedding("doc-00").unwrap(), vec![9.0, 9.0]);
        assert_eq!(*store.get_embedding("doc-01").unwrap(), vec![1.0, 1.0]);
    }

    #[tokio::test]
    async fn test_process_pending_caps_documents_per_tick() {
        let store = seeded_store(10);
        let worker = BackgroundWorker::new(
            store.clone(),
            Arc::new(FakeEmbedder::new(2)),
            3,
            Duration::from_secs(60),
        );

        assert_eq!(worker.process_pending().await.unwrap(), 3);
        assert_eq!(store.embedded_count(), 3);
        // Oldest first, ties by id
        assert!(store.get_embedding("doc-00").is_some());
    }

    #[tokio::test]
    async fn test_embedding_failures_leave_documents_pending() {
        let store = seeded_store(2);
        let worker = BackgroundWorker::new(
            store.clone(),
            Arc::new(FakeEmbedder::new(2).failing()),
            2,
            Duration::from_secs(60),
        );

        assert_eq!(worker.process_pending().await.unwrap(), 0);
        assert_eq!(store.visibility("doc-01"), Some(Visibility::Registered));
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let store = seeded_store(1);
        let worker = Arc::new(BackgroundWorker::new(
            store.clone(),
            Arc::new(FakeEmbedder::new(2)),
            1,
            Duration::from_millis(10),
        ));

        let handle = worker.clone().start();
        for _ in 0..100 {
            if store.embedded_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        worker.stop();
        handle.await.unwrap();
        assert_eq!(store.embedded_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_documents_do_not_block_newer_ones() {
        let store = Arc::new(DocumentStore::new());
        let now = chrono::Utc::now();
        for (id, age) in [("bad-1", 3), ("bad-2", 2), ("good", 1)] {
            store.upsert(
                Document::new(id, "t", id, "src", Jurisdiction::Us)
                    .with_timestamp(now - chrono::Duration::minutes(age)),
            );
        }
        let worker = BackgroundWorker::new(
            store.clone(),
            Arc::new(FakeEmbedder::new(2).rejecting("bad-1").rejecting("bad-2")),
            2,
            Duration::from_secs(60),
        );

        for _ in 0..5 {
            worker.process_pending().await.unwrap();
        }
        assert_eq!(store.visibility("good"), Some(Visibility::Embedded));
        assert_eq!(store.visibility("bad-1"), Some(Visibility::Registered));
        assert_eq!(store.visibility("bad-2"), Some(Visibility::Registered));
    }

    #[tokio::test]
    async fn test_rejected_document_in_batch_does_not_fail_neighbors() {
        let store = seeded_store(3);
        let worker = BackgroundWorker::new(
            store.clone(),
            Arc::new(FakeEmbedder::new(2).rejecting("content 1")),
            4,
            Duration::from_secs(60),
        );

        assert_eq!(worker.process_pending().await.unwrap(), 2);
        assert_eq!(store.visibility("doc-00"), Some(Visibility::Embedded));
        assert_eq!(store.visibility("doc-01"), Some(Visibility::Registered));
        assert_eq!(store.visibility("doc-02"), Some(Visibility::Embedded));
    }

    #[tokio::test]
    async fn test_failing_document_is_given_up_after_max_attempts() {
        let store = seeded_store(1);
        let embedder = Arc::new(FakeEmbedder::new(2).failing());
        let worker = BackgroundWorker::new(store.clone(), embedder.clone(), 1, Duration::from_secs(60));

        for _ in 0..40 {
            worker.process_pending().await.unwrap();
        }
        assert_eq!(embedder.calls(), MAX_EMBED_ATTEMPTS as usize);
        assert_eq!(store.visibility("doc-00"), Some(Visibility::Registered));

        // An explicit embedding still makes it searchable
        assert!(store.set_embedding("doc-00", vec![1.0, 0.0]));
        assert_eq!(store.visibility("doc-00"), Some(Visibility::Embedded));
    }
}
