use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::models::Document;

/// Search visibility of a stored document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Record stored, embedding not yet available; excluded from ranked queries
    Registered,
    /// Record and embedding both stored
    Embedded,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub embedded_count: usize,
    pub evicted: u64,
}

/// In-memory document store.
///
/// Records and embeddings live in separately locked maps so ingestion writers
/// and query readers contend only on the map they touch. A document may be
/// visible before its embedding; callers must treat a missing embedding as
/// "not yet searchable".
pub struct DocumentStore {
    documents: RwLock<HashMap<String, Arc<Document>>>,
    embeddings: RwLock<HashMap<String, Arc<Vec<f32>>>>,
    /// Oldest-ingested documents are evicted beyond this count
    max_documents: Option<usize>,
    evicted: AtomicU64,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::with_capacity_limit(None)
    }

    pub fn with_capacity_limit(max_documents: Option<usize>) -> Self {
        if let Some(max) = max_documents {
            tracing::info!("Document store bounded to {} documents", max);
        }
        Self {
            documents: RwLock::new(HashMap::new()),
            embeddings: RwLock::new(HashMap::new()),
            max_documents,
            evicted: AtomicU64::new(0),
        }
    }

    /// Insert or replace a document record. An existing embedding is kept.
    pub fn upsert(&self, document: Document) {
        let id = document.id.clone();
        let evicted = {
            let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
            let is_new = !documents.contains_key(&id);
            documents.insert(id.clone(), Arc::new(document));

            match self.max_documents {
                Some(max) if is_new && documents.len() > max => {
                    let excess = documents.len() - max;
                    evict_oldest(&mut documents, excess, &id)
                }
                _ => Vec::new(),
            }
        };

        if !evicted.is_empty() {
            let mut embeddings = self.embeddings.write().unwrap_or_else(PoisonError::into_inner);
            for victim in &evicted {
                embeddings.remove(victim);
            }
            drop(embeddings);
            self.evicted.fetch_add(evicted.len() as u64, Ordering::Relaxed);
            tracing::debug!("Evicted {} documents to stay within bound", evicted.len());
        }

        tracing::debug!("Upserted document {}", id);
    }

    pub fn get(&self, id: &str) -> Option<Arc<Document>> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// All document ids, sorted
    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Point-in-time copy of every document record
    pub fn snapshot(&self) -> Vec<Arc<Document>> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Attach an embedding to a known document. Returns false for unknown ids.
    pub fn set_embedding(&self, id: &str, vector: Vec<f32>) -> bool {
        let stored = self.attach_embedding(id, vector, true);
        if !stored {
            tracing::debug!("Ignoring embedding for unknown document {}", id);
        }
        stored
    }

    /// Attach an embedding only if the document has none yet
    pub fn set_embedding_if_absent(&self, id: &str, vector: Vec<f32>) -> bool {
        self.attach_embedding(id, vector, false)
    }

    /// Lock order is documents, then embeddings. Holding the documents read
    /// lock keeps a concurrent remove or eviction from leaving an orphan vector.
    fn attach_embedding(&self, id: &str, vector: Vec<f32>, replace: bool) -> bool {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        if !documents.contains_key(id) {
            return false;
        }
        let mut embeddings = self.embeddings.write().unwrap_or_else(PoisonError::into_inner);
        if !replace && embeddings.contains_key(id) {
            return false;
        }
        embeddings.insert(id.to_string(), Arc::new(vector));
        true
    }

    pub fn get_embedding(&self, id: &str) -> Option<Arc<Vec<f32>>> {
        self.embeddings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn visibility(&self, id: &str) -> Option<Visibility> {
        if !self.contains(id) {
            return None;
        }
        let embedded = self
            .embeddings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id);
        Some(if embedded {
            Visibility::Embedded
        } else {
            Visibility::Registered
        })
    }

    /// Update the risk score of a stored document (clamped to [0, 1])
    pub fn update_risk(&self, id: &str, risk_score: f64) -> bool {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        match documents.get_mut(id) {
            Some(doc) => {
                Arc::make_mut(doc).risk_score = risk_score.clamp(0.0, 1.0);
                true
            }
            None => false,
        }
    }

    /// Registered documents still waiting for an embedding, oldest first
    pub fn pending(&self, limit: usize) -> Vec<Arc<Document>> {
        self.pending_where(limit, |_| true)
    }

    /// Like [`pending`](Self::pending), keeping only documents accepted by `include`
    pub fn pending_where(
        &self,
        limit: usize,
        mut include: impl FnMut(&Document) -> bool,
    ) -> Vec<Arc<Document>> {
        let documents = self.snapshot();
        let mut pending: Vec<Arc<Document>> = {
            let embeddings = self.embeddings.read().unwrap_or_else(PoisonError::into_inner);
            documents
                .into_iter()
                .filter(|doc| !embeddings.contains_key(&doc.id) && include(doc))
                .collect()
        };
        pending.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        pending.truncate(limit);
        pending
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Document>> {
        let removed = self
            .documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        self.embeddings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        removed
    }

    pub fn len(&self) -> usize {
        self.documents.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn embedded_count(&self) -> usize {
        self.embeddings.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            document_count: self.len(),
            embedded_count: self.embedded_count(),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove `count` documents with the oldest timestamps, never `keep`
fn evict_oldest(
    documents: &mut HashMap<String, Arc<Document>>,
    count: usize,
    keep: &str,
) -> Vec<String> {
    let mut candidates: Vec<(chrono::DateTime<chrono::Utc>, String)> = documents
        .values()
        .filter(|doc| doc.id != keep)
        .map(|doc| (doc.timestamp, doc.id.clone()))
        .collect();
    candidates.sort();

    candidates
        .into_iter()
        .take(count)
        .map(|(_, id)| {
            documents.remove(&id);
            id
        })
        .collect()
}
