use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::embedder::Embedder;
use crate::models::{Document, IngestRequest, Jurisdiction, RiskLevel};
use crate::risk::{categorize_jurisdiction, RiskAssessment, RiskClassifier};
use crate::store::DocumentStore;

/// Raised for a document whose risk reaches the alert threshold
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub document_id: String,
    pub title: String,
    pub source: String,
    pub jurisdiction: Jurisdiction,
    pub risk_score: f64,
    pub level: RiskLevel,
    pub categories: Vec<String>,
    pub summary: String,
    pub raised_at: DateTime<Utc>,
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<()>;
}

/// Emits alerts as structured log events
#[derive(Debug, Clone, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, alert: &Alert) -> Result<()> {
        tracing::warn!(
            document_id = %alert.document_id,
            jurisdiction = %alert.jurisdiction,
            risk_score = alert.risk_score,
            level = %alert.level,
            categories = ?alert.categories,
            "Compliance alert: {}",
            alert.title
        );
        Ok(())
    }
}

/// Ingestion pipeline: register, classify, alert, embed
pub struct Ingestor {
    store: Arc<DocumentStore>,
    embedder: Option<Arc<dyn Embedder>>,
    classifier: Option<Arc<dyn RiskClassifier>>,
    alerts: Option<Arc<dyn AlertSink>>,
    alert_threshold: f64,
    defer_embedding: bool,
}

impl Ingestor {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self {
            store,
            embedder: None,
            classifier: None,
            alerts: None,
            alert_threshold: 0.7,
            defer_embedding: false,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn RiskClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(sink);
        self
    }

    pub fn with_alert_threshold(mut self, threshold: f64) -> Self {
        self.alert_threshold = threshold;
        self
    }

    /// Leave embedding to the background worker
    pub fn defer_embedding(mut self, defer: bool) -> Self {
        self.defer_embedding = defer;
        self
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Ingest one document and return the stored record
    pub async fn ingest(&self, request: IngestRequest) -> Result<Document> {
        if request.content.trim().is_empty() {
            anyhow::bail!("Document content must not be empty");
        }

        let IngestRequest {
            id,
            title,
            content,
            source,
            jurisdiction,
            date,
            keywords,
            risk_score,
            doc_type,
            url,
            embedding,
        } = request;

        let id = id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let jurisdiction = jurisdiction.unwrap_or_else(|| categorize_jurisdiction(&content));

        let mut document = Document::new(id.clone(), title, content, source, jurisdiction)
            .with_keywords(keywords)
            .with_risk_score(risk_score.unwrap_or(0.0));
        if let Some(date) = date {
            document.date = date;
        }
        document.doc_type = doc_type;
        document.url = url;

        let content = document.content.clone();
        self.store.upsert(document);
        tracing::info!("Registered document {} ({})", id, jurisdiction);

        if let Some(assessment) = self.classify(&id, &content).await {
            self.store.update_risk(&id, assessment.risk_score);
            self.maybe_alert(&id, &assessment).await;
        }

        match embedding {
            Some(vector) => {
                self.store.set_embedding(&id, vector);
            }
            None if !self.defer_embedding => self.embed(&id, &content).await,
            None => {}
        }

        self.store
            .get(&id)
            .map(|doc| doc.as_ref().clone())
            .ok_or_else(|| anyhow::anyhow!("Document {} was evicted during ingestion", id))
    }

    /// Store a fully formed document without classification or embedding
    pub fn upsert_document(&self, document: Document) {
        self.store.upsert(document);
    }

    /// Replace a document's embedding. Returns false for unknown ids.
    pub fn set_embedding(&self, id: &str, vector: Vec<f32>) -> bool {
        self.store.set_embedding(id, vector)
    }

    async fn classify(&self, id: &str, content: &str) -> Option<RiskAssessment> {
        let classifier = self.classifier.as_ref()?;
        match classifier.score(id, content).await {
            Ok(assessment) => Some(assessment),
            Err(e) => {
                tracing::warn!("Risk classification failed for {}: {}", id, e);
                None
            }
        }
    }

    async fn maybe_alert(&self, id: &str, assessment: &RiskAssessment) {
        let Some(sink) = &self.alerts else {
            return;
        };
        if assessment.risk_score < self.alert_threshold {
            return;
        }
        let Some(document) = self.store.get(id) else {
            return;
        };

        let alert = Alert {
            document_id: document.id.clone(),
            title: document.title.clone(),
            source: document.source.clone(),
            jurisdiction: document.jurisdiction,
            risk_score: document.risk_score,
            level: RiskLevel::from_score(document.risk_score),
            categories: assessment.categories.clone(),
            summary: assessment.summary.clone(),
            raised_at: Utc::now(),
        };
        if let Err(e) = sink.send(&alert).await {
            tracing::warn!("Failed to deliver alert for {}: {}", id, e);
        }
    }

    async fn embed(&self, id: &str, content: &str) {
        let Some(embedder) = &self.embedder else {
            return;
        };
        if self.store.get_embedding(id).is_some() {
            return;
        }
        match embedder.embed(content).await {
            Ok(vector) => {
                self.store.set_embedding_if_absent(id, vector);
            }
            Err(e) => tracing::warn!(
                "Embedding failed for {}, left to the background worker: {}",
                id, e
            ),
        }
    }
}
