use rayon::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{query_key, ResultCache};
use crate::config::ScoringConfig;
use crate::embedder::Embedder;
use crate::models::{truncate_text, Jurisdiction, LatestDocument, QueryResult, RiskLevel};
use crate::scoring::{query_terms, score_document};
use crate::store::DocumentStore;

/// Characters of content kept in a listing summary
const SUMMARY_CHARS: usize = 150;

/// Hybrid search combining embedding similarity and lexical relevance
pub struct HybridSearcher {
    store: Arc<DocumentStore>,
    embedder: Arc<dyn Embedder>,
    cache: Arc<ResultCache>,
    scoring: ScoringConfig,
    query_ttl: Duration,
}

impl HybridSearcher {
    pub fn new(
        store: Arc<DocumentStore>,
        embedder: Arc<dyn Embedder>,
        cache: Arc<ResultCache>,
    ) -> Self {
        Self {
            store,
            embedder,
            cache,
            scoring: ScoringConfig::default(),
            query_ttl: Duration::from_secs(300),
        }
    }

    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_query_ttl(mut self, ttl: Duration) -> Self {
        self.query_ttl = ttl;
        self
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Ranked hybrid query. Never fails: degraded inputs give degraded rankings.
    pub async fn query(
        &self,
        text: &str,
        jurisdiction: Option<Jurisdiction>,
        top_k: usize,
    ) -> Vec<QueryResult> {
        if text.trim().is_empty() || top_k == 0 {
            return Vec::new();
        }

        let key = query_key(text, jurisdiction, top_k);
        if let Some(cached) = self.cache.get_json::<Vec<QueryResult>>(&key).await {
            tracing::debug!(results = cached.len(), "Serving cached query results");
            return cached;
        }

        let query_embedding = match self.embedder.embed(text).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!("Query embedding failed, ranking on lexical score only: {}", e);
                vec![0.0; self.embedder.dimensions()]
            }
        };

        let results = self.rank(text, &query_embedding, jurisdiction, top_k);

        self.cache.set_json(&key, &results, self.query_ttl).await;
        results
    }

    /// Like [`query`](Self::query), taking the jurisdiction as a code.
    /// An unrecognized code matches nothing.
    pub async fn query_code(
        &self,
        text: &str,
        jurisdiction: Option<&str>,
        top_k: usize,
    ) -> Vec<QueryResult> {
        match parse_jurisdiction(jurisdiction) {
            Ok(jurisdiction) => self.query(text, jurisdiction, top_k).await,
            Err(code) => {
                tracing::debug!("Unknown jurisdiction code {:?}, returning no results", code);
                Vec::new()
            }
        }
    }

    /// Score every searchable document against a prepared query embedding
    pub fn rank(
        &self,
        text: &str,
        query_embedding: &[f32],
        jurisdiction: Option<Jurisdiction>,
        top_k: usize,
    ) -> Vec<QueryResult> {
        let terms = query_terms(text);
        let candidates: Vec<_> = self
            .store
            .snapshot()
            .into_iter()
            .filter(|doc| jurisdiction.map_or(true, |j| doc.jurisdiction == j))
            .filter_map(|doc| self.store.get_embedding(&doc.id).map(|emb| (doc, emb)))
            .collect();

        let mut results: Vec<QueryResult> = candidates
            .par_iter()
            .map(|(doc, doc_embedding)| {
                let score = score_document(
                    query_embedding,
                    &terms,
                    doc_embedding,
                    &doc.content,
                    &self.scoring,
                );
                QueryResult {
                    id: doc.id.clone(),
                    title: doc.title.clone(),
                    date: doc.date.clone(),
                    source: doc.source.clone(),
                    jurisdiction: doc.jurisdiction,
                    score: score.combined,
                    risk_score: doc.risk_score,
                    excerpt: truncate_text(&doc.content, self.scoring.excerpt_chars),
                }
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        results.truncate(top_k);

        tracing::debug!(
            candidates = candidates.len(),
            returned = results.len(),
            "Ranked hybrid query"
        );
        results
    }

    /// Latest documents, newest first, filtered by jurisdiction, risk floor and text
    pub fn list_latest(
        &self,
        jurisdiction: Option<Jurisdiction>,
        min_risk: Option<RiskLevel>,
        search_text: Option<&str>,
        limit: usize,
    ) -> Vec<LatestDocument> {
        let min_score = min_risk.map_or(0.0, |level| level.threshold());
        let needle = search_text
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut docs: Vec<_> = self
            .store
            .snapshot()
            .into_iter()
            .filter(|doc| jurisdiction.map_or(true, |j| doc.jurisdiction == j))
            .filter(|doc| doc.risk_score >= min_score)
            .filter(|doc| match &needle {
                Some(needle) => {
                    doc.title.to_lowercase().contains(needle.as_str())
                        || doc.content.to_lowercase().contains(needle.as_str())
                        || doc
                            .keywords
                            .iter()
                            .any(|k| k.to_lowercase().contains(needle.as_str()))
                }
                None => true,
            })
            .collect();

        docs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));

        docs.into_iter()
            .take(limit)
            .map(|doc| LatestDocument {
                id: doc.id.clone(),
                title: doc.title.clone(),
                content: doc.content.clone(),
                date: doc.date.clone(),
                source: doc.source.clone(),
                jurisdiction: doc.jurisdiction,
                risk_score: doc.risk_score,
                keywords: doc.keywords.clone(),
                summary: truncate_text(&doc.content, SUMMARY_CHARS),
            })
            .collect()
    }

    /// Like [`list_latest`](Self::list_latest), taking string codes.
    /// An unknown jurisdiction matches nothing; an unknown risk label sets no floor.
    pub fn list_latest_codes(
        &self,
        jurisdiction: Option<&str>,
        min_risk: Option<&str>,
        search_text: Option<&str>,
        limit: usize,
    ) -> Vec<LatestDocument> {
        let Ok(jurisdiction) = parse_jurisdiction(jurisdiction) else {
            return Vec::new();
        };
        let min_risk = min_risk.and_then(|label| label.parse::<RiskLevel>().ok());
        self.list_latest(jurisdiction, min_risk, search_text, limit)
    }
}

/// Blank codes mean "no filter"
fn parse_jurisdiction(code: Option<&str>) -> Result<Option<Jurisdiction>, String> {
    match code.map(str::trim) {
        None | Some("") => Ok(None),
        Some(code) => code.parse().map(Some).map_err(|_| code.to_string()),
    }
}
