use actix_web::{web, HttpResponse, Result as ActixResult};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use regwatch_core::cache::{BackendKind, CacheStats, ResultCache};
use regwatch_core::ingest::Ingestor;
use regwatch_core::models::{
    ErrorResponse, IngestRequest, LatestQuery, QueryRequest, QueryResponse, SetEmbeddingRequest,
};
use regwatch_core::search::HybridSearcher;
use regwatch_core::store::{DocumentStore, StoreStats};

/// Shared application state
pub struct AppState {
    pub store: Arc<DocumentStore>,
    pub cache: Arc<ResultCache>,
    pub searcher: Arc<HybridSearcher>,
    pub ingestor: Arc<Ingestor>,
}

/// Statistics response
#[derive(Serialize)]
pub struct StatsResponse {
    pub store: StoreStats,
    pub cache: CacheStats,
    pub cache_backend: BackendKind,
    pub cache_hit_rate: f64,
}

fn not_found(what: &str) -> HttpResponse {
    HttpResponse::NotFound().json(ErrorResponse {
        error: format!("{} not found", what),
        message: None,
    })
}

/// Ranked hybrid query
/// POST /query
#[tracing::instrument(skip(req, state), fields(top_k = req.top_k))]
pub async fn query(
    req: web::Json<QueryRequest>,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let req = req.into_inner();
    tracing::debug!(query_len = req.query.len(), "Running hybrid query");

    let results = state
        .searcher
        .query_code(&req.query, req.jurisdiction.as_deref(), req.top_k)
        .await;

    let total = results.len();
    Ok(HttpResponse::Ok().json(QueryResponse {
        query: req.query,
        results,
        total,
    }))
}

/// Latest documents, newest first
/// GET /documents/latest?jurisdiction=&min_risk=&search=&limit=
#[tracing::instrument(skip(params, state))]
pub async fn latest_documents(
    params: web::Query<LatestQuery>,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let params = params.into_inner();
    let documents = state.searcher.list_latest_codes(
        params.jurisdiction.as_deref(),
        params.min_risk.as_deref(),
        params.search.as_deref(),
        params.limit.unwrap_or(LatestQuery::DEFAULT_LIMIT),
    );

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "documents": documents,
        "total": documents.len(),
    })))
}

/// Ingest or replace a document
/// POST /documents
#[tracing::instrument(skip(req, state))]
pub async fn ingest_document(
    req: web::Json<IngestRequest>,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    if req.content.trim().is_empty() {
        return Ok(HttpResponse::BadRequest().json(ErrorResponse {
            error: "content is required".to_string(),
            message: None,
        }));
    }

    match state.ingestor.ingest(req.into_inner()).await {
        Ok(doc) => {
            tracing::info!(doc_id = %doc.id, "Document ingested");
            Ok(HttpResponse::Created().json(doc))
        }
        Err(e) => {
            tracing::error!("Failed to ingest document: {}", e);
            Ok(HttpResponse::InternalServerError().json(ErrorResponse {
                error: "failed to ingest document".to_string(),
                message: Some(e.to_string()),
            }))
        }
    }
}

/// Get a document by ID
/// GET /documents/{id}
#[tracing::instrument(skip(path, state))]
pub async fn get_document(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let id = path.into_inner();
    match state.store.get(&id) {
        Some(doc) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "document": doc.as_ref(),
            "visibility": state.store.visibility(&id),
        }))),
        None => {
            tracing::debug!(doc_id = %id, "Document not found");
            Ok(not_found("document"))
        }
    }
}

/// Delete a document and its embedding
/// DELETE /documents/{id}
#[tracing::instrument(skip(path, state))]
pub async fn delete_document(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let id = path.into_inner();
    match state.store.remove(&id) {
        Some(_) => {
            tracing::info!(doc_id = %id, "Document deleted");
            Ok(HttpResponse::NoContent().finish())
        }
        None => Ok(not_found("document")),
    }
}

/// Replace a document's embedding
/// PUT /documents/{id}/embedding
#[tracing::instrument(skip(path, req, state))]
pub async fn set_embedding(
    path: web::Path<String>,
    req: web::Json<SetEmbeddingRequest>,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let id = path.into_inner();
    let vector = req.into_inner().vector;
    if vector.is_empty() {
        return Ok(HttpResponse::BadRequest().json(ErrorResponse {
            error: "vector is required".to_string(),
            message: None,
        }));
    }

    let dimensions = vector.len();
    if state.ingestor.set_embedding(&id, vector) {
        tracing::debug!(doc_id = %id, dimensions, "Embedding replaced");
        Ok(HttpResponse::NoContent().finish())
    } else {
        Ok(not_found("document"))
    }
}

/// Store and cache statistics
/// GET /stats
pub async fn stats(state: web::Data<AppState>) -> ActixResult<HttpResponse> {
    let cache = state.cache.stats();
    Ok(HttpResponse::Ok().json(StatsResponse {
        store: state.store.stats(),
        cache_hit_rate: cache.hit_rate(),
        cache,
        cache_backend: state.cache.backend_kind(),
    }))
}

/// Health check
/// GET /health
pub async fn health() -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now()
    })))
}

/// Configure routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/documents")
            // Named routes before the {id} pattern
            .route("/latest", web::get().to(latest_documents))
            .route("", web::post().to(ingest_document))
            .route("/{id}/embedding", web::put().to(set_embedding))
            .route("/{id}", web::get().to(get_document))
            .route("/{id}", web::delete().to(delete_document)),
    )
    .route("/query", web::post().to(query))
    .route("/stats", web::get().to(stats))
    .route("/health", web::get().to(health));
}
