use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use regwatch_core::*;
use regwatch_server::{api, telemetry};
use std::sync::Arc;
use std::time::Duration;
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> Result<()> {
    let _guard = telemetry::init_telemetry()?;

    let mut config = config::Config::load("config.json").unwrap_or_else(|_| {
        tracing::warn!("Failed to load config.json, using defaults");
        config::Config::default()
    });
    config.apply_env();

    tracing::info!("regwatch starting");
    tracing::info!("  Port: {}", config.port);
    tracing::info!("  Embedding URL: {}", config.embedding.url);
    tracing::info!("  Embedding dimensions: {}", config.embedding.dimensions);
    tracing::info!("  Embedding workers: {}", config.num_embedding_workers);
    tracing::info!(
        "  Features: embedding={}, embedding_job={}, cache={}, risk={}",
        config.features.embedding,
        config.features.embedding_job,
        config.features.embedding_cache,
        config.features.risk_analysis
    );
    tracing::info!(
        "  CORS: enabled={}, origins={:?}",
        config.cors.enabled,
        config.cors.allowed_origins
    );

    let cache = Arc::new(cache::ResultCache::connect(&config.cache).await);
    tracing::info!("✓ Cache initialized ({:?} backend)", cache.backend_kind());

    let store = Arc::new(store::DocumentStore::with_capacity_limit(
        config.store.max_documents,
    ));
    tracing::info!("✓ Document store initialized");

    let embedder: Arc<dyn Embedder> = if config.features.embedding {
        let base: Arc<dyn Embedder> = Arc::new(embedder::OpenAIEmbedder::new(&config.embedding)?);
        if config.features.embedding_cache {
            tracing::info!("✓ Embedding cache enabled");
            Arc::new(embedder::CachedEmbedder::new(
                base,
                cache.clone(),
                Duration::from_secs(config.embedding.cache_ttl_secs),
            ))
        } else {
            base
        }
    } else {
        tracing::warn!("Embedding disabled, queries rank on lexical score only");
        Arc::new(embedder::DisabledEmbedder::new(config.embedding.dimensions))
    };
    tracing::info!("✓ Embedder initialized");

    let searcher = Arc::new(
        search::HybridSearcher::new(store.clone(), embedder.clone(), cache.clone())
            .with_scoring(config.scoring)
            .with_query_ttl(Duration::from_secs(config.cache.query_ttl_secs)),
    );

    let mut ingestor = ingest::Ingestor::new(store.clone())
        .with_alert_sink(Arc::new(ingest::LogAlertSink))
        .with_alert_threshold(config.risk.alert_threshold)
        .defer_embedding(config.features.embedding_job);
    if config.features.embedding {
        ingestor = ingestor.with_embedder(embedder.clone());
    }
    if config.features.risk_analysis {
        ingestor = ingestor.with_classifier(Arc::new(risk::CachedRiskClassifier::new(
            Arc::new(risk::KeywordRiskClassifier),
            cache.clone(),
            Duration::from_secs(config.risk.cache_ttl_secs),
        )));
        tracing::info!("✓ Risk analysis enabled");
    }
    let ingestor = Arc::new(ingestor);

    // Also runs with embedding_job off, to retry failed synchronous embeddings
    let worker = if config.features.embedding {
        let worker = Arc::new(worker::BackgroundWorker::new(
            store.clone(),
            embedder.clone(),
            config.num_embedding_workers,
            Duration::from_secs(config.worker_interval_secs),
        ));
        let handle = worker.clone().start();
        tracing::info!("✓ Background embedding worker started");
        Some((worker, handle))
    } else {
        if config.features.embedding_job {
            tracing::warn!("embedding_job enabled but embedding disabled");
        }
        None
    };

    let app_state = web::Data::new(api::AppState {
        store,
        cache,
        searcher,
        ingestor,
    });

    tracing::info!("regwatch initialized successfully");

    let bind_addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("🚀 Starting HTTP server on {}", bind_addr);

    let cors_config = config.cors.clone();
    let server = HttpServer::new(move || {
        let mut cors = Cors::default();

        if cors_config.enabled {
            for origin in &cors_config.allowed_origins {
                cors = cors.allowed_origin(origin);
            }
            cors = cors
                .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
                .allowed_headers(vec![
                    actix_web::http::header::AUTHORIZATION,
                    actix_web::http::header::ACCEPT,
                    actix_web::http::header::CONTENT_TYPE,
                ])
                .max_age(3600);
        }

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(TracingLogger::default())
            .configure(api::configure)
    })
    .bind(&bind_addr)?
    .run();

    tracing::info!("Server running, press Ctrl+C to stop");

    server.await?;

    if let Some((worker, handle)) = worker {
        worker.stop();
        let _ = handle.await;
    }

    tracing::info!("regwatch stopped");
    Ok(())
}
