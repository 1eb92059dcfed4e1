//! regwatch Core Library
//!
//! This crate provides the retrieval engine behind regwatch, including:
//! - In-memory document store with two-phase visibility
//! - Hybrid scoring (embedding similarity + BM25-style lexical relevance)
//! - Ranked queries and latest-document listings
//! - Result caching over Redis with an in-process fallback
//! - Embedding generation, risk assessment and ingestion

pub mod cache;
pub mod config;
pub mod embedder;
pub mod ingest;
pub mod models;
pub mod risk;
pub mod scoring;
pub mod search;
pub mod store;
pub mod worker;

// Re-export commonly used types
pub use cache::ResultCache;
pub use config::Config;
pub use embedder::Embedder;
pub use ingest::{AlertSink, Ingestor};
pub use models::*;
pub use risk::RiskClassifier;
pub use search::HybridSearcher;
pub use store::DocumentStore;
pub use worker::BackgroundWorker;
