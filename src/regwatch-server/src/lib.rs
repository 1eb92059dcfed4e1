//! regwatch - hybrid retrieval for compliance documents
//!
//! This crate provides both a library and binary for running regwatch.
//!
//! # Embedded Usage
//!
//! ```rust,no_run
//! use regwatch_core::*;
//! use std::sync::Arc;
//!
//! # async fn run(embedder: Arc<dyn Embedder>) {
//! let store = Arc::new(DocumentStore::new());
//! let cache = Arc::new(ResultCache::in_memory(1_000));
//! let searcher = HybridSearcher::new(store, embedder, cache);
//! let results = searcher.query("insider trading", Some(Jurisdiction::Us), 5).await;
//! # }
//! ```
//!
//! # Server Usage
//!
//! Run the binary to start the REST API server:
//! ```bash
//! regwatch-server
//! ```

pub use regwatch_core;

pub mod api;
pub mod telemetry;
