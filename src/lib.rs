#![deny(missing_docs)]

//! Core library for the askdocs document question-answering pipeline.

/// Question answering over indexed documents.
pub mod answer;
/// HTTP routing and REST handlers.
pub mod api;
/// Sliding-window text chunking.
pub mod chunking;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Text extraction from uploaded documents.
pub mod extraction;
/// Chat completion client abstraction and adapters.
pub mod generation;
/// Vector index abstraction and the Pinecone adapter.
pub mod index;
/// Document indexing shared by the ingest worker and the HTTP surface.
pub mod ingestion;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline metrics helpers.
pub mod metrics;
/// Work queues with leases and dead-letter capture.
pub mod queue;
/// Object storage abstraction and backends.
pub mod storage;
/// Signed upload URL issuing and verification.
pub mod upload;
/// Queue-driven pipeline stages.
pub mod workers;
