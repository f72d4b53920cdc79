//! Vector index boundary.
//!
//! Chunk embeddings are stored under deterministic ids so that re-ingesting a
//! document overwrites its previous vectors instead of accumulating
//! duplicates. The [`VectorIndex`] trait is the seam between the pipeline and
//! the index; [`PineconeIndex`] implements it over the Pinecone data-plane
//! REST API.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod pinecone;

pub use pinecone::PineconeIndex;

/// Errors produced by vector index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The HTTP request could not be performed.
    #[error("index request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The index answered with a non-success status.
    #[error("index returned {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the index.
        status: StatusCode,
        /// Response body.
        body: String,
    },
    /// The configured index URL could not be parsed.
    #[error("invalid index URL: {0}")]
    InvalidUrl(String),
}

/// Metadata stored alongside each vector and carried back by queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    /// Stable identifier of the source document.
    pub doc_id: String,
    /// Human-readable document title.
    pub title: String,
    /// The chunk's text, stored so answers can quote it without refetching.
    pub chunk_text: String,
    /// Zero-based position of the chunk within the document.
    pub chunk_index: usize,
    /// Storage key the document was ingested from. Absent for documents
    /// posted inline, which never touch storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,
    /// Content type of the source object. Absent for documents posted inline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// One embedding plus its metadata, addressed by a deterministic id.
#[derive(Debug, Clone, Serialize)]
pub struct VectorRecord {
    /// Record id, see [`record_id`].
    pub id: String,
    /// Embedding vector.
    pub values: Vec<f32>,
    /// Metadata carried with the vector.
    pub metadata: RecordMetadata,
}

/// A ranked match returned from a similarity query.
#[derive(Debug, Clone)]
pub struct QueryMatch {
    /// Record id of the match.
    pub id: String,
    /// Similarity score assigned by the index.
    pub score: f32,
    /// Metadata stored with the record, when the index returned any.
    pub metadata: Option<Map<String, Value>>,
}

/// Deterministic record id for a chunk: `{doc_id}#chunk-{n}` with a one-based
/// suffix. Identical input positions always map to the same id, which is what
/// makes re-ingestion overwrite instead of duplicate.
pub fn record_id(doc_id: &str, chunk_index: usize) -> String {
    format!("{doc_id}#chunk-{}", chunk_index + 1)
}

/// Stores, replaces, and queries chunk embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Delete every vector whose metadata `docId` equals `doc_id`.
    async fn delete_by_doc_id(&self, doc_id: &str) -> Result<(), IndexError>;

    /// Insert or overwrite a batch of records.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), IndexError>;

    /// Return the `top_k` records most similar to `vector`, metadata included.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<QueryMatch>, IndexError>;
}
