//! Shared indexing core: chunk a document, embed the chunks, store the vectors.
//!
//! Both ingestion entry points delegate here, so a document lands in the index
//! the same way whether it was posted inline over HTTP or pulled off the
//! ingest queue. Records are written under deterministic ids, which is what
//! makes indexing the same document twice overwrite instead of duplicate.

use std::sync::Arc;

use thiserror::Error;

use crate::chunking::chunk_text;
use crate::config::ChunkingConfig;
use crate::embedding::{EmbeddingClient, EmbeddingError};
use crate::index::{IndexError, RecordMetadata, VectorIndex, VectorRecord, record_id};
use crate::metrics::PipelineMetrics;

/// Errors produced while indexing a document.
#[derive(Debug, Error)]
pub enum IndexingError {
    /// Embedding the chunk batch failed.
    #[error("failed to embed chunks: {0}")]
    Embedding(#[from] EmbeddingError),
    /// The embedding backend answered with the wrong number of vectors.
    #[error("embedding count mismatch: {expected} chunks, {actual} vectors")]
    CountMismatch {
        /// Number of chunks sent for embedding.
        expected: usize,
        /// Number of vectors returned.
        actual: usize,
    },
    /// Writing the records to the vector index failed.
    #[error("vector upsert failed: {0}")]
    Upsert(#[from] IndexError),
}

/// Turns document text into indexed vectors and keeps the pipeline counters.
pub struct DocumentIndexer {
    embeddings: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    metrics: Arc<PipelineMetrics>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl DocumentIndexer {
    /// Assemble the indexer from its collaborators.
    pub fn new(
        embeddings: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        metrics: Arc<PipelineMetrics>,
        chunking: &ChunkingConfig,
    ) -> Self {
        Self {
            embeddings,
            index,
            metrics,
            chunk_size: chunking.chunk_size,
            chunk_overlap: chunking.chunk_overlap,
        }
    }

    /// Chunk `text`, embed the chunks, and upsert one record per chunk under
    /// `doc_id`. Returns the number of chunks indexed; text that yields no
    /// chunks indexes nothing and returns zero. `source_key` and
    /// `content_type` are carried into the record metadata when the document
    /// came through storage.
    pub async fn index_document(
        &self,
        doc_id: &str,
        title: &str,
        text: &str,
        source_key: Option<&str>,
        content_type: Option<&str>,
    ) -> Result<usize, IndexingError> {
        let chunks = chunk_text(text, self.chunk_size, self.chunk_overlap);
        if chunks.is_empty() {
            tracing::warn!(doc_id = %doc_id, "Document produced no chunks; nothing to index");
            return Ok(0);
        }

        // Clearing old vectors first keeps re-ingestion from stranding chunks
        // beyond the new document's length. Failure here is tolerated; the
        // upsert below overwrites every id the new document produces.
        if let Err(error) = self.index.delete_by_doc_id(doc_id).await {
            tracing::warn!(
                doc_id = %doc_id,
                error = %error,
                "Failed to clear existing vectors; continuing with upsert"
            );
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = self.embeddings.embed(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(IndexingError::CountMismatch {
                expected: chunks.len(),
                actual: embeddings.len(),
            });
        }

        let records: Vec<VectorRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, values)| VectorRecord {
                id: record_id(doc_id, chunk.index),
                values,
                metadata: RecordMetadata {
                    doc_id: doc_id.to_string(),
                    title: title.to_string(),
                    chunk_text: chunk.text,
                    chunk_index: chunk.index,
                    source_key: source_key.map(str::to_string),
                    content_type: content_type.map(str::to_string),
                },
            })
            .collect();
        self.index.upsert(&records).await?;

        self.metrics.record_document(records.len() as u64);
        tracing::info!(doc_id = %doc_id, chunks = records.len(), "Document indexed");
        Ok(records.len())
    }
}
