//! Ingest stage: index queued documents and relocate their objects.

use std::sync::Arc;

use async_trait::async_trait;

use super::{IngestMessage, MessageHandler, StageOutcome};
use crate::config::StorageConfig;
use crate::ingestion::DocumentIndexer;
use crate::storage::{DEFAULT_CONTENT_TYPE, ObjectStore};

/// Consumes ingestion messages and turns documents into indexed vectors.
pub struct IngestWorker {
    storage: Arc<dyn ObjectStore>,
    indexer: Arc<DocumentIndexer>,
    default_bucket: String,
    raw_prefix: String,
    done_prefix: String,
}

impl IngestWorker {
    /// Assemble the stage from its collaborators.
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        indexer: Arc<DocumentIndexer>,
        storage_config: &StorageConfig,
    ) -> Self {
        Self {
            storage,
            indexer,
            default_bucket: storage_config.bucket.clone(),
            raw_prefix: storage_config.raw_prefix.clone(),
            done_prefix: storage_config.done_prefix.clone(),
        }
    }

    async fn process(&self, message: IngestMessage) -> StageOutcome {
        let bucket = message
            .bucket
            .as_deref()
            .map(str::trim)
            .filter(|bucket| !bucket.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.default_bucket.clone());
        let key = message.key.trim().to_string();
        let doc_id = message.doc_id.trim().to_string();
        let title = message.title.trim().to_string();
        if key.is_empty() || doc_id.is_empty() || title.is_empty() {
            return StageOutcome::Fatal("ingestion message missing key, docId, or title".into());
        }

        let inline_text = message
            .text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string);
        let supplied_content_type = message
            .content_type
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let mut content_type = supplied_content_type
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let text = match &inline_text {
            Some(text) => text.clone(),
            None => {
                let object = match self.storage.get(&bucket, &key).await {
                    Ok(object) => object,
                    Err(error) => {
                        return StageOutcome::Retryable(format!(
                            "failed to fetch {bucket}/{key}: {error}"
                        ));
                    }
                };
                if supplied_content_type.is_none() {
                    content_type = object.content_type_or_default().to_string();
                }
                let fetched = object.text();
                if fetched.trim().is_empty() {
                    return StageOutcome::Retryable(format!("empty content at {bucket}/{key}"));
                }
                fetched
            }
        };

        // Raw bytes of binary formats would be garbage to chunk. Only text
        // content may be indexed straight from storage; everything else must
        // arrive with text the extraction stage already produced.
        if !content_type.starts_with("text/") {
            if inline_text.is_none() {
                return StageOutcome::Fatal(format!(
                    "no extracted text for non-text content {content_type} at {bucket}/{key}"
                ));
            }
            tracing::warn!(
                bucket = %bucket,
                key = %key,
                content_type = %content_type,
                "Indexing inline text supplied for non-text content"
            );
        }

        let indexed = match self
            .indexer
            .index_document(
                &doc_id,
                &title,
                &text,
                Some(key.as_str()),
                Some(content_type.as_str()),
            )
            .await
        {
            Ok(indexed) => indexed,
            Err(error) => return StageOutcome::Retryable(error.to_string()),
        };
        if indexed == 0 {
            return StageOutcome::Completed;
        }

        // Relocation runs strictly after a successful upsert so a crash in
        // between leaves the document under the raw prefix, where redelivery
        // can still find it.
        if key.starts_with(&self.raw_prefix) {
            let destination = format!("{}{}", self.done_prefix, &key[self.raw_prefix.len()..]);
            if let Err(error) = self.storage.copy(&bucket, &key, &destination).await {
                return StageOutcome::Retryable(format!(
                    "failed to copy {bucket}/{key} to {destination}: {error}"
                ));
            }
            if let Err(error) = self.storage.delete(&bucket, &key).await {
                return StageOutcome::Retryable(format!(
                    "failed to delete {bucket}/{key} after copy: {error}"
                ));
            }
            tracing::info!(bucket = %bucket, key = %key, destination = %destination, "Relocated indexed object");
        }

        StageOutcome::Completed
    }
}

#[async_trait]
impl MessageHandler for IngestWorker {
    fn stage(&self) -> &'static str {
        "ingest"
    }

    async fn handle(&self, body: &str) -> StageOutcome {
        let message: IngestMessage = match serde_json::from_str(body) {
            Ok(message) => message,
            Err(error) => {
                return StageOutcome::Fatal(format!("malformed ingestion message: {error}"));
            }
        };
        self.process(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkingConfig, StorageConfig};
    use crate::embedding::{EmbeddingClient, EmbeddingError};
    use crate::index::{IndexError, QueryMatch, VectorIndex, VectorRecord};
    use crate::metrics::PipelineMetrics;
    use crate::storage::{MemoryStore, StoredObject};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct StubEmbeddings;

    #[async_trait]
    impl EmbeddingClient for StubEmbeddings {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|text| vec![text.len() as f32]).collect())
        }
    }

    struct FailingEmbeddings;

    #[async_trait]
    impl EmbeddingClient for FailingEmbeddings {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: 0,
            })
        }
    }

    /// Vector index that records mutations in memory.
    #[derive(Default)]
    struct RecordingIndex {
        records: Mutex<HashMap<String, VectorRecord>>,
        deletes: Mutex<Vec<String>>,
    }

    impl RecordingIndex {
        fn ids(&self) -> Vec<String> {
            let mut ids: Vec<String> = self.records.lock().unwrap().keys().cloned().collect();
            ids.sort();
            ids
        }

        fn record(&self, id: &str) -> VectorRecord {
            self.records.lock().unwrap().get(id).cloned().unwrap()
        }
    }

    #[async_trait]
    impl VectorIndex for RecordingIndex {
        async fn delete_by_doc_id(&self, doc_id: &str) -> Result<(), IndexError> {
            self.deletes.lock().unwrap().push(doc_id.to_string());
            self.records
                .lock()
                .unwrap()
                .retain(|_, record| record.metadata.doc_id != doc_id);
            Ok(())
        }

        async fn upsert(&self, records: &[VectorRecord]) -> Result<(), IndexError> {
            let mut stored = self.records.lock().unwrap();
            for record in records {
                stored.insert(record.id.clone(), record.clone());
            }
            Ok(())
        }

        async fn query(&self, _vector: &[f32], _top_k: usize) -> Result<Vec<QueryMatch>, IndexError> {
            Ok(Vec::new())
        }
    }

    fn storage_config() -> StorageConfig {
        StorageConfig {
            root: PathBuf::from("unused"),
            bucket: "documents".into(),
            raw_prefix: "raw/".into(),
            done_prefix: "done/".into(),
        }
    }

    fn worker(
        storage: Arc<MemoryStore>,
        embeddings: Arc<dyn EmbeddingClient>,
        index: Arc<RecordingIndex>,
    ) -> IngestWorker {
        let indexer = Arc::new(DocumentIndexer::new(
            embeddings,
            index,
            Arc::new(PipelineMetrics::new()),
            &ChunkingConfig {
                chunk_size: 40,
                chunk_overlap: 8,
            },
        ));
        IngestWorker::new(storage, indexer, &storage_config())
    }

    fn message(key: &str, text: Option<&str>, content_type: Option<&str>) -> String {
        serde_json::to_string(&IngestMessage {
            bucket: Some("documents".into()),
            key: key.into(),
            doc_id: "doc-1".into(),
            title: "Policy".into(),
            content_type: content_type.map(str::to_string),
            text: text.map(str::to_string),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn indexes_inline_text_and_relocates_the_object() {
        let storage = Arc::new(MemoryStore::new());
        let index = Arc::new(RecordingIndex::default());
        storage
            .put(
                "documents",
                "raw/policy.pdf",
                StoredObject::new(b"%PDF".to_vec(), Some("application/pdf".into())),
            )
            .await
            .unwrap();
        let worker = worker(storage.clone(), Arc::new(StubEmbeddings), index.clone());

        let text = "Refunds are honored for thirty days after purchase in every region we operate in.";
        let outcome = worker
            .handle(&message("raw/policy.pdf", Some(text), Some("application/pdf")))
            .await;
        assert!(outcome.is_completed());

        let ids = index.ids();
        assert_eq!(ids, vec!["doc-1#chunk-1", "doc-1#chunk-2", "doc-1#chunk-3"]);
        let first = index.record("doc-1#chunk-1");
        assert_eq!(first.metadata.doc_id, "doc-1");
        assert_eq!(first.metadata.title, "Policy");
        assert_eq!(first.metadata.chunk_index, 0);
        assert_eq!(first.metadata.source_key.as_deref(), Some("raw/policy.pdf"));
        assert_eq!(first.metadata.content_type.as_deref(), Some("application/pdf"));
        assert!(!first.metadata.chunk_text.is_empty());

        assert!(!storage.contains("documents", "raw/policy.pdf").await);
        assert!(storage.contains("documents", "done/policy.pdf").await);
    }

    #[tokio::test]
    async fn fetches_text_objects_from_storage() {
        let storage = Arc::new(MemoryStore::new());
        let index = Arc::new(RecordingIndex::default());
        storage
            .put(
                "documents",
                "raw/notes.txt",
                StoredObject::new(b"Plain text notes about the rollout.".to_vec(), Some("text/plain".into())),
            )
            .await
            .unwrap();
        let worker = worker(storage.clone(), Arc::new(StubEmbeddings), index.clone());

        let outcome = worker.handle(&message("raw/notes.txt", None, None)).await;
        assert!(outcome.is_completed());
        assert_eq!(index.ids(), vec!["doc-1#chunk-1"]);
        assert_eq!(
            index.record("doc-1#chunk-1").metadata.content_type.as_deref(),
            Some("text/plain")
        );
        assert!(storage.contains("documents", "done/notes.txt").await);
    }

    #[tokio::test]
    async fn re_ingestion_clears_previous_vectors_first() {
        let storage = Arc::new(MemoryStore::new());
        let index = Arc::new(RecordingIndex::default());
        let worker = worker(storage.clone(), Arc::new(StubEmbeddings), index.clone());

        let long_text = "word ".repeat(40);
        let outcome = worker
            .handle(&message("archive/policy.txt", Some(&long_text), Some("text/plain")))
            .await;
        assert!(outcome.is_completed());
        assert!(index.ids().len() > 1);

        let outcome = worker
            .handle(&message("archive/policy.txt", Some("Tiny update."), Some("text/plain")))
            .await;
        assert!(outcome.is_completed());

        assert_eq!(index.ids(), vec!["doc-1#chunk-1"]);
        assert_eq!(index.deletes.lock().unwrap().as_slice(), ["doc-1", "doc-1"]);
    }

    #[tokio::test]
    async fn keys_outside_the_raw_prefix_are_not_relocated() {
        let storage = Arc::new(MemoryStore::new());
        let index = Arc::new(RecordingIndex::default());
        storage
            .put(
                "documents",
                "archive/notes.txt",
                StoredObject::new(b"Archived notes.".to_vec(), Some("text/plain".into())),
            )
            .await
            .unwrap();
        let worker = worker(storage.clone(), Arc::new(StubEmbeddings), index.clone());

        let outcome = worker.handle(&message("archive/notes.txt", None, None)).await;
        assert!(outcome.is_completed());
        assert!(storage.contains("documents", "archive/notes.txt").await);
        assert!(!storage.contains("documents", "done/notes.txt").await);
    }

    #[tokio::test]
    async fn non_text_content_without_inline_text_is_fatal() {
        let storage = Arc::new(MemoryStore::new());
        let index = Arc::new(RecordingIndex::default());
        storage
            .put(
                "documents",
                "raw/image.png",
                StoredObject::new(b"\x89PNG\r\n".to_vec(), Some("image/png".into())),
            )
            .await
            .unwrap();
        let worker = worker(storage.clone(), Arc::new(StubEmbeddings), index.clone());

        let outcome = worker.handle(&message("raw/image.png", None, None)).await;
        assert!(matches!(outcome, StageOutcome::Fatal(_)));
        assert!(index.ids().is_empty());
        assert!(storage.contains("documents", "raw/image.png").await);
    }

    #[tokio::test]
    async fn missing_required_fields_are_fatal() {
        let storage = Arc::new(MemoryStore::new());
        let index = Arc::new(RecordingIndex::default());
        let worker = worker(storage, Arc::new(StubEmbeddings), index);

        let body = serde_json::json!({
            "key": "raw/a.txt",
            "docId": "   ",
            "title": "Policy",
        })
        .to_string();
        let outcome = worker.handle(&body).await;
        assert!(matches!(outcome, StageOutcome::Fatal(_)));
    }

    #[tokio::test]
    async fn embedding_failure_is_retryable_and_leaves_the_object() {
        let storage = Arc::new(MemoryStore::new());
        let index = Arc::new(RecordingIndex::default());
        storage
            .put(
                "documents",
                "raw/notes.txt",
                StoredObject::new(b"Some notes.".to_vec(), Some("text/plain".into())),
            )
            .await
            .unwrap();
        let worker = worker(storage.clone(), Arc::new(FailingEmbeddings), index.clone());

        let outcome = worker.handle(&message("raw/notes.txt", None, None)).await;
        assert!(matches!(outcome, StageOutcome::Retryable(_)));
        assert!(index.ids().is_empty());
        assert!(storage.contains("documents", "raw/notes.txt").await);
    }

    #[tokio::test]
    async fn blank_fetched_content_is_retryable() {
        let storage = Arc::new(MemoryStore::new());
        let index = Arc::new(RecordingIndex::default());
        storage
            .put(
                "documents",
                "raw/blank.txt",
                StoredObject::new(b"   \n\t  ".to_vec(), Some("text/plain".into())),
            )
            .await
            .unwrap();
        let worker = worker(storage.clone(), Arc::new(StubEmbeddings), index.clone());

        let outcome = worker.handle(&message("raw/blank.txt", None, None)).await;
        assert!(matches!(outcome, StageOutcome::Retryable(_)));
        assert!(index.ids().is_empty());
    }

    #[tokio::test]
    async fn malformed_message_is_fatal() {
        let storage = Arc::new(MemoryStore::new());
        let index = Arc::new(RecordingIndex::default());
        let worker = worker(storage, Arc::new(StubEmbeddings), index);

        let outcome = worker.handle("{\"key\": 42}").await;
        assert!(matches!(outcome, StageOutcome::Fatal(_)));
    }
}
