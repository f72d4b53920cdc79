//! Extraction stage: object-created events in, ingestion messages out.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{IngestMessage, MessageHandler, ObjectCreated, StageOutcome};
use crate::config::StorageConfig;
use crate::extraction::TextExtractor;
use crate::metrics::PipelineMetrics;
use crate::queue::WorkQueue;
use crate::storage::ObjectStore;

/// Metadata keys consulted, in order, for a document id.
const DOC_ID_KEYS: [&str; 3] = ["doc-id", "docid", "documentid"];

/// Consumes object-created events, extracts text, and queues ingestion work.
pub struct ExtractionWorker {
    storage: Arc<dyn ObjectStore>,
    extractor: Arc<dyn TextExtractor>,
    ingest_queue: Arc<dyn WorkQueue>,
    metrics: Arc<PipelineMetrics>,
    raw_prefix: String,
}

impl ExtractionWorker {
    /// Assemble the stage from its collaborators.
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        extractor: Arc<dyn TextExtractor>,
        ingest_queue: Arc<dyn WorkQueue>,
        metrics: Arc<PipelineMetrics>,
        config: &StorageConfig,
    ) -> Self {
        Self {
            storage,
            extractor,
            ingest_queue,
            metrics,
            raw_prefix: config.raw_prefix.clone(),
        }
    }

    async fn process(&self, event: ObjectCreated) -> StageOutcome {
        let key = decode_object_key(&event.key);
        if !key.starts_with(&self.raw_prefix) {
            tracing::debug!(bucket = %event.bucket, key = %key, "Skipping object outside the raw prefix");
            return StageOutcome::Completed;
        }

        let object = match self.storage.get(&event.bucket, &key).await {
            Ok(object) => object,
            Err(error) => {
                return StageOutcome::Retryable(format!(
                    "failed to fetch {}/{key}: {error}",
                    event.bucket
                ));
            }
        };
        if object.body.is_empty() {
            return StageOutcome::Retryable(format!("empty object body at {}/{key}", event.bucket));
        }

        let doc_id = resolve_doc_id(&object.metadata, &key);
        let title = object
            .metadata
            .get("title")
            .map(|title| title.trim())
            .filter(|title| !title.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| doc_id.clone());
        let content_type = object.content_type_or_default().to_string();

        let text = match self.extractor.extract(object.bytes(), &content_type).await {
            Ok(text) => text,
            Err(error) => {
                return StageOutcome::Retryable(format!(
                    "extraction failed for {}/{key}: {error}",
                    event.bucket
                ));
            }
        };
        if text.trim().is_empty() {
            return StageOutcome::Retryable(format!(
                "extraction produced no text for {}/{key}",
                event.bucket
            ));
        }

        let message = IngestMessage {
            bucket: Some(event.bucket.clone()),
            key: key.clone(),
            doc_id,
            title,
            content_type: Some(content_type),
            text: Some(text),
        };
        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(error) => {
                return StageOutcome::Retryable(format!("failed to encode ingestion message: {error}"));
            }
        };
        if let Err(error) = self.ingest_queue.send(payload).await {
            return StageOutcome::Retryable(format!("failed to queue ingestion message: {error}"));
        }

        self.metrics.record_extraction();
        tracing::info!(
            bucket = %event.bucket,
            key = %key,
            doc_id = %message.doc_id,
            "Queued ingestion message"
        );
        StageOutcome::Completed
    }
}

#[async_trait]
impl MessageHandler for ExtractionWorker {
    fn stage(&self) -> &'static str {
        "extract"
    }

    async fn handle(&self, body: &str) -> StageOutcome {
        let event: ObjectCreated = match serde_json::from_str(body) {
            Ok(event) => event,
            Err(error) => {
                return StageOutcome::Fatal(format!("malformed object-created event: {error}"));
            }
        };
        self.process(event).await
    }
}

/// Resolve a document id from object metadata, falling back to the filename
/// with its extension stripped.
fn resolve_doc_id(metadata: &HashMap<String, String>, key: &str) -> String {
    DOC_ID_KEYS
        .iter()
        .find_map(|name| metadata.get(*name))
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| doc_id_from_key(key))
}

fn doc_id_from_key(key: &str) -> String {
    let basename = key
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("document");
    match basename.rfind('.') {
        Some(position) if position + 1 < basename.len() => basename[..position].to_string(),
        _ => basename.to_string(),
    }
}

/// Undo the URL-style encoding notification keys arrive with: `+` means space
/// and `%XX` escapes cover the rest. Invalid escapes are kept verbatim.
fn decode_object_key(key: &str) -> String {
    let bytes = key.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut position = 0;
    while position < bytes.len() {
        match bytes[position] {
            b'+' => {
                decoded.push(b' ');
                position += 1;
            }
            b'%' if position + 2 < bytes.len() => {
                match (hex_value(bytes[position + 1]), hex_value(bytes[position + 2])) {
                    (Some(high), Some(low)) => {
                        decoded.push(high * 16 + low);
                        position += 3;
                    }
                    _ => {
                        decoded.push(b'%');
                        position += 1;
                    }
                }
            }
            byte => {
                decoded.push(byte);
                position += 1;
            }
        }
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|value| value as u8)
}
