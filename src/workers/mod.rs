//! Queue-driven pipeline stages.
//!
//! Each stage is a [`MessageHandler`] consuming one queue: the extraction
//! stage turns object-created events into ingestion messages, and the ingest
//! stage turns ingestion messages into indexed vectors. Delivery is
//! at-least-once, so handlers are written to be safely re-runnable and report
//! a [`StageOutcome`] instead of panicking or swallowing failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::queue::WorkQueue;

pub mod extract;
pub mod ingest;

pub use extract::ExtractionWorker;
pub use ingest::IngestWorker;

/// Messages leased per receive call.
const RECEIVE_BATCH: usize = 10;

/// How long an idle worker sleeps before polling its queue again.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Outcome of handling one queued message.
///
/// The queue transport only distinguishes ack from nack, so both failure
/// variants lead to redelivery and eventually the dead-letter pool. Keeping
/// them separate still pays off in logs: a `Fatal` message will never succeed
/// no matter how often it is retried, and is reported as such.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The message was handled (or skipped on purpose) and can be settled.
    Completed,
    /// A dependency failed; redelivery may succeed.
    Retryable(String),
    /// The message itself is unusable; redelivery cannot succeed.
    Fatal(String),
}

impl StageOutcome {
    /// Whether the message was settled successfully.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Notification emitted when a verified upload lands in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectCreated {
    /// Bucket the object was written to.
    pub bucket: String,
    /// Key of the stored object.
    pub key: String,
}

/// Unit of work consumed by the ingest stage.
///
/// Produced either by the extraction stage (with `text` inlined) or by the
/// manual ingestion endpoint (without `text`, leaving the ingest stage to
/// fetch the object body).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestMessage {
    /// Bucket holding the source object; the configured bucket when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// Storage key of the source object.
    pub key: String,
    /// Stable document identifier.
    pub doc_id: String,
    /// Human-readable document title.
    pub title: String,
    /// Content type of the source object, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Extracted text, when the producing stage already has it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// One pipeline stage's message-handling logic.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Stage name used in consumer logs.
    fn stage(&self) -> &'static str;

    /// Handle one message body.
    async fn handle(&self, body: &str) -> StageOutcome;
}

/// Drain every currently ready message from `queue` through `handler`.
///
/// Each message is settled individually, so one failing message never blocks
/// the rest of a batch. Returns the number of deliveries handled; nacked
/// messages re-enter the ready pool and are picked up again within the same
/// call until they succeed or dead-letter.
pub async fn process_available(queue: &dyn WorkQueue, handler: &dyn MessageHandler) -> usize {
    let mut handled = 0;
    loop {
        let batch = match queue.receive(RECEIVE_BATCH).await {
            Ok(batch) => batch,
            Err(error) => {
                tracing::error!(stage = handler.stage(), error = %error, "Failed to receive messages");
                return handled;
            }
        };
        if batch.is_empty() {
            return handled;
        }

        for message in batch {
            let outcome = handler.handle(&message.body).await;
            handled += 1;
            let settled = match &outcome {
                StageOutcome::Completed => queue.ack(&message.id).await,
                StageOutcome::Retryable(reason) => {
                    tracing::warn!(
                        stage = handler.stage(),
                        receive_count = message.receive_count,
                        reason = %reason,
                        "Stage failed; message will be redelivered"
                    );
                    queue.nack(&message.id).await
                }
                StageOutcome::Fatal(reason) => {
                    tracing::error!(
                        stage = handler.stage(),
                        receive_count = message.receive_count,
                        reason = %reason,
                        "Message is unusable; nacking until it dead-letters"
                    );
                    queue.nack(&message.id).await
                }
            };
            if let Err(error) = settled {
                tracing::error!(stage = handler.stage(), error = %error, "Failed to settle message");
            }
        }
    }
}

/// Consume `queue` forever, idling `poll_interval` between empty polls.
pub async fn run(
    queue: Arc<dyn WorkQueue>,
    handler: Arc<dyn MessageHandler>,
    poll_interval: Duration,
) {
    tracing::info!(stage = handler.stage(), "Worker started");
    loop {
        let handled = process_available(queue.as_ref(), handler.as_ref()).await;
        if handled == 0 {
            tokio::time::sleep(poll_interval).await;
        }
    }
}
