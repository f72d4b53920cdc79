//! In-process work queues with at-least-once delivery.
//!
//! Messages are leased by [`WorkQueue::receive`] and stay invisible until the
//! consumer settles them with `ack` or `nack`. A nacked message returns to the
//! ready pool for redelivery; once its receive count reaches the configured
//! maximum it is routed to the queue's dead-letter pool instead, where it can
//! be inspected but is never redelivered.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Receive-count ceiling applied when none is configured.
pub const DEFAULT_MAX_RECEIVE_COUNT: u32 = 3;

/// Errors produced by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The message id does not correspond to a leased message.
    #[error("unknown or already settled message: {0}")]
    UnknownMessage(String),
}

/// A message leased from a queue, held invisible until settled.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Lease id used to ack or nack this delivery.
    pub id: String,
    /// Message payload.
    pub body: String,
    /// How many times this message has been delivered, this delivery included.
    pub receive_count: u32,
}

/// A message that exhausted its deliveries without being acknowledged.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    /// Message payload.
    pub body: String,
    /// Deliveries consumed before the message was parked.
    pub receive_count: u32,
}

/// At-least-once delivery queue connecting pipeline stages.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueue a message for delivery.
    async fn send(&self, body: String) -> Result<(), QueueError>;

    /// Lease up to `max` ready messages. Leased messages are invisible to
    /// other consumers until settled.
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError>;

    /// Settle a message successfully, removing it from the queue.
    async fn ack(&self, id: &str) -> Result<(), QueueError>;

    /// Return a message for redelivery, or dead-letter it when its receive
    /// count has reached the configured maximum.
    async fn nack(&self, id: &str) -> Result<(), QueueError>;

    /// Messages parked in the dead-letter pool, oldest first.
    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError>;
}

struct Pending {
    id: String,
    body: String,
    receive_count: u32,
}

#[derive(Default)]
struct Inner {
    ready: VecDeque<Pending>,
    leased: HashMap<String, Pending>,
    dead: Vec<DeadLetter>,
}

/// Process-local queue. Contents do not survive a restart; durability comes
/// from the raw objects still sitting under the raw prefix.
pub struct MemoryQueue {
    name: String,
    max_receive_count: u32,
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    /// Create a queue. `name` appears in logs; `max_receive_count` caps deliveries per message.
    pub fn new(name: impl Into<String>, max_receive_count: u32) -> Self {
        Self {
            name: name.into(),
            max_receive_count: max_receive_count.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Number of messages currently ready for delivery.
    pub async fn ready_len(&self) -> usize {
        self.inner.lock().await.ready.len()
    }

    /// Number of messages parked in the dead-letter pool.
    pub async fn dead_len(&self) -> usize {
        self.inner.lock().await.dead.len()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn send(&self, body: String) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        inner.ready.push_back(Pending {
            id: Uuid::new_v4().to_string(),
            body,
            receive_count: 0,
        });
        Ok(())
    }

    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let mut inner = self.inner.lock().await;
        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(mut pending) = inner.ready.pop_front() else {
                break;
            };
            pending.receive_count += 1;
            batch.push(QueueMessage {
                id: pending.id.clone(),
                body: pending.body.clone(),
                receive_count: pending.receive_count,
            });
            inner.leased.insert(pending.id.clone(), pending);
        }
        Ok(batch)
    }

    async fn ack(&self, id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        inner
            .leased
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownMessage(id.to_string()))
    }

    async fn nack(&self, id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let pending = inner
            .leased
            .remove(id)
            .ok_or_else(|| QueueError::UnknownMessage(id.to_string()))?;
        if pending.receive_count >= self.max_receive_count {
            tracing::warn!(
                queue = %self.name,
                receive_count = pending.receive_count,
                "Message exhausted its deliveries; moving to dead-letter pool"
            );
            inner.dead.push(DeadLetter {
                body: pending.body,
                receive_count: pending.receive_count,
            });
        } else {
            inner.ready.push_back(pending);
        }
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        Ok(self.inner.lock().await.dead.clone())
    }
}
