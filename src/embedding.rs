//! Embedding generation for chunks and questions.
//!
//! Both ingestion and question answering embed text through the same
//! [`EmbeddingClient`] seam. The production implementation talks to an
//! OpenAI-compatible `/embeddings` endpoint; tests substitute deterministic
//! stubs.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::OpenAiConfig;

/// Errors produced while generating embeddings.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The HTTP request could not be performed.
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The embedding service answered with a non-success status.
    #[error("embedding service returned {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Response body.
        body: String,
    },
    /// The service returned a different number of vectors than inputs.
    #[error("embedding count mismatch: {expected} inputs, {actual} vectors")]
    CountMismatch {
        /// Number of texts submitted.
        expected: usize,
        /// Number of vectors returned.
        actual: usize,
    },
}

/// Produces one embedding vector per input text.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a batch of texts, preserving input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Client for an OpenAI-compatible embeddings endpoint.
pub struct OpenAiEmbeddings {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: Option<usize>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiEmbeddings {
    /// Construct a client from OpenAI settings.
    pub fn new(config: &OpenAiConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder().user_agent("askdocs/0.1").build()?;
        let endpoint = format!("{}/embeddings", config.base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            model: config.embed_model.clone(),
            dimensions: config.embed_dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = EmbeddingError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Embedding request failed");
            return Err(error);
        }

        let mut payload: EmbeddingResponse = response.json().await?;
        // The API is allowed to return entries out of order; restore input order.
        payload.data.sort_by_key(|entry| entry.index);
        if payload.data.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: payload.data.len(),
            });
        }
        Ok(payload.data.into_iter().map(|entry| entry.embedding).collect())
    }
}
