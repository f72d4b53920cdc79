//! Plain-text extraction from uploaded documents.
//!
//! Extraction happens over HTTP against an Apache Tika server: the raw bytes
//! are PUT to `/tika` with their content type and Tika responds with the
//! document's text. The [`TextExtractor`] trait keeps the pipeline testable
//! without a running Tika instance.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use thiserror::Error;

use crate::config::ExtractionConfig;
use crate::storage::DEFAULT_CONTENT_TYPE;

/// Errors produced while extracting text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The HTTP request could not be performed.
    #[error("extraction request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The extraction service answered with a non-success status.
    #[error("extraction service returned {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Response body, useful for diagnosing parser failures.
        body: String,
    },
}

/// Converts raw document bytes into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract the plain text of a document given its bytes and content type.
    async fn extract(&self, body: &[u8], content_type: &str) -> Result<String, ExtractionError>;
}

/// HTTP client for an Apache Tika server.
pub struct TikaClient {
    client: Client,
    endpoint: String,
}

impl TikaClient {
    /// Construct a client for the configured Tika server.
    pub fn new(config: &ExtractionConfig) -> Result<Self, ExtractionError> {
        let client = Client::builder().user_agent("askdocs/0.1").build()?;
        let endpoint = format!("{}/tika", config.tika_url.trim_end_matches('/'));
        tracing::debug!(endpoint = %endpoint, "Initialized Tika client");
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl TextExtractor for TikaClient {
    async fn extract(&self, body: &[u8], content_type: &str) -> Result<String, ExtractionError> {
        let content_type = if content_type.is_empty() {
            DEFAULT_CONTENT_TYPE
        } else {
            content_type
        };
        let response = self
            .client
            .put(&self.endpoint)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::ACCEPT, "text/plain")
            .body(body.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = ExtractionError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Text extraction failed");
            return Err(error);
        }
        Ok(response.text().await?)
    }
}
