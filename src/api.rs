//! HTTP surface for askdocs.
//!
//! This module exposes a compact Axum router with a handful of endpoints:
//!
//! - `POST /uploads` – Authorize an upload: validate the key and expiry, and return a
//!   signed, time-limited PUT URL.
//! - `PUT /objects/:bucket/*key` – Accept a document body on a signed URL, store it, and
//!   emit an object-created event for the extraction stage.
//! - `POST /ingest` – Index documents posted inline in the request, synchronously.
//! - `POST /ingest/request` – Queue a document already in storage for ingestion,
//!   bypassing upload and extraction.
//! - `POST /ask` – Answer a question from indexed documents, citing sources.
//! - `GET /metrics` – Observe pipeline counters.
//! - `GET /dlq` – Inspect messages that exhausted their deliveries.
//!
//! Every error response carries a JSON body of the form `{"error": "..."}`, and every
//! response carries permissive CORS headers so browser frontends can call the API
//! directly.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, Request, State},
    extract::rejection::{JsonRejection, QueryRejection},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::answer::{Answer, AnswerService, AskError};
use crate::ingestion::{DocumentIndexer, IndexingError};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::queue::{DeadLetter, WorkQueue};
use crate::storage::{DEFAULT_CONTENT_TYPE, ObjectStore, StorageError, StoredObject};
use crate::upload::{DEFAULT_EXPIRY_SECONDS, SignedUpload, UploadAuthorizer, UploadError};
use crate::workers::{IngestMessage, ObjectCreated};

/// Prefix marking upload headers that become object metadata.
const META_HEADER_PREFIX: &str = "x-meta-";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Question-answering service.
    pub answers: Arc<AnswerService>,
    /// Issues and verifies signed upload URLs.
    pub authorizer: Arc<UploadAuthorizer>,
    /// Object storage uploads land in.
    pub storage: Arc<dyn ObjectStore>,
    /// Queue carrying object-created events to the extraction stage.
    pub events_queue: Arc<dyn WorkQueue>,
    /// Queue carrying ingestion messages to the ingest stage.
    pub ingest_queue: Arc<dyn WorkQueue>,
    /// Indexes documents posted inline, without touching storage or queues.
    pub indexer: Arc<DocumentIndexer>,
    /// Pipeline counters.
    pub metrics: Arc<PipelineMetrics>,
    /// Bucket uploads are authorized into.
    pub default_bucket: String,
}

/// Build the HTTP router exposing the pipeline API surface.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/uploads", post(authorize_upload))
        .route("/objects/:bucket/*key", put(store_object))
        .route("/ingest", post(ingest_documents))
        .route("/ingest/request", post(enqueue_ingest))
        .route("/ask", post(ask))
        .route("/metrics", get(get_metrics))
        .route("/dlq", get(get_dead_letters))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

/// Apply permissive CORS headers to every response and answer preflights directly.
async fn cors(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return with_cors_headers(StatusCode::NO_CONTENT.into_response());
    }
    with_cors_headers(next.run(request).await)
}

fn with_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
    response
}

/// Request body for the `POST /uploads` endpoint.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadRequest {
    /// Object key the client wants to upload to. Must fall under the raw prefix.
    #[serde(default)]
    key: Option<String>,
    /// Content type the upload will be sent with (defaults to `application/octet-stream`).
    #[serde(default)]
    content_type: Option<String>,
    /// Requested URL validity in seconds (defaults to 900, capped at 3600).
    #[serde(default)]
    expires_in_seconds: Option<i64>,
}

/// Authorize an upload and return the signed URL to PUT it to.
async fn authorize_upload(
    State(state): State<AppState>,
    body: Result<Json<UploadRequest>, JsonRejection>,
) -> Result<Json<SignedUpload>, AppError> {
    let Json(request) = body.map_err(|_| AppError::bad_request("Invalid JSON body."))?;

    let key = request.key.as_deref().map(str::trim).unwrap_or_default();
    if key.is_empty() {
        return Err(AppError::bad_request("key is required."));
    }
    let content_type = request
        .content_type
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE);
    let expires_in = request.expires_in_seconds.unwrap_or(DEFAULT_EXPIRY_SECONDS);

    let signed = state
        .authorizer
        .authorize(&state.default_bucket, key, content_type, expires_in)?;
    tracing::info!(key = %signed.key, expires_in_seconds = signed.expires_in_seconds, "Upload authorized");
    Ok(Json(signed))
}

/// Query parameters carried by signed upload URLs.
#[derive(Deserialize)]
struct SignedUploadQuery {
    expires: i64,
    signature: String,
}

/// Accept a document body on a signed URL.
///
/// The signature is verified against the bucket, key, content type, and expiry
/// before anything is written. On success the object is stored together with
/// its `x-meta-*` headers and an object-created event is emitted for the
/// extraction stage.
async fn store_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    query: Result<Query<SignedUploadQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let Query(query) = query
        .map_err(|_| AppError::bad_request("expires and signature query parameters are required."))?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();

    state
        .authorizer
        .verify(&bucket, &key, &content_type, query.expires, &query.signature)?;

    let object = StoredObject {
        body: body.to_vec(),
        content_type: Some(content_type),
        metadata: meta_headers(&headers),
    };
    state
        .storage
        .put(&bucket, &key, object)
        .await
        .map_err(AppError::from_storage)?;

    let event = ObjectCreated {
        bucket: bucket.clone(),
        key: key.clone(),
    };
    let payload = serde_json::to_string(&event)
        .map_err(|error| AppError::internal(format!("failed to encode event: {error}")))?;
    state
        .events_queue
        .send(payload)
        .await
        .map_err(|error| AppError::internal(format!("failed to queue event: {error}")))?;

    state.metrics.record_object();
    tracing::info!(bucket = %bucket, key = %key, "Stored uploaded object");
    Ok(Json(json!({ "ok": true, "bucket": bucket, "key": key })))
}

/// Collect `x-meta-*` headers into object metadata, stripping the prefix.
fn meta_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str().strip_prefix(META_HEADER_PREFIX)?;
            let value = value.to_str().ok()?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// One entry in the `documents` array of a `POST /ingest` request.
#[derive(Deserialize)]
struct DocumentInput {
    /// Stable document identifier.
    #[serde(default)]
    id: String,
    /// Human-readable document title.
    #[serde(default)]
    title: String,
    /// Full document text.
    #[serde(default)]
    content: String,
}

impl DocumentInput {
    fn is_usable(&self) -> bool {
        !self.id.is_empty() && !self.title.is_empty() && !self.content.is_empty()
    }
}

/// Index documents posted inline in the request body.
///
/// Entries missing an id, title, or content are skipped; the request fails
/// only when nothing usable remains. Each document is chunked, embedded, and
/// upserted before the response is produced, so a `200` means the documents
/// are queryable.
async fn ingest_documents(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(mut payload) = body.map_err(|_| AppError::bad_request("Invalid JSON body."))?;
    let Some(Value::Array(entries)) = payload.get_mut("documents").map(Value::take) else {
        return Err(AppError::bad_request("documents must be an array."));
    };

    let documents: Vec<DocumentInput> = entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .filter(DocumentInput::is_usable)
        .collect();
    if documents.is_empty() {
        return Err(AppError::bad_request("No valid documents provided."));
    }

    let ingested_documents = documents.len();
    let mut ingested_chunks = 0;
    for document in &documents {
        ingested_chunks += state
            .indexer
            .index_document(&document.id, &document.title, &document.content, None, None)
            .await?;
    }

    tracing::info!(
        documents = ingested_documents,
        chunks = ingested_chunks,
        "Ingested posted documents"
    );
    Ok(Json(json!({
        "ingestedDocuments": ingested_documents,
        "ingestedChunks": ingested_chunks,
    })))
}

/// Request body for the `POST /ingest/request` endpoint.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestRequest {
    /// Bucket holding the object (defaults to the configured bucket).
    #[serde(default)]
    bucket: Option<String>,
    /// Storage key of the object to ingest.
    #[serde(default)]
    key: Option<String>,
    /// Stable document identifier.
    #[serde(default)]
    doc_id: Option<String>,
    /// Human-readable document title.
    #[serde(default)]
    title: Option<String>,
    /// Content type of the object, when known.
    #[serde(default)]
    content_type: Option<String>,
}

/// Queue a document already in storage for ingestion.
async fn enqueue_ingest(
    State(state): State<AppState>,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let Json(request) = body.map_err(|_| AppError::bad_request("Invalid JSON body."))?;

    let bucket = request
        .bucket
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| state.default_bucket.clone());
    let key = required_field(request.key.as_deref(), "key")?;
    let doc_id = required_field(request.doc_id.as_deref(), "docId")?;
    let title = required_field(request.title.as_deref(), "title")?;
    let content_type = request
        .content_type
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let message = IngestMessage {
        bucket: Some(bucket),
        key,
        doc_id,
        title,
        content_type,
        text: None,
    };
    let payload = serde_json::to_string(&message)
        .map_err(|error| AppError::internal(format!("failed to encode message: {error}")))?;
    state
        .ingest_queue
        .send(payload)
        .await
        .map_err(|error| AppError::internal(format!("failed to queue message: {error}")))?;

    tracing::info!(key = %message.key, doc_id = %message.doc_id, "Queued manual ingestion request");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "ok": true, "queued": true, "message": message })),
    ))
}

fn required_field(value: Option<&str>, name: &str) -> Result<String, AppError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::bad_request(format!("{name} is required.")))
}

/// Request body for the `POST /ask` endpoint.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AskRequest {
    /// Question to answer from indexed documents.
    #[serde(default)]
    question: Option<String>,
    /// Optional retrieval depth override. Must be positive.
    #[serde(default)]
    top_k: Option<i64>,
}

/// Answer a question from indexed documents.
async fn ask(
    State(state): State<AppState>,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<Answer>, AppError> {
    let Json(request) = body.map_err(|_| AppError::bad_request("Invalid JSON body."))?;
    let question = request.question.unwrap_or_default();
    let answer = state.answers.ask(&question, request.top_k).await?;
    Ok(Json(answer))
}

/// Return a snapshot of the pipeline counters.
async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Response body for `GET /dlq`.
#[derive(serde::Serialize)]
struct DeadLettersResponse {
    /// Object-created events that exhausted their deliveries.
    extraction: Vec<DeadLetter>,
    /// Ingestion messages that exhausted their deliveries.
    ingestion: Vec<DeadLetter>,
}

/// Inspect messages that exhausted their deliveries.
async fn get_dead_letters(
    State(state): State<AppState>,
) -> Result<Json<DeadLettersResponse>, AppError> {
    let extraction = state
        .events_queue
        .dead_letters()
        .await
        .map_err(|error| AppError::internal(error.to_string()))?;
    let ingestion = state
        .ingest_queue
        .dead_letters()
        .await
        .map_err(|error| AppError::internal(error.to_string()))?;
    Ok(Json(DeadLettersResponse { extraction, ingestion }))
}

/// Error envelope rendered as `{"error": "..."}` with the carried status.
struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn from_storage(error: StorageError) -> Self {
        match error {
            StorageError::InvalidKey(_) => Self::bad_request(error.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<AskError> for AppError {
    fn from(error: AskError) -> Self {
        if error.is_validation() {
            Self::bad_request(error.to_string())
        } else {
            tracing::error!(error = %error, "Ask request failed");
            Self::internal(error.to_string())
        }
    }
}

impl From<IndexingError> for AppError {
    fn from(error: IndexingError) -> Self {
        tracing::error!(error = %error, "Document ingestion failed");
        Self::internal(error.to_string())
    }
}

impl From<UploadError> for AppError {
    fn from(error: UploadError) -> Self {
        match error {
            UploadError::KeyOutsideRawPrefix(_) | UploadError::ExpiryOutOfRange => {
                Self::bad_request(error.to_string())
            }
            UploadError::MalformedSignature
            | UploadError::InvalidSignature
            | UploadError::Expired => Self::forbidden(error.to_string()),
        }
    }
}
