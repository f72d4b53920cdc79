//! HTTP client for the Pinecone data-plane API.

use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{IndexError, QueryMatch, VectorIndex, VectorRecord};
use crate::config::IndexConfig;
use async_trait::async_trait;

/// Lightweight HTTP client for a single Pinecone index.
pub struct PineconeIndex {
    client: Client,
    base_url: String,
    api_key: String,
    namespace: Option<String>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<WireMatch>,
}

#[derive(Deserialize)]
struct WireMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

impl PineconeIndex {
    /// Construct a client for the configured index.
    pub fn new(config: &IndexConfig) -> Result<Self, IndexError> {
        let client = Client::builder().user_agent("askdocs/0.1").build()?;
        let base_url = normalize_base_url(&config.index_url).map_err(IndexError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            namespace = ?config.namespace,
            "Initialized Pinecone HTTP client"
        );
        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            namespace: config.namespace.clone(),
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let base = self.base_url.trim_end_matches('/');
        self.client
            .post(format!("{base}/{}", path.trim_start_matches('/')))
            .header("Api-Key", &self.api_key)
    }

    /// Attach the configured namespace to a request body.
    fn scoped(&self, mut body: Value) -> Value {
        if let Some(namespace) = &self.namespace
            && let Some(obj) = body.as_object_mut()
        {
            obj.insert("namespace".into(), Value::String(namespace.clone()));
        }
        body
    }

    async fn ensure_success(
        &self,
        response: reqwest::Response,
        context: &str,
    ) -> Result<reqwest::Response, IndexError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = IndexError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "{context}");
            Err(error)
        }
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn delete_by_doc_id(&self, doc_id: &str) -> Result<(), IndexError> {
        let body = self.scoped(json!({
            "filter": { "docId": { "$eq": doc_id } },
        }));
        let response = self
            .request("vectors/delete")
            .json(&body)
            .send()
            .await?;
        self.ensure_success(response, "Pinecone delete failed").await?;
        tracing::debug!(doc_id, "Cleared existing vectors");
        Ok(())
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), IndexError> {
        if records.is_empty() {
            return Ok(());
        }
        let body = self.scoped(json!({ "vectors": records }));
        let response = self
            .request("vectors/upsert")
            .json(&body)
            .send()
            .await?;
        self.ensure_success(response, "Pinecone upsert failed").await?;
        tracing::debug!(vectors = records.len(), "Vectors upserted");
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<QueryMatch>, IndexError> {
        let body = self.scoped(json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
        }));
        let response = self.request("query").json(&body).send().await?;
        let response = self.ensure_success(response, "Pinecone query failed").await?;

        let payload: QueryResponse = response.json().await?;
        Ok(payload
            .matches
            .into_iter()
            .map(|m| QueryMatch {
                id: m.id,
                score: m.score,
                metadata: m.metadata,
            })
            .collect())
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}
