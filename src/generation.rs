//! Chat completion for grounded answers.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::OpenAiConfig;

/// Sampling temperature for answer generation. Kept low so answers restate
/// the retrieved context rather than improvise.
const TEMPERATURE: f64 = 0.2;

/// Errors produced while generating a completion.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The HTTP request could not be performed.
    #[error("completion request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The completion service answered with a non-success status.
    #[error("completion service returned {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Response body.
        body: String,
    },
}

/// Produces a chat completion from a system instruction and a user prompt.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Run one completion. May return an empty string when the model produces
    /// no content; callers decide on a fallback.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, GenerationError>;
}

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct OpenAiChat {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChat {
    /// Construct a client from OpenAI settings.
    pub fn new(config: &OpenAiConfig) -> Result<Self, GenerationError> {
        let client = Client::builder().user_agent("askdocs/0.1").build()?;
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            model: config.chat_model.clone(),
        })
    }
}

#[async_trait]
impl GenerationClient for OpenAiChat {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
            "temperature": TEMPERATURE,
        });
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = GenerationError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Completion request failed");
            return Err(error);
        }

        let payload: ChatResponse = response.json().await?;
        let content = payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(base_url: String) -> OpenAiChat {
        OpenAiChat::new(&OpenAiConfig {
            api_key: "sk-test".into(),
            base_url,
            embed_model: "text-embedding-3-small".into(),
            chat_model: "gpt-4o-mini".into(),
            embed_dimensions: None,
        })
        .expect("client should build")
    }

    #[tokio::test]
    async fn sends_system_and_user_messages() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .json_body(json!({
                        "model": "gpt-4o-mini",
                        "messages": [
                            { "role": "system", "content": "Be brief." },
                            { "role": "user", "content": "What is up?" },
                        ],
                        "temperature": 0.2,
                    }));
                then.status(200).json_body(json!({
                    "choices": [
                        { "message": { "role": "assistant", "content": "Not much." } }
                    ]
                }));
            })
            .await;

        let answer = client(server.base_url())
            .complete("Be brief.", "What is up?")
            .await
            .expect("completion should succeed");

        mock.assert_async().await;
        assert_eq!(answer, "Not much.");
    }

    #[tokio::test]
    async fn missing_content_yields_empty_string() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({ "choices": [] }));
            })
            .await;

        let answer = client(server.base_url())
            .complete("sys", "prompt")
            .await
            .expect("completion should succeed");
        assert_eq!(answer, "");
    }

    #[tokio::test]
    async fn non_success_status_is_surfaced() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(429).body("rate limited");
            })
            .await;

        let error = client(server.base_url())
            .complete("sys", "prompt")
            .await
            .expect_err("completion should fail");
        match error {
            GenerationError::UnexpectedStatus { status, body } => {
                assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
                assert_eq!(body, "rate limited");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
