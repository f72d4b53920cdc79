//! Question answering over the vector index.
//!
//! A question is embedded, the nearest chunks are retrieved, and a chat model
//! is asked to answer strictly from those chunks. Matches missing a document
//! id or text are discarded; when nothing usable remains, a canned response
//! goes out instead of an ungrounded completion.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::AnswerConfig;
use crate::embedding::{EmbeddingClient, EmbeddingError};
use crate::generation::{GenerationClient, GenerationError};
use crate::index::{IndexError, QueryMatch, VectorIndex};
use crate::metrics::PipelineMetrics;

/// Answer returned when retrieval produces nothing usable.
pub const NO_MATCH_ANSWER: &str = "No relevant documents found.";
/// Answer returned when the model produces an empty completion.
pub const EMPTY_ANSWER_FALLBACK: &str = "No answer generated.";
/// Retrieval depth used when the request does not override it.
pub const DEFAULT_TOP_K: usize = 3;

const SYSTEM_INSTRUCTION: &str = "Answer questions using only provided context.";

/// Errors produced while answering a question.
#[derive(Debug, Error)]
pub enum AskError {
    /// The question was missing or blank.
    #[error("question is required.")]
    EmptyQuestion,
    /// The requested retrieval depth was zero or negative.
    #[error("topK must be a positive number.")]
    InvalidTopK,
    /// The embedding provider returned no vector for the question.
    #[error("embedding provider returned no vector for the question")]
    EmptyEmbedding,
    /// Embedding the question failed.
    #[error("failed to embed question: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Querying the vector index failed.
    #[error("vector query failed: {0}")]
    Index(#[from] IndexError),
    /// Generating the completion failed.
    #[error("answer generation failed: {0}")]
    Generation(#[from] GenerationError),
}

impl AskError {
    /// Whether this error was caused by the request rather than a backend.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::EmptyQuestion | Self::InvalidTopK)
    }
}

/// A retrieved chunk retained for grounding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextChunk {
    /// Document the chunk came from.
    pub doc_id: String,
    /// Title stored with the chunk.
    pub title: String,
    /// The chunk's text.
    pub text: String,
}

/// One document cited by an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Document identifier.
    pub doc_id: String,
    /// Document title.
    pub title: String,
}

/// A completed answer and the documents it drew from.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    /// The generated (or canned) answer text.
    pub answer: String,
    /// Documents cited, deduplicated, in retrieval order.
    pub sources: Vec<Source>,
}

/// Answers questions using the index, the embedding model, and the chat model.
pub struct AnswerService {
    embeddings: Arc<dyn EmbeddingClient>,
    generation: Arc<dyn GenerationClient>,
    index: Arc<dyn VectorIndex>,
    metrics: Arc<PipelineMetrics>,
    default_top_k: usize,
}

impl AnswerService {
    /// Assemble the service from its collaborators.
    pub fn new(
        embeddings: Arc<dyn EmbeddingClient>,
        generation: Arc<dyn GenerationClient>,
        index: Arc<dyn VectorIndex>,
        metrics: Arc<PipelineMetrics>,
        config: &AnswerConfig,
    ) -> Self {
        Self {
            embeddings,
            generation,
            index,
            metrics,
            default_top_k: config.top_k.max(1),
        }
    }

    /// Answer `question` using at most `top_k` retrieved chunks.
    ///
    /// `top_k` falls back to the configured default when `None`; zero or
    /// negative values are rejected.
    pub async fn ask(&self, question: &str, top_k: Option<i64>) -> Result<Answer, AskError> {
        let answer = self.answer_question(question, top_k).await?;
        self.metrics.record_question();
        Ok(answer)
    }

    async fn answer_question(
        &self,
        question: &str,
        top_k: Option<i64>,
    ) -> Result<Answer, AskError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AskError::EmptyQuestion);
        }
        let top_k = match top_k {
            None => self.default_top_k,
            Some(value) if value <= 0 => return Err(AskError::InvalidTopK),
            Some(value) => value as usize,
        };

        let mut vectors = self.embeddings.embed(&[question.to_string()]).await?;
        let vector = vectors.pop().ok_or(AskError::EmptyEmbedding)?;

        let matches = self.index.query(&vector, top_k).await?;
        if matches.is_empty() {
            tracing::debug!(top_k, "No index matches for question");
            return Ok(no_match_answer());
        }

        let chunks = retained_chunks(matches);
        if chunks.is_empty() {
            tracing::debug!(top_k, "All matches lacked usable metadata");
            return Ok(no_match_answer());
        }

        let prompt = build_grounded_prompt(question, &chunks);
        let completion = self.generation.complete(SYSTEM_INSTRUCTION, &prompt).await?;
        let answer = match completion.trim() {
            "" => EMPTY_ANSWER_FALLBACK.to_string(),
            text => text.to_string(),
        };

        let sources = dedupe_sources(&chunks);
        tracing::info!(chunks = chunks.len(), sources = sources.len(), "Question answered");
        Ok(Answer { answer, sources })
    }
}

fn no_match_answer() -> Answer {
    Answer {
        answer: NO_MATCH_ANSWER.to_string(),
        sources: Vec::new(),
    }
}

/// Keep the matches usable for grounding: a chunk needs its document id and
/// text; a missing title degrades to `"Untitled"`.
fn retained_chunks(matches: Vec<QueryMatch>) -> Vec<ContextChunk> {
    matches
        .into_iter()
        .filter_map(|candidate| {
            let metadata = candidate.metadata?;
            let doc_id = metadata.get("docId").and_then(Value::as_str).unwrap_or_default();
            let text = metadata.get("chunkText").and_then(Value::as_str).unwrap_or_default();
            if doc_id.is_empty() || text.is_empty() {
                return None;
            }
            let title = metadata
                .get("title")
                .and_then(Value::as_str)
                .filter(|title| !title.is_empty())
                .unwrap_or("Untitled");
            Some(ContextChunk {
                doc_id: doc_id.to_string(),
                title: title.to_string(),
                text: text.to_string(),
            })
        })
        .collect()
}

/// Render the prompt the chat model answers from: numbered source blocks
/// followed by the question and the grounding instruction.
pub fn build_grounded_prompt(question: &str, chunks: &[ContextChunk]) -> String {
    let context = chunks
        .iter()
        .enumerate()
        .map(|(position, chunk)| {
            format!(
                "Source {}\nDoc: {}\nTitle: {}\nText: {}",
                position + 1,
                chunk.doc_id,
                chunk.title,
                chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are a helpful assistant answering questions using the provided context.\n\n\
         Context:\n{context}\n\n\
         Question: {question}\n\
         Answer using only the context. If the context is insufficient, say you don't have enough information."
    )
}

/// Deduplicate cited documents by id and title, keeping first-seen order.
fn dedupe_sources(chunks: &[ContextChunk]) -> Vec<Source> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for chunk in chunks {
        if seen.insert((chunk.doc_id.clone(), chunk.title.clone())) {
            sources.push(Source {
                doc_id: chunk.doc_id.clone(),
                title: chunk.title.clone(),
            });
        }
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::record_id;
    use async_trait::async_trait;
    use serde_json::{Map, json};
    use std::sync::Mutex;

    struct StubEmbeddings;

    #[async_trait]
    impl EmbeddingClient for StubEmbeddings {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![0.5, 0.5]).collect())
        }
    }

    struct StubGeneration {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl StubGeneration {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GenerationClient for StubGeneration {
        async fn complete(&self, _system: &str, prompt: &str) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    struct StubIndex {
        matches: Vec<QueryMatch>,
    }

    #[async_trait]
    impl VectorIndex for StubIndex {
        async fn delete_by_doc_id(&self, _doc_id: &str) -> Result<(), IndexError> {
            Ok(())
        }
        async fn upsert(&self, _records: &[crate::index::VectorRecord]) -> Result<(), IndexError> {
            Ok(())
        }
        async fn query(&self, _vector: &[f32], top_k: usize) -> Result<Vec<QueryMatch>, IndexError> {
            Ok(self.matches.iter().take(top_k).cloned().collect())
        }
    }

    fn metadata(doc_id: &str, title: Option<&str>, text: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("docId".into(), json!(doc_id));
        if let Some(title) = title {
            map.insert("title".into(), json!(title));
        }
        map.insert("chunkText".into(), json!(text));
        map
    }

    fn match_for(doc_id: &str, title: Option<&str>, text: &str, chunk: usize) -> QueryMatch {
        QueryMatch {
            id: record_id(doc_id, chunk),
            score: 0.9,
            metadata: Some(metadata(doc_id, title, text)),
        }
    }

    fn service(
        matches: Vec<QueryMatch>,
        generation: Arc<StubGeneration>,
    ) -> AnswerService {
        AnswerService::new(
            Arc::new(StubEmbeddings),
            generation,
            Arc::new(StubIndex { matches }),
            Arc::new(PipelineMetrics::new()),
            &AnswerConfig { top_k: 3 },
        )
    }

    #[tokio::test]
    async fn answers_with_deduplicated_sources() {
        let generation = Arc::new(StubGeneration::new("Refunds are honored for 30 days."));
        let service = service(
            vec![
                match_for("doc-1", Some("Policy"), "Refunds are honored for 30 days.", 0),
                match_for("doc-1", Some("Policy"), "Contact support to start a refund.", 1),
                match_for("doc-2", Some("FAQ"), "Shipping takes 5 days.", 0),
            ],
            generation.clone(),
        );

        let answer = service.ask("What is the policy?", None).await.unwrap();
        assert_eq!(answer.answer, "Refunds are honored for 30 days.");
        assert_eq!(
            answer.sources,
            vec![
                Source { doc_id: "doc-1".into(), title: "Policy".into() },
                Source { doc_id: "doc-2".into(), title: "FAQ".into() },
            ]
        );
    }

    #[tokio::test]
    async fn prompt_contains_numbered_sources_and_question() {
        let generation = Arc::new(StubGeneration::new("ok"));
        let service = service(
            vec![match_for("doc-1", Some("Policy"), "Refunds are honored for 30 days.", 0)],
            generation.clone(),
        );

        service.ask("What is the policy?", None).await.unwrap();

        let prompts = generation.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        let prompt = &prompts[0];
        assert!(prompt.contains("Source 1"));
        assert!(prompt.contains("Doc: doc-1"));
        assert!(prompt.contains("Title: Policy"));
        assert!(prompt.contains("Refunds are honored for 30 days."));
        assert!(prompt.contains("Question: What is the policy?"));
    }

    #[tokio::test]
    async fn no_matches_returns_canned_answer_without_generation() {
        let generation = Arc::new(StubGeneration::new("should never be called"));
        let service = service(Vec::new(), generation.clone());

        let answer = service.ask("Anything?", None).await.unwrap();
        assert_eq!(answer.answer, NO_MATCH_ANSWER);
        assert!(answer.sources.is_empty());
        assert!(generation.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn matches_without_doc_id_or_text_are_discarded() {
        let generation = Arc::new(StubGeneration::new("should never be called"));
        let mut missing_text = metadata("doc-1", Some("Policy"), "");
        missing_text.remove("chunkText");
        let service = service(
            vec![
                QueryMatch { id: "a".into(), score: 0.9, metadata: None },
                QueryMatch { id: "b".into(), score: 0.8, metadata: Some(missing_text) },
                match_for("", Some("Policy"), "text without doc id", 0),
            ],
            generation.clone(),
        );

        let answer = service.ask("Anything?", None).await.unwrap();
        assert_eq!(answer.answer, NO_MATCH_ANSWER);
        assert!(generation.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_title_degrades_to_untitled() {
        let generation = Arc::new(StubGeneration::new("ok"));
        let service = service(
            vec![match_for("doc-9", None, "Some text.", 0)],
            generation.clone(),
        );

        let answer = service.ask("Anything?", None).await.unwrap();
        assert_eq!(answer.sources, vec![Source { doc_id: "doc-9".into(), title: "Untitled".into() }]);
        assert!(generation.prompts.lock().unwrap()[0].contains("Title: Untitled"));
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let generation = Arc::new(StubGeneration::new("ok"));
        let service = service(Vec::new(), generation);

        let error = service.ask("   ", None).await.unwrap_err();
        assert!(matches!(error, AskError::EmptyQuestion));
        assert!(error.is_validation());
    }

    #[tokio::test]
    async fn non_positive_top_k_is_rejected() {
        let generation = Arc::new(StubGeneration::new("ok"));
        let service = service(Vec::new(), generation);

        for top_k in [0, -3] {
            let error = service.ask("Question?", Some(top_k)).await.unwrap_err();
            assert!(matches!(error, AskError::InvalidTopK), "topK {top_k}");
        }
    }

    #[tokio::test]
    async fn empty_completion_falls_back() {
        let generation = Arc::new(StubGeneration::new("   "));
        let service = service(
            vec![match_for("doc-1", Some("Policy"), "Some text.", 0)],
            generation,
        );

        let answer = service.ask("Question?", None).await.unwrap();
        assert_eq!(answer.answer, EMPTY_ANSWER_FALLBACK);
        assert_eq!(answer.sources.len(), 1);
    }
}
