use std::env;
use std::path::PathBuf;
use thiserror::Error;

use crate::answer::DEFAULT_TOP_K;
use crate::chunking::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::queue::DEFAULT_MAX_RECEIVE_COUNT;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed or is out of range.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the askdocs service.
///
/// Loaded once at startup and handed by reference to each component; nothing
/// reads the environment after this point.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Upload authorization settings.
    pub upload: UploadConfig,
    /// Object storage layout.
    pub storage: StorageConfig,
    /// Delivery settings shared by the in-process queues.
    pub queues: QueueConfig,
    /// Sliding-window chunker settings.
    pub chunking: ChunkingConfig,
    /// Text-extraction service settings.
    pub extraction: ExtractionConfig,
    /// OpenAI-compatible embedding and chat settings.
    pub openai: OpenAiConfig,
    /// Vector index settings.
    pub index: IndexConfig,
    /// Question-answering settings.
    pub answer: AnswerConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Optional override for the HTTP server port.
    pub port: Option<u16>,
}

/// Settings for signing and advertising upload URLs.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Secret used to sign upload URLs.
    pub signing_secret: String,
    /// Base URL clients reach the service at, used when building signed URLs.
    pub public_base_url: String,
}

/// Object storage layout: where documents live and how keys are partitioned.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Filesystem directory backing the object store.
    pub root: PathBuf,
    /// Bucket new uploads are written into.
    pub bucket: String,
    /// Key prefix for documents awaiting ingestion. Always ends with `/`.
    pub raw_prefix: String,
    /// Key prefix indexed documents are relocated under. Always ends with `/`.
    pub done_prefix: String,
}

/// Delivery settings shared by the in-process queues.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of deliveries a message may consume before it is dead-lettered.
    pub max_receive_count: u32,
}

/// Sliding-window chunker settings.
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Window width in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive windows. Must be smaller than the window.
    pub chunk_overlap: usize,
}

/// Text-extraction service settings.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Base URL of the Tika server used to extract plain text.
    pub tika_url: String,
}

/// OpenAI-compatible embedding and chat settings.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key sent as a bearer token.
    pub api_key: String,
    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,
    /// Embedding model identifier.
    pub embed_model: String,
    /// Chat completion model identifier.
    pub chat_model: String,
    /// Optional reduced dimensionality requested from the embedding model.
    pub embed_dimensions: Option<usize>,
}

/// Vector index settings.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Data-plane URL of the Pinecone index.
    pub index_url: String,
    /// API key sent with every index request.
    pub api_key: String,
    /// Optional namespace scoping every index operation.
    pub namespace: Option<String>,
}

/// Question-answering settings.
#[derive(Debug, Clone)]
pub struct AnswerConfig {
    /// Number of chunks retrieved per question when the request does not override it.
    pub top_k: usize,
}

/// Log output settings.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// File that receives a copy of the log stream.
    pub file: PathBuf,
}

impl Config {
    /// Load `.env` if present, then read configuration from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self::from_env()?;
        tracing::debug!(
            bucket = %config.storage.bucket,
            raw_prefix = %config.storage.raw_prefix,
            index_url = %config.index.index_url,
            embed_model = %config.openai.embed_model,
            server_port = ?config.server.port,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Read configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            server: ServerConfig {
                port: load_env_optional("SERVER_PORT")
                    .map(|value| {
                        value
                            .parse()
                            .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                    })
                    .transpose()?,
            },
            upload: UploadConfig {
                signing_secret: load_env("UPLOAD_SIGNING_SECRET")?,
                public_base_url: load_env_or("PUBLIC_BASE_URL", "http://127.0.0.1:8080"),
            },
            storage: StorageConfig {
                root: PathBuf::from(load_env_or("STORAGE_ROOT", "data")),
                bucket: load_env_or("STORAGE_BUCKET", "documents"),
                raw_prefix: normalize_prefix(&load_env_or("RAW_PREFIX", "raw/")),
                done_prefix: normalize_prefix(&load_env_or("DONE_PREFIX", "done/")),
            },
            queues: QueueConfig {
                max_receive_count: parse_env_or("QUEUE_MAX_RECEIVE_COUNT", DEFAULT_MAX_RECEIVE_COUNT)?,
            },
            chunking: ChunkingConfig {
                chunk_size: parse_env_or("CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
                chunk_overlap: parse_env_or("CHUNK_OVERLAP", DEFAULT_CHUNK_OVERLAP)?,
            },
            extraction: ExtractionConfig {
                tika_url: load_env_or("TIKA_URL", "http://localhost:9998"),
            },
            openai: OpenAiConfig {
                api_key: load_env("OPENAI_API_KEY")?,
                base_url: load_env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
                embed_model: load_env_or("OPENAI_EMBED_MODEL", "text-embedding-3-small"),
                chat_model: load_env_or("OPENAI_CHAT_MODEL", "gpt-4o-mini"),
                embed_dimensions: load_env_optional("OPENAI_EMBED_DIMENSIONS")
                    .map(|value| {
                        value.parse().map_err(|_| {
                            ConfigError::InvalidValue("OPENAI_EMBED_DIMENSIONS".into())
                        })
                    })
                    .transpose()?,
            },
            index: IndexConfig {
                index_url: load_env("PINECONE_INDEX_URL")?,
                api_key: load_env("PINECONE_API_KEY")?,
                namespace: load_env_optional("PINECONE_NAMESPACE"),
            },
            answer: AnswerConfig {
                top_k: parse_env_or("ANSWER_TOP_K", DEFAULT_TOP_K)?,
            },
            logging: LoggingConfig {
                file: PathBuf::from(load_env_or("ASKDOCS_LOG_FILE", "logs/askdocs.log")),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.chunking.chunk_size == 0 {
            return Err(ConfigError::InvalidValue(
                "CHUNK_SIZE must be at least 1".into(),
            ));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(ConfigError::InvalidValue(
                "CHUNK_OVERLAP must be smaller than CHUNK_SIZE".into(),
            ));
        }
        if self.queues.max_receive_count == 0 {
            return Err(ConfigError::InvalidValue(
                "QUEUE_MAX_RECEIVE_COUNT must be at least 1".into(),
            ));
        }
        if self.answer.top_k == 0 {
            return Err(ConfigError::InvalidValue(
                "ANSWER_TOP_K must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Ensure a key prefix ends with a single trailing slash.
pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_or(key: &str, default: &str) -> String {
    load_env_optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
        .map(|value| value.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        Config {
            server: ServerConfig { port: None },
            upload: UploadConfig {
                signing_secret: "secret".into(),
                public_base_url: "http://127.0.0.1:8080".into(),
            },
            storage: StorageConfig {
                root: PathBuf::from("data"),
                bucket: "documents".into(),
                raw_prefix: "raw/".into(),
                done_prefix: "done/".into(),
            },
            queues: QueueConfig {
                max_receive_count: 3,
            },
            chunking: ChunkingConfig {
                chunk_size: 500,
                chunk_overlap: 50,
            },
            extraction: ExtractionConfig {
                tika_url: "http://localhost:9998".into(),
            },
            openai: OpenAiConfig {
                api_key: "test-key".into(),
                base_url: "https://api.openai.com/v1".into(),
                embed_model: "text-embedding-3-small".into(),
                chat_model: "gpt-4o-mini".into(),
                embed_dimensions: None,
            },
            index: IndexConfig {
                index_url: "https://example-index.svc.pinecone.io".into(),
                api_key: "test-key".into(),
                namespace: None,
            },
            answer: AnswerConfig { top_k: 3 },
            logging: LoggingConfig {
                file: PathBuf::from("logs/askdocs.log"),
            },
        }
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_overlap_not_smaller_than_size() {
        let mut config = sample_config();
        config.chunking.chunk_size = 50;
        config.chunking.chunk_overlap = 50;
        let error = config.validate().unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue(_)));
        assert!(error.to_string().contains("CHUNK_OVERLAP"));
    }

    #[test]
    fn validate_rejects_zero_chunk_size() {
        let mut config = sample_config();
        config.chunking.chunk_size = 0;
        config.chunking.chunk_overlap = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_receive_count() {
        let mut config = sample_config();
        config.queues.max_receive_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn normalize_prefix_appends_missing_slash() {
        assert_eq!(normalize_prefix("raw"), "raw/");
        assert_eq!(normalize_prefix("raw/"), "raw/");
        assert_eq!(normalize_prefix("incoming/docs"), "incoming/docs/");
    }
}
