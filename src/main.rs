use anyhow::Context;
use askdocs::answer::AnswerService;
use askdocs::api::{self, AppState};
use askdocs::config::Config;
use askdocs::embedding::OpenAiEmbeddings;
use askdocs::extraction::TikaClient;
use askdocs::generation::OpenAiChat;
use askdocs::index::PineconeIndex;
use askdocs::ingestion::DocumentIndexer;
use askdocs::logging;
use askdocs::metrics::PipelineMetrics;
use askdocs::queue::MemoryQueue;
use askdocs::storage::FsStore;
use askdocs::upload::UploadAuthorizer;
use askdocs::workers::{self, DEFAULT_POLL_INTERVAL, ExtractionWorker, IngestWorker};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    let _log_guard = logging::init_tracing(&config.logging);

    let storage = Arc::new(FsStore::new(config.storage.root.clone()));
    let events_queue = Arc::new(MemoryQueue::new(
        "object-created",
        config.queues.max_receive_count,
    ));
    let ingest_queue = Arc::new(MemoryQueue::new("ingest", config.queues.max_receive_count));
    let metrics = Arc::new(PipelineMetrics::new());

    let extractor = Arc::new(TikaClient::new(&config.extraction)?);
    let embeddings = Arc::new(OpenAiEmbeddings::new(&config.openai)?);
    let generation = Arc::new(OpenAiChat::new(&config.openai)?);
    let index = Arc::new(PineconeIndex::new(&config.index)?);

    let extraction_worker = Arc::new(ExtractionWorker::new(
        storage.clone(),
        extractor,
        ingest_queue.clone(),
        metrics.clone(),
        &config.storage,
    ));
    let indexer = Arc::new(DocumentIndexer::new(
        embeddings.clone(),
        index.clone(),
        metrics.clone(),
        &config.chunking,
    ));
    let ingest_worker = Arc::new(IngestWorker::new(
        storage.clone(),
        indexer.clone(),
        &config.storage,
    ));
    tokio::spawn(workers::run(
        events_queue.clone(),
        extraction_worker,
        DEFAULT_POLL_INTERVAL,
    ));
    tokio::spawn(workers::run(
        ingest_queue.clone(),
        ingest_worker,
        DEFAULT_POLL_INTERVAL,
    ));

    let answers = Arc::new(AnswerService::new(
        embeddings,
        generation,
        index,
        metrics.clone(),
        &config.answer,
    ));
    let app = api::create_router(AppState {
        answers,
        authorizer: Arc::new(UploadAuthorizer::new(&config.upload, &config.storage)),
        storage,
        events_queue,
        ingest_queue,
        indexer,
        metrics,
        default_bucket: config.storage.bucket.clone(),
    });

    let (listener, port) = bind_listener(config.server.port)
        .await
        .context("failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn bind_listener(configured_port: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = configured_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 8080..=8099;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 8080-8099",
    ))
}
