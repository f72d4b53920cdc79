use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    objects_stored: AtomicU64,
    texts_extracted: AtomicU64,
    documents_indexed: AtomicU64,
    chunks_indexed: AtomicU64,
    questions_answered: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an object accepted into storage.
    pub fn record_object(&self) {
        self.objects_stored.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a document whose text was extracted and queued for ingestion.
    pub fn record_extraction(&self) {
        self.texts_extracted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an indexed document and the number of chunks produced for it.
    pub fn record_document(&self, chunk_count: u64) {
        self.documents_indexed.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed
            .fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record an answered question.
    pub fn record_question(&self) {
        self.questions_answered.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            objects_stored: self.objects_stored.load(Ordering::Relaxed),
            texts_extracted: self.texts_extracted.load(Ordering::Relaxed),
            documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Number of uploads accepted into storage since startup.
    pub objects_stored: u64,
    /// Number of documents whose text was extracted and queued.
    pub texts_extracted: u64,
    /// Number of documents that have been indexed since startup.
    pub documents_indexed: u64,
    /// Total chunk count produced across all indexed documents.
    pub chunks_indexed: u64,
    /// Number of questions answered since startup.
    pub questions_answered: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_documents_and_chunks() {
        let metrics = PipelineMetrics::new();
        metrics.record_document(2);
        metrics.record_document(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_indexed, 2);
        assert_eq!(snapshot.chunks_indexed, 5);
    }

    #[test]
    fn records_stage_counters_independently() {
        let metrics = PipelineMetrics::new();
        metrics.record_object();
        metrics.record_object();
        metrics.record_extraction();
        metrics.record_question();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.objects_stored, 2);
        assert_eq!(snapshot.texts_extracted, 1);
        assert_eq!(snapshot.documents_indexed, 0);
        assert_eq!(snapshot.questions_answered, 1);
    }

    #[test]
    fn snapshot_starts_empty() {
        let snapshot = PipelineMetrics::new().snapshot();
        assert_eq!(snapshot.objects_stored, 0);
        assert_eq!(snapshot.chunks_indexed, 0);
    }
}
