//! Document ingestion pipeline.
//!
//! One run moves a document through
//!
//! ```text
//! TRIGGERED → EXTRACTING → CHUNKING → EMBEDDING/INDEXING → PERSISTING → COMPLETED
//! ```
//!
//! and any failing stage sends it to `FAILED`. Only two things are externally
//! visible: the document status record and, on success, the serialized index
//! archive. An index is never persisted unless every batch was embedded and
//! indexed, and an archive whose `COMPLETED` record cannot be written is
//! deleted again, so a `FAILED` document keeps no artifact from that run.
//!
//! A running record's `updated_at` is refreshed after every batch. If the
//! record stops being `PROCESSING` (the stale-run watchdog failed it, or a
//! newer trigger reset it) the run aborts instead of overwriting it.
//!
//! Runs do not retry. Each failure is logged with its [`ErrorClass`] so that
//! whoever re-triggers the run can tell a flaky endpoint from a bad input.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ragchat_core::chunk::Chunker;
use ragchat_core::embedding::{check_batch, Embedder};
use ragchat_core::error::{classify, ErrorClass};
use ragchat_core::models::{document_id_from_location, DocumentRecord, DocumentStatus, Passage};
use ragchat_core::services::{BlobStore, TextExtractor};
use ragchat_core::store::DocumentStatusStore;
use ragchat_core::vector_index::{Metric, VectorIndex};

use crate::config::Config;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Triggered,
    Extracting,
    Chunking,
    Embedding,
    Indexing,
    Persisting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Triggered => "TRIGGERED",
            Stage::Extracting => "EXTRACTING",
            Stage::Chunking => "CHUNKING",
            Stage::Embedding => "EMBEDDING",
            Stage::Indexing => "INDEXING",
            Stage::Persisting => "PERSISTING",
        };
        f.write_str(name)
    }
}

/// The record of a running document was changed by someone else.
#[derive(Debug, Error)]
#[error("run for '{document_id}' was superseded (status {status})")]
struct Superseded {
    document_id: String,
    status: String,
}

struct StageFailure {
    stage: Stage,
    error: anyhow::Error,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageFailure>;
}

impl<T, E: Into<anyhow::Error>> AtStage<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, StageFailure> {
        self.map_err(|e| StageFailure {
            stage,
            error: e.into(),
        })
    }
}

/// A triggered run whose `PENDING` record has been written.
#[derive(Debug, Clone)]
pub struct IngestRun {
    pub run_id: String,
    pub document_id: String,
    pub location: String,
    record: DocumentRecord,
}

/// Result of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub run_id: String,
    pub document_id: String,
    pub status: DocumentStatus,
    pub passages: usize,
    pub index_pointer: Option<String>,
    /// Stage and error class of a failed run.
    pub failure: Option<(Stage, ErrorClass)>,
}

/// Collaborators and tuning for ingestion runs.
pub struct Pipeline {
    blobs: Arc<dyn BlobStore>,
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    status: Arc<dyn DocumentStatusStore>,
    chunker: Chunker,
    batch_size: usize,
    metric: Metric,
    index_prefix: String,
}

impl Pipeline {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        status: Arc<dyn DocumentStatusStore>,
        chunker: Chunker,
    ) -> Self {
        Self {
            blobs,
            extractor,
            embedder,
            status,
            chunker,
            batch_size: ragchat_core::vector_index::DEFAULT_BATCH_SIZE,
            metric: Metric::default(),
            index_prefix: "indexes/".to_string(),
        }
    }

    /// Build a pipeline using the chunking, batching and storage settings
    /// from `config`.
    pub fn from_config(
        config: &Config,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        status: Arc<dyn DocumentStatusStore>,
    ) -> Result<Self> {
        let chunker = Chunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?;
        Ok(Self::new(blobs, extractor, embedder, status, chunker)
            .with_batch_size(config.pipeline.batch_size)
            .with_metric(config.embedding.metric)
            .with_index_prefix(&config.storage.index_prefix))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_index_prefix(mut self, prefix: &str) -> Self {
        self.index_prefix = prefix.to_string();
        self
    }

    /// Blob key of the index archive for a document. Keyed by the full id:
    /// `manual.pdf` and `manual.txt` get distinct archives.
    pub fn index_key(&self, record: &DocumentRecord) -> String {
        format!("{}{}-vectorstore.zip", self.index_prefix, record.id)
    }

    /// Trigger and run to completion.
    pub async fn ingest(&self, location: &str) -> Result<IngestOutcome> {
        let run = self.trigger(location).await?;
        Ok(self.process(run).await)
    }

    /// Record a new run as `PENDING`. Overwrites any previous record for the
    /// same document.
    pub async fn trigger(&self, location: &str) -> Result<IngestRun> {
        let document_id = document_id_from_location(location);
        if document_id.is_empty() {
            anyhow::bail!("cannot derive a document id from '{}'", location);
        }
        let record = DocumentRecord::pending(&document_id, Utc::now());
        self.status
            .put(&record)
            .await
            .with_context(|| format!("Failed to record ingestion of '{}'", document_id))?;

        let run = IngestRun {
            run_id: Uuid::new_v4().to_string(),
            document_id,
            location: location.to_string(),
            record,
        };
        info!(run_id = %run.run_id, document_id = %run.document_id, stage = %Stage::Triggered, "ingestion triggered");
        Ok(run)
    }

    /// Drive a triggered run to `COMPLETED` or `FAILED`. Never returns an
    /// error: failures are recorded on the document.
    pub async fn process(&self, run: IngestRun) -> IngestOutcome {
        match self.run_stages(&run).await {
            Ok((passages, pointer)) => {
                info!(
                    run_id = %run.run_id,
                    document_id = %run.document_id,
                    passages,
                    index_pointer = %pointer,
                    "ingestion completed"
                );
                IngestOutcome {
                    run_id: run.run_id,
                    document_id: run.document_id,
                    status: DocumentStatus::Completed,
                    passages,
                    index_pointer: Some(pointer),
                    failure: None,
                }
            }
            Err(failure) => {
                let superseded = failure.error.is::<Superseded>();
                let class = if superseded {
                    ErrorClass::Permanent
                } else {
                    classify(&failure.error)
                };
                error!(
                    run_id = %run.run_id,
                    document_id = %run.document_id,
                    stage = %failure.stage,
                    class = %class,
                    error = %format!("{:#}", failure.error),
                    "ingestion failed"
                );
                // The record now belongs to the watchdog or a newer run.
                if !superseded {
                    self.mark_failed(&run.document_id).await;
                }
                IngestOutcome {
                    run_id: run.run_id,
                    document_id: run.document_id,
                    status: DocumentStatus::Failed,
                    passages: 0,
                    index_pointer: None,
                    failure: Some((failure.stage, class)),
                }
            }
        }
    }

    async fn run_stages(&self, run: &IngestRun) -> Result<(usize, String), StageFailure> {
        // EXTRACTING
        let processing = run
            .record
            .with_status(DocumentStatus::Processing, Utc::now())
            .at(Stage::Extracting)?;
        self.status.put(&processing).await.at(Stage::Extracting)?;
        let pages = self
            .extractor
            .extract(&run.location)
            .await
            .at(Stage::Extracting)?;
        debug!(run_id = %run.run_id, stage = %Stage::Extracting, pages = pages.len(), "extracted");

        // CHUNKING
        let passages = self.chunker.split_pages(&run.location, &pages);
        let count = passages.len();
        debug!(run_id = %run.run_id, stage = %Stage::Chunking, passages = count, "chunked");
        if passages.is_empty() {
            warn!(run_id = %run.run_id, document_id = %run.document_id, "no extractable text, persisting empty index");
        }

        // EMBEDDING + INDEXING
        let index = self.build_index(run, &processing, passages).await?;

        // PERSISTING
        let key = self.index_key(&run.record);
        let bytes = index.serialize().at(Stage::Persisting)?;
        let completed = processing.completed(&key, Utc::now()).at(Stage::Persisting)?;
        self.heartbeat(&processing).await.at(Stage::Persisting)?;
        self.blobs.put(&key, bytes).await.at(Stage::Persisting)?;
        if let Err(e) = self.status.put(&completed).await {
            self.discard_artifact(&key).await;
            return Err(e).at(Stage::Persisting);
        }

        Ok((count, key))
    }

    /// Refresh `updated_at` of a running record so the stale-run watchdog
    /// leaves it alone. Fails if the record is no longer `PROCESSING`, i.e.
    /// the watchdog or a newer trigger has taken it over.
    async fn heartbeat(&self, processing: &DocumentRecord) -> Result<()> {
        let status = match self.status.get(&processing.id).await? {
            Some(current) if current.status == DocumentStatus::Processing => None,
            Some(current) => Some(current.status.to_string()),
            None => Some("missing".to_string()),
        };
        if let Some(status) = status {
            return Err(Superseded {
                document_id: processing.id.clone(),
                status,
            }
            .into());
        }
        let touched = processing.with_status(DocumentStatus::Processing, Utc::now())?;
        self.status.put(&touched).await
    }

    async fn build_index(
        &self,
        run: &IngestRun,
        processing: &DocumentRecord,
        passages: Vec<Passage>,
    ) -> Result<VectorIndex, StageFailure> {
        let dims = self.embedder.dims();
        let mut index: Option<VectorIndex> = None;
        let total_batches = passages.len().div_ceil(self.batch_size);

        for (i, batch) in passages.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await.at(Stage::Embedding)?;
            check_batch(texts.len(), &vectors).at(Stage::Embedding)?;

            match index.as_mut() {
                None => {
                    index = Some(
                        VectorIndex::build(dims, self.metric, batch.to_vec(), vectors).at(Stage::Indexing)?,
                    );
                }
                Some(existing) => existing.add(batch.to_vec(), vectors).at(Stage::Indexing)?,
            }
            self.heartbeat(processing).await.at(Stage::Indexing)?;
            debug!(run_id = %run.run_id, batch = i + 1, total_batches, "indexed batch");
        }

        match index {
            Some(index) => Ok(index),
            None => VectorIndex::new(dims, self.metric).at(Stage::Indexing),
        }
    }

    /// Best-effort removal of an archive whose COMPLETED record was never
    /// written.
    async fn discard_artifact(&self, key: &str) {
        if let Err(e) = self.blobs.delete(key).await {
            error!(key = %key, error = %format!("{:#}", e), "could not delete orphaned index archive");
        }
    }

    /// Best-effort: a failure to record the failure is logged, not raised.
    async fn mark_failed(&self, document_id: &str) {
        if let Err(e) = self.status.mark_failed(document_id, Utc::now()).await {
            error!(document_id = %document_id, error = %format!("{:#}", e), "could not mark document FAILED");
        }
    }
}

/// Fail runs stuck in `PENDING`/`PROCESSING` for longer than `ttl`.
///
/// Returns the ids that were expired.
pub async fn expire_stale_runs(
    status: &dyn DocumentStatusStore,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<String>> {
    let mut expired = Vec::new();
    for record in status.list_stale(now - ttl).await? {
        match status.mark_failed(&record.id, now).await {
            Ok(()) => {
                warn!(
                    document_id = %record.id,
                    status = %record.status,
                    last_update = %record.updated_at,
                    "expired stale ingestion run"
                );
                expired.push(record.id);
            }
            Err(e) => error!(document_id = %record.id, error = %format!("{:#}", e), "could not expire run"),
        }
    }
    Ok(expired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragchat_core::models::ExtractedPage;
    use ragchat_core::store::memory::InMemoryDocumentStore;

    struct NoBlobs;

    #[async_trait]
    impl BlobStore for NoBlobs {
        async fn get(&self, _key: &str) -> Result<Vec<u8>> {
            anyhow::bail!("unused")
        }
        async fn put(&self, _key: &str, _bytes: Vec<u8>) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            Ok(())
        }
        async fn presign_get(&self, key: &str, _expires_in: std::time::Duration) -> Result<String> {
            Ok(key.to_string())
        }
    }

    struct Text(String);

    #[async_trait]
    impl TextExtractor for Text {
        async fn extract(&self, _location: &str) -> Result<Vec<ExtractedPage>> {
            Ok(vec![ExtractedPage {
                text: self.0.clone(),
                page: None,
            }])
        }
    }

    struct CountingEmbedder(std::sync::atomic::AtomicUsize);

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Embedding.to_string(), "EMBEDDING");
        assert_eq!(Stage::Persisting.to_string(), "PERSISTING");
    }

    #[tokio::test]
    async fn test_batches_embedding_calls() {
        let embedder = Arc::new(CountingEmbedder(Default::default()));
        let status = Arc::new(InMemoryDocumentStore::new());
        let text: String = (0..60).map(|i| format!("Sentence number {}.\n\n", i)).collect();
        let pipeline = Pipeline::new(
            Arc::new(NoBlobs),
            Arc::new(Text(text)),
            embedder.clone(),
            status,
            Chunker::new(25, 0).unwrap(),
        )
        .with_batch_size(20);

        let outcome = pipeline.ingest("public/notes.txt").await.unwrap();
        assert_eq!(outcome.status, DocumentStatus::Completed);
        assert_eq!(outcome.passages, 60);
        assert_eq!(embedder.0.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(outcome.index_pointer.as_deref(), Some("indexes/notes.txt-vectorstore.zip"));
    }

    #[tokio::test]
    async fn test_expire_stale_runs() {
        let status = InMemoryDocumentStore::new();
        let now = Utc::now();
        let old = now - Duration::hours(2);
        status.put(&DocumentRecord::pending("stuck.pdf", old)).await.unwrap();
        status.put(&DocumentRecord::pending("fresh.pdf", now)).await.unwrap();
        let done = DocumentRecord::pending("done.pdf", old)
            .completed("indexes/done-vectorstore.zip", old)
            .unwrap();
        status.put(&done).await.unwrap();

        let expired = expire_stale_runs(&status, Duration::hours(1), now).await.unwrap();
        assert_eq!(expired, vec!["stuck.pdf".to_string()]);
        assert_eq!(
            status.get("stuck.pdf").await.unwrap().unwrap().status,
            DocumentStatus::Failed
        );
        assert_eq!(
            status.get("fresh.pdf").await.unwrap().unwrap().status,
            DocumentStatus::Pending
        );
        assert_eq!(
            status.get("done.pdf").await.unwrap().unwrap().status,
            DocumentStatus::Completed
        );
    }
}
