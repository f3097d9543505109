//! Per-document stage machine: `uploaded -> ocr_done -> summary_done`, with `error` reachable
//! from any stage.
//!
//! Every stage reads the persisted document first and skips work whose output is already
//! stored, so re-running a document after a failure (or after a crash between stages) resumes
//! at the first incomplete stage.

use super::summarize::HierarchicalSummarizer;
use super::types::{ProcessingError, ProcessingOutcome, Stage, StageError};
use crate::metrics::PipelineMetrics;
use crate::ocr::{OcrClient, OcrError, OcrOutput};
use crate::storage::{ObjectStorage, StorageError};
use crate::store::{
    Document, DocumentStatus, DocumentStore, DocumentUpdate, Notification, NotificationStore,
};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

const NOTIFICATION_ATTEMPTS: u32 = 3;
const NOTIFICATION_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Drives one document through OCR and summarization and records the owner notification.
pub struct DocumentProcessor {
    documents: Arc<dyn DocumentStore>,
    notifications: Arc<dyn NotificationStore>,
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
    ocr: Arc<dyn OcrClient>,
    summarizer: HierarchicalSummarizer,
    metrics: Arc<PipelineMetrics>,
    ocr_timeout: Option<Duration>,
}

impl DocumentProcessor {
    /// Wire a processor from its collaborators. Files are read from `bucket`.
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        notifications: Arc<dyn NotificationStore>,
        storage: Arc<dyn ObjectStorage>,
        bucket: impl Into<String>,
        ocr: Arc<dyn OcrClient>,
        summarizer: HierarchicalSummarizer,
    ) -> Self {
        Self {
            documents,
            notifications,
            storage,
            bucket: bucket.into(),
            ocr,
            summarizer,
            metrics: Arc::new(PipelineMetrics::new()),
            ocr_timeout: None,
        }
    }

    /// Share a metrics registry with the rest of the server.
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Bound the download and OCR calls, independent of the adapters' own timeouts.
    pub fn with_ocr_timeout(mut self, timeout: Duration) -> Self {
        self.ocr_timeout = Some(timeout);
        self
    }

    /// Metrics registry the processor reports to.
    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Run every stage that has not completed yet for document `id`.
    ///
    /// Stage failures are persisted on the document and returned as
    /// [`ProcessingOutcome::Failed`]. `Err` is reserved for a missing document or a store that
    /// cannot record the outcome.
    pub async fn process(&self, id: Uuid) -> Result<ProcessingOutcome, ProcessingError> {
        let document = self
            .documents
            .get_document(id)
            .await?
            .ok_or(ProcessingError::NotFound(id))?;

        if document.status == DocumentStatus::SummaryDone {
            // A run can stop between the summary write and the notification insert.
            if self.notifications.has_notification(id).await? {
                debug!(document_id = %id, "Document already summarized");
                return Ok(ProcessingOutcome::AlreadyComplete);
            }
            warn!(document_id = %id, "Summarized document has no notification, recording it");
            if let Err(error) = self.record_notification(&document).await {
                return self.record_failure(id, Stage::Notification, error).await;
            }
            self.metrics.record_completed();
            return Ok(ProcessingOutcome::Completed {
                ocr_ran: false,
                summarization_calls: 0,
            });
        }

        let mut ocr_ran = false;
        let ocr_text = match document.ocr_text.clone() {
            Some(text) => {
                debug!(
                    document_id = %id,
                    status = %document.status,
                    "Skipping OCR, text already stored"
                );
                text
            }
            None => match self.run_ocr(&document).await {
                Ok(output) => {
                    self.documents
                        .update_status(
                            id,
                            DocumentStatus::OcrDone,
                            DocumentUpdate::ocr(
                                output.text.clone(),
                                output.confidence,
                                OffsetDateTime::now_utc(),
                            ),
                        )
                        .await?;
                    info!(
                        document_id = %id,
                        stage = %Stage::Ocr,
                        status = %DocumentStatus::OcrDone,
                        pages = output.page_count,
                        confidence = output.confidence,
                        "OCR stage complete"
                    );
                    ocr_ran = true;
                    output.text
                }
                Err(error) => return self.record_failure(id, Stage::Ocr, error).await,
            },
        };

        let mut summarization_calls = 0;
        match &document.summary {
            Some(_) => {
                // Summary stored but the run stopped before the notification was recorded.
                self.documents
                    .update_status(id, DocumentStatus::SummaryDone, DocumentUpdate::default())
                    .await?;
            }
            None => match self.summarizer.summarize(&ocr_text).await {
                Ok(summary) => {
                    summarization_calls = summary.service_calls;
                    self.metrics
                        .record_summarization_calls(summary.service_calls as u64);
                    self.documents
                        .update_status(
                            id,
                            DocumentStatus::SummaryDone,
                            DocumentUpdate::summary(summary.text, OffsetDateTime::now_utc()),
                        )
                        .await?;
                    info!(
                        document_id = %id,
                        stage = %Stage::Summarization,
                        status = %DocumentStatus::SummaryDone,
                        chunks = summary.chunk_count,
                        calls = summary.service_calls,
                        "Summary stage complete"
                    );
                }
                Err(error) => {
                    self.metrics
                        .record_summarization_calls(error.service_calls() as u64);
                    return self
                        .record_failure(id, Stage::Summarization, error.into())
                        .await;
                }
            },
        }

        if let Err(error) = self.record_notification(&document).await {
            return self.record_failure(id, Stage::Notification, error).await;
        }

        self.metrics.record_completed();
        Ok(ProcessingOutcome::Completed {
            ocr_ran,
            summarization_calls,
        })
    }

    async fn run_ocr(&self, document: &Document) -> Result<OcrOutput, StageError> {
        let download = self.storage.download(&self.bucket, &document.file_path);
        let content = match self.ocr_timeout {
            Some(limit) => tokio::time::timeout(limit, download).await.unwrap_or_else(|_| {
                Err(StorageError::Unavailable(format!(
                    "download timed out after {}s",
                    limit.as_secs_f64()
                )))
            })?,
            None => download.await?,
        };

        self.metrics.record_ocr_call();
        let extract = self.ocr.extract(&document.file_name, content);
        let output = match self.ocr_timeout {
            Some(limit) => tokio::time::timeout(limit, extract).await.unwrap_or_else(|_| {
                Err(OcrError::Unavailable(format!(
                    "OCR call timed out after {}s",
                    limit.as_secs_f64()
                )))
            })?,
            None => extract.await?,
        };
        Ok(output)
    }

    /// Make sure the owner notification for `document` exists, inserting it at most once.
    async fn record_notification(&self, document: &Document) -> Result<(), StageError> {
        let notification =
            Notification::new(document.owner_id, document.id, OffsetDateTime::now_utc());
        let mut attempt = 1;
        loop {
            let result = match self.notifications.has_notification(document.id).await {
                Ok(true) => {
                    debug!(document_id = %document.id, "Notification already recorded");
                    return Ok(());
                }
                Ok(false) => self.notifications.insert_notification(&notification).await,
                Err(error) => Err(error),
            };
            match result {
                Ok(()) => {
                    debug!(
                        document_id = %document.id,
                        notification_id = %notification.id,
                        "Notification recorded"
                    );
                    return Ok(());
                }
                Err(error) if attempt < NOTIFICATION_ATTEMPTS => {
                    warn!(
                        document_id = %document.id,
                        attempt,
                        error = %error,
                        "Failed to record notification, retrying"
                    );
                    tokio::time::sleep(NOTIFICATION_RETRY_DELAY * attempt).await;
                    attempt += 1;
                }
                Err(error) => return Err(StageError::Notification(error)),
            }
        }
    }

    async fn record_failure(
        &self,
        id: Uuid,
        stage: Stage,
        error: StageError,
    ) -> Result<ProcessingOutcome, ProcessingError> {
        let message = error.to_string();
        let kind = error.kind();
        warn!(
            document_id = %id,
            stage = %stage,
            status = %DocumentStatus::Error,
            kind = ?kind,
            error = %message,
            "Processing stage failed"
        );
        self.documents
            .update_status(
                id,
                DocumentStatus::Error,
                DocumentUpdate::failure(message.clone()),
            )
            .await?;
        self.metrics.record_failed();
        Ok(ProcessingOutcome::Failed {
            stage,
            kind,
            message,
        })
    }
}
