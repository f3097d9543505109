//! Pipeline facade shared by the HTTP surface.

use crate::error::ErrorKind;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::ocr::{OcrClient, OcrError, OcrOutput};
use crate::processing::{ProcessingReport, ProcessingSupervisor, Submission, SubmitError};
use crate::store::{Document, DocumentFilter, DocumentStore, StoreError};
use crate::upload::{
    UploadCoordinator, UploadError, UploadFile, UploadItemOutcome, UploadRequest,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced to API callers.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Upload request was rejected as a whole.
    #[error(transparent)]
    Upload(#[from] UploadError),
    /// Request parameters were malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// Document does not exist.
    #[error("document {0} not found")]
    NotFound(Uuid),
    /// Document could not be queued.
    #[error(transparent)]
    Submit(#[from] SubmitError),
    /// Metadata store failed.
    #[error("Store request failed: {0}")]
    Store(#[from] StoreError),
    /// Direct OCR request failed.
    #[error(transparent)]
    Ocr(#[from] OcrError),
}

impl ServiceError {
    /// Classify the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Upload(error) => error.kind(),
            Self::InvalidRequest(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Submit(error) => error.kind(),
            Self::Store(error) => error.kind(),
            Self::Ocr(error) => error.kind(),
        }
    }
}

/// Operations the HTTP surface needs from the pipeline.
#[async_trait]
pub trait PipelineApi: Send + Sync {
    /// Store and queue a batch of files.
    async fn upload(
        &self,
        request: UploadRequest,
    ) -> Result<Vec<UploadItemOutcome>, ServiceError>;

    /// List documents, oldest first.
    async fn list_documents(&self, filter: DocumentFilter) -> Result<Vec<Document>, ServiceError>;

    /// Fetch one document.
    async fn get_document(&self, id: Uuid) -> Result<Document, ServiceError>;

    /// Queue an existing document for (re)processing.
    async fn trigger(&self, id: Uuid) -> Result<Submission, ServiceError>;

    /// Run OCR on one file without storing anything.
    async fn extract_text(&self, file: UploadFile) -> Result<OcrOutput, ServiceError>;

    /// Last processing run recorded for a document since the server started.
    fn last_run(&self, id: Uuid) -> Option<ProcessingReport>;

    /// Retrieve the current metrics snapshot.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Default [`PipelineApi`] backed by the store, the upload coordinator and the supervisor.
pub struct PipelineService {
    documents: Arc<dyn DocumentStore>,
    uploads: UploadCoordinator,
    supervisor: ProcessingSupervisor,
    ocr: Arc<dyn OcrClient>,
    metrics: Arc<PipelineMetrics>,
}

impl PipelineService {
    /// Assemble the service from already-wired components.
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        uploads: UploadCoordinator,
        supervisor: ProcessingSupervisor,
        ocr: Arc<dyn OcrClient>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            documents,
            uploads,
            supervisor,
            ocr,
            metrics,
        }
    }
}

#[async_trait]
impl PipelineApi for PipelineService {
    async fn upload(
        &self,
        request: UploadRequest,
    ) -> Result<Vec<UploadItemOutcome>, ServiceError> {
        Ok(self.uploads.upload(request).await?)
    }

    async fn list_documents(&self, filter: DocumentFilter) -> Result<Vec<Document>, ServiceError> {
        Ok(self.documents.list_documents(&filter).await?)
    }

    async fn get_document(&self, id: Uuid) -> Result<Document, ServiceError> {
        self.documents
            .get_document(id)
            .await?
            .ok_or(ServiceError::NotFound(id))
    }

    async fn trigger(&self, id: Uuid) -> Result<Submission, ServiceError> {
        let document = self.get_document(id).await?;
        let submission = self.supervisor.try_submit(document.id)?;
        tracing::info!(
            document_id = %id,
            status = %document.status,
            submission = ?submission,
            "Processing requested"
        );
        Ok(submission)
    }

    async fn extract_text(&self, file: UploadFile) -> Result<OcrOutput, ServiceError> {
        if file.content.is_empty() {
            return Err(ServiceError::InvalidRequest("file is empty".into()));
        }
        self.metrics.record_ocr_call();
        let output = self.ocr.extract(&file.file_name, file.content).await?;
        tracing::info!(
            file_name = %file.file_name,
            pages = output.page_count,
            "Direct OCR request completed"
        );
        Ok(output)
    }

    fn last_run(&self, id: Uuid) -> Option<ProcessingReport> {
        self.supervisor.report(id)
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
