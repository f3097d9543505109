//! Batch upload: store each file, create its document record, and queue it for processing.

use crate::error::ErrorKind;
use crate::metrics::PipelineMetrics;
use crate::processing::{ProcessingSupervisor, Submission};
use crate::storage::ObjectStorage;
use crate::store::{DocumentStore, NewDocument};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_LANGUAGE: &str = "en";

/// Errors that reject a whole upload request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    /// Request is missing required fields.
    #[error("Invalid upload: {0}")]
    Validation(String),
}

impl UploadError {
    /// Classify the failure.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

/// One file in an upload request.
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Name supplied by the client.
    pub file_name: String,
    /// Raw file contents.
    pub content: Bytes,
}

/// A batch of files shared by one owner and set of departments.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    /// Files to ingest.
    pub files: Vec<UploadFile>,
    /// Departments the documents belong to; the first one prefixes the storage path.
    pub department_ids: Vec<Uuid>,
    /// Uploading user, notified once each document is summarized.
    pub owner_id: Option<Uuid>,
    /// Source language tag; `en` when absent.
    pub language: Option<String>,
}

/// Result for one file of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadItemOutcome {
    /// File stored and document created.
    Accepted {
        /// Identifier of the new document.
        document_id: Uuid,
        /// Name of the uploaded file.
        file_name: String,
        /// Whether the document entered the processing queue right away. When `false` it is
        /// picked up by the recovery sweep or a manual re-trigger.
        queued: bool,
    },
    /// File was not ingested; other files in the batch are unaffected.
    Failed {
        /// Name of the uploaded file.
        file_name: String,
        /// Human readable failure.
        reason: String,
    },
}

/// Coordinates storage, metadata and the processing queue for uploads.
pub struct UploadCoordinator {
    documents: Arc<dyn DocumentStore>,
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
    supervisor: ProcessingSupervisor,
    metrics: Arc<PipelineMetrics>,
}

impl UploadCoordinator {
    /// Create a coordinator writing files into `bucket`.
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        storage: Arc<dyn ObjectStorage>,
        bucket: impl Into<String>,
        supervisor: ProcessingSupervisor,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            documents,
            storage,
            bucket: bucket.into(),
            supervisor,
            metrics,
        }
    }

    /// Ingest every file in `request`.
    ///
    /// Request-level problems fail the call before anything is stored; per-file failures are
    /// reported in the returned list, in request order.
    pub async fn upload(
        &self,
        request: UploadRequest,
    ) -> Result<Vec<UploadItemOutcome>, UploadError> {
        let owner_id = validate(&request)?;
        let department = request.department_ids[0];
        let language = request
            .language
            .filter(|language| !language.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        let mut outcomes = Vec::with_capacity(request.files.len());
        for file in request.files {
            let outcome = self
                .ingest(
                    file,
                    department,
                    &request.department_ids,
                    owner_id,
                    &language,
                )
                .await;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn ingest(
        &self,
        file: UploadFile,
        department: Uuid,
        department_ids: &[Uuid],
        owner_id: Uuid,
        language: &str,
    ) -> UploadItemOutcome {
        let file_name = file.file_name.trim().to_string();
        let path = object_path(department, &file_name);

        if let Err(error) = self
            .storage
            .upload(&self.bucket, &path, file.content)
            .await
        {
            warn!(file_name = %file_name, error = %error, "Failed to store uploaded file");
            return UploadItemOutcome::Failed {
                file_name,
                reason: error.to_string(),
            };
        }

        let document = match self
            .documents
            .insert_document(NewDocument {
                file_name: file_name.clone(),
                language: language.to_string(),
                file_path: path,
                department_ids: department_ids.to_vec(),
                owner_id,
            })
            .await
        {
            Ok(document) => document,
            Err(error) => {
                warn!(
                    file_name = %file_name,
                    error = %error,
                    "Failed to create document record"
                );
                return UploadItemOutcome::Failed {
                    file_name,
                    reason: error.to_string(),
                };
            }
        };
        self.metrics.record_upload();

        let queued = match self.supervisor.try_submit(document.id) {
            Ok(Submission::Queued | Submission::AlreadyInFlight) => true,
            Err(error) => {
                warn!(
                    document_id = %document.id,
                    error = %error,
                    "Document stored but not queued"
                );
                false
            }
        };
        info!(
            document_id = %document.id,
            file_name = %file_name,
            queued,
            "Document uploaded"
        );

        UploadItemOutcome::Accepted {
            document_id: document.id,
            file_name,
            queued,
        }
    }
}

fn validate(request: &UploadRequest) -> Result<Uuid, UploadError> {
    if request.files.is_empty() {
        return Err(UploadError::Validation("at least one file is required".into()));
    }
    if request.department_ids.is_empty() {
        return Err(UploadError::Validation(
            "at least one department is required".into(),
        ));
    }
    let owner_id = request
        .owner_id
        .ok_or_else(|| UploadError::Validation("owner_id is required".into()))?;
    if request
        .files
        .iter()
        .any(|file| file.file_name.trim().is_empty())
    {
        return Err(UploadError::Validation("file names must not be empty".into()));
    }
    Ok(owner_id)
}

/// Storage path for an uploaded file: `{department}/{uuid}-{file_name}`.
fn object_path(department: Uuid, file_name: &str) -> String {
    let safe_name = file_name.replace(['/', '\\'], "_");
    format!("{department}/{}-{safe_name}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{OcrClient, OcrError, OcrOutput};
    use crate::processing::{DocumentProcessor, HierarchicalSummarizer, SupervisorWorker};
    use crate::storage::{InMemoryObjectStorage, StorageError};
    use crate::store::{DocumentStatus, InMemoryStore};
    use crate::summarization::{SummarizationClient, SummarizationClientError};
    use async_trait::async_trait;

    struct UnusedOcr;

    #[async_trait]
    impl OcrClient for UnusedOcr {
        async fn extract(&self, _: &str, _: Bytes) -> Result<OcrOutput, OcrError> {
            Err(OcrError::Unavailable("not under test".into()))
        }
    }

    struct UnusedSummarizer;

    #[async_trait]
    impl SummarizationClient for UnusedSummarizer {
        async fn summarize(&self, _: &str) -> Result<String, SummarizationClientError> {
            Err(SummarizationClientError::ProviderUnavailable("not under test".into()))
        }
    }

    /// Storage that refuses files whose path contains `reject`.
    struct PickyStorage {
        inner: InMemoryObjectStorage,
    }

    #[async_trait]
    impl ObjectStorage for PickyStorage {
        async fn upload(
            &self,
            bucket: &str,
            path: &str,
            content: Bytes,
        ) -> Result<(), StorageError> {
            if path.contains("reject") {
                return Err(StorageError::Unavailable("disk full".into()));
            }
            self.inner.upload(bucket, path, content).await
        }

        async fn download(&self, bucket: &str, path: &str) -> Result<Bytes, StorageError> {
            self.inner.download(bucket, path).await
        }
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        storage: Arc<PickyStorage>,
        supervisor: ProcessingSupervisor,
        coordinator: UploadCoordinator,
        _worker: SupervisorWorker,
    }

    fn fixture(queue_capacity: usize) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let storage = Arc::new(PickyStorage {
            inner: InMemoryObjectStorage::new(),
        });
        let summarizer =
            HierarchicalSummarizer::new(Arc::new(UnusedSummarizer), 700, 50).expect("window");
        let processor = Arc::new(DocumentProcessor::new(
            store.clone(),
            store.clone(),
            storage.clone(),
            "documents",
            Arc::new(UnusedOcr),
            summarizer,
        ));
        // Worker is never run, so queued documents stay `uploaded`.
        let (supervisor, worker) = ProcessingSupervisor::new(processor, 1, queue_capacity);
        let coordinator = UploadCoordinator::new(
            store.clone(),
            storage.clone(),
            "documents",
            supervisor.clone(),
            Arc::new(PipelineMetrics::new()),
        );
        Fixture {
            store,
            storage,
            supervisor,
            coordinator,
            _worker: worker,
        }
    }

    fn file(name: &str) -> UploadFile {
        UploadFile {
            file_name: name.into(),
            content: Bytes::from(format!("contents of {name}")),
        }
    }

    fn request(files: Vec<UploadFile>) -> UploadRequest {
        UploadRequest {
            files,
            department_ids: vec![Uuid::new_v4()],
            owner_id: Some(Uuid::new_v4()),
            language: None,
        }
    }

    #[tokio::test]
    async fn upload_stores_files_and_queues_documents() {
        let fixture = fixture(8);
        let request = request(vec![file("a.pdf"), file("b.png")]);
        let department = request.department_ids[0];
        let owner = request.owner_id.unwrap();

        let outcomes = fixture.coordinator.upload(request).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        for (outcome, name) in outcomes.iter().zip(["a.pdf", "b.png"]) {
            let UploadItemOutcome::Accepted {
                document_id,
                file_name,
                queued,
            } = outcome
            else {
                panic!("expected acceptance, got {outcome:?}");
            };
            assert_eq!(file_name, name);
            assert!(queued);
            assert!(fixture.supervisor.is_in_flight(*document_id));

            let document = fixture
                .store
                .get_document(*document_id)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(document.status, DocumentStatus::Uploaded);
            assert_eq!(document.owner_id, owner);
            assert_eq!(document.language, "en");
            assert!(document.file_path.starts_with(&format!("{department}/")));
            assert!(document.file_path.ends_with(&format!("-{name}")));

            let stored = fixture
                .storage
                .download("documents", &document.file_path)
                .await
                .unwrap();
            assert_eq!(stored, Bytes::from(format!("contents of {name}")));
        }
    }

    #[tokio::test]
    async fn one_failed_file_does_not_stop_the_batch() {
        let fixture = fixture(8);

        let outcomes = fixture
            .coordinator
            .upload(request(vec![file("reject.pdf"), file("ok.pdf")]))
            .await
            .unwrap();

        assert!(matches!(
            &outcomes[0],
            UploadItemOutcome::Failed { file_name, reason }
                if file_name == "reject.pdf" && reason.contains("disk full")
        ));
        assert!(matches!(&outcomes[1], UploadItemOutcome::Accepted { .. }));
    }

    #[tokio::test]
    async fn full_queue_still_accepts_the_document() {
        let fixture = fixture(1);

        let outcomes = fixture
            .coordinator
            .upload(request(vec![file("first.pdf"), file("second.pdf")]))
            .await
            .unwrap();

        assert!(matches!(
            outcomes[0],
            UploadItemOutcome::Accepted { queued: true, .. }
        ));
        assert!(matches!(
            outcomes[1],
            UploadItemOutcome::Accepted { queued: false, .. }
        ));
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_storing() {
        let fixture = fixture(8);
        let cases = [
            (request(vec![]), "at least one file"),
            (
                UploadRequest {
                    department_ids: vec![],
                    ..request(vec![file("a.pdf")])
                },
                "department",
            ),
            (
                UploadRequest {
                    owner_id: None,
                    ..request(vec![file("a.pdf")])
                },
                "owner_id",
            ),
            (request(vec![file("a.pdf"), file("  ")]), "file names"),
        ];

        for (request, expected) in cases {
            let error = fixture.coordinator.upload(request).await.unwrap_err();
            assert_eq!(error.kind(), ErrorKind::Validation);
            assert!(error.to_string().contains(expected), "{error}");
        }
        let listed = fixture
            .store
            .list_documents(&Default::default())
            .await
            .unwrap();
        assert!(listed.is_empty());
    }

    #[test]
    fn object_path_flattens_separators() {
        let department = Uuid::new_v4();
        let path = object_path(department, "../etc/passwd");
        assert!(path.starts_with(&format!("{department}/")));
        assert!(path.ends_with("-.._etc_passwd"));
        assert_eq!(path.matches('/').count(), 1);
    }
}
