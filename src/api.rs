//! HTTP surface for docpipe.
//!
//! This module exposes a compact Axum router:
//!
//! - `POST /v1/documents` – Multipart upload of one or more `files` plus `department_ids`,
//!   `owner_id` and an optional `language`. Returns one outcome per file.
//! - `GET /v1/documents` – List documents, optionally filtered by `status`, capped by `limit`.
//! - `GET /v1/documents/:id` – Fetch a document together with its last processing run.
//! - `POST /v1/documents/:id/process` – Queue a document for (re)processing.
//! - `POST /ocr` – Run OCR on a single multipart `file` and return its pages; nothing is stored.
//! - `GET /metrics` – Pipeline counters.
//! - `GET /health` – Liveness check.

use crate::error::ErrorKind;
use crate::metrics::MetricsSnapshot;
use crate::ocr::OcrOutput;
use crate::processing::{ProcessingReport, Submission, SubmitError};
use crate::service::{PipelineApi, ServiceError};
use crate::store::{Document, DocumentFilter, DocumentStatus};
use crate::upload::{UploadFile, UploadItemOutcome, UploadRequest};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State, multipart::MultipartError},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
const MAX_LIST_LIMIT: usize = 100;

/// Build the HTTP router exposing the pipeline API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: PipelineApi + 'static,
{
    Router::new()
        .route(
            "/v1/documents",
            get(list_documents::<S>).post(upload_documents::<S>),
        )
        .route("/v1/documents/:id", get(get_document::<S>))
        .route("/v1/documents/:id/process", post(trigger_processing::<S>))
        .route("/ocr", post(extract_text::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(service)
}

/// Response body for `POST /v1/documents`.
#[derive(Serialize)]
struct UploadResponse {
    results: Vec<UploadItemOutcome>,
}

/// Store and queue every file in a multipart upload.
async fn upload_documents<S>(
    State(service): State<Arc<S>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError>
where
    S: PipelineApi,
{
    let request = read_upload(&mut multipart).await?;
    let file_count = request.files.len();
    let results = service.upload(request).await?;
    tracing::info!(files = file_count, "Upload request completed");
    Ok(Json(UploadResponse { results }))
}

async fn read_upload(multipart: &mut Multipart) -> Result<UploadRequest, ServiceError> {
    let mut request = UploadRequest::default();
    while let Some(field) = multipart.next_field().await.map_err(invalid_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" | "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content = field.bytes().await.map_err(invalid_multipart)?;
                request.files.push(UploadFile { file_name, content });
            }
            "department_ids" | "department_id" => {
                let text = field.text().await.map_err(invalid_multipart)?;
                for value in text.split(',').map(str::trim).filter(|v| !v.is_empty()) {
                    request.department_ids.push(parse_uuid("department_ids", value)?);
                }
            }
            "owner_id" => {
                let text = field.text().await.map_err(invalid_multipart)?;
                let text = text.trim();
                if !text.is_empty() {
                    request.owner_id = Some(parse_uuid("owner_id", text)?);
                }
            }
            "language" => {
                request.language = Some(field.text().await.map_err(invalid_multipart)?);
            }
            other => tracing::debug!(field = other, "Ignoring unknown upload field"),
        }
    }
    Ok(request)
}

fn invalid_multipart(error: MultipartError) -> ServiceError {
    ServiceError::InvalidRequest(format!("malformed multipart body: {error}"))
}

fn parse_uuid(field: &str, value: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(value)
        .map_err(|_| ServiceError::InvalidRequest(format!("{field} must be a UUID, got `{value}`")))
}

/// Query string for `GET /v1/documents`.
#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

/// Response body for `GET /v1/documents`.
#[derive(Serialize)]
struct ListResponse {
    documents: Vec<Document>,
}

/// List documents, oldest first.
async fn list_documents<S>(
    State(service): State<Arc<S>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, AppError>
where
    S: PipelineApi,
{
    let status = query
        .status
        .filter(|status| !status.trim().is_empty())
        .map(|status| {
            status.parse::<DocumentStatus>().map_err(|_| {
                ServiceError::InvalidRequest(format!(
                    "unknown status `{status}`; expected uploaded, ocr_done, summary_done or error"
                ))
            })
        })
        .transpose()?;
    let filter = DocumentFilter {
        status,
        limit: query
            .limit
            .unwrap_or(DocumentFilter::default().limit)
            .clamp(1, MAX_LIST_LIMIT),
    };
    let documents = service.list_documents(filter).await?;
    Ok(Json(ListResponse { documents }))
}

/// Response body for `GET /v1/documents/:id`.
#[derive(Serialize)]
struct DocumentResponse {
    #[serde(flatten)]
    document: Document,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_run: Option<ProcessingReport>,
}

/// Fetch a document.
async fn get_document<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentResponse>, AppError>
where
    S: PipelineApi,
{
    let document = service.get_document(id).await?;
    Ok(Json(DocumentResponse {
        document,
        last_run: service.last_run(id),
    }))
}

/// Response body for `POST /v1/documents/:id/process`.
#[derive(Serialize)]
struct TriggerResponse {
    document_id: Uuid,
    submission: Submission,
}

/// Queue a document for processing; stages already complete are skipped by the worker.
async fn trigger_processing<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<TriggerResponse>), AppError>
where
    S: PipelineApi,
{
    let submission = service.trigger(id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            document_id: id,
            submission,
        }),
    ))
}

/// OCR one uploaded `file` and return the service's pages.
async fn extract_text<S>(
    State(service): State<Arc<S>>,
    mut multipart: Multipart,
) -> Result<Json<OcrOutput>, AppError>
where
    S: PipelineApi,
{
    let mut file = None;
    while let Some(field) = multipart.next_field().await.map_err(invalid_multipart)? {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let content = field.bytes().await.map_err(invalid_multipart)?;
            file = Some(UploadFile { file_name, content });
            break;
        }
    }
    let file =
        file.ok_or_else(|| ServiceError::InvalidRequest("file field is required".into()))?;
    Ok(Json(service.extract_text(file).await?))
}

/// Return the pipeline counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: PipelineApi,
{
    Json(service.metrics_snapshot())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

struct AppError(ServiceError);

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            ServiceError::Upload(_) | ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Submit(SubmitError::QueueFull(_) | SubmitError::Closed) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServiceError::Ocr(error) => match error.kind() {
                ErrorKind::ServiceUnavailable | ErrorKind::ServiceRejected => {
                    StatusCode::BAD_GATEWAY
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServiceError::Store(error) => match error.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Configuration | ErrorKind::Validation => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                ErrorKind::ServiceUnavailable | ErrorKind::ServiceRejected => {
                    StatusCode::BAD_GATEWAY
                }
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(%status, error = %self.0, "Request failed");
        }
        let body = json!({ "error": self.0.to_string(), "kind": self.0.kind() });
        (status, Json(body)).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(inner: ServiceError) -> Self {
        Self(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::create_router;
    use crate::metrics::MetricsSnapshot;
    use crate::ocr::{OcrError, OcrOutput, OcrPage, combine_pages};
    use crate::processing::{ProcessingReport, Submission, SubmitError};
    use crate::service::{PipelineApi, ServiceError};
    use crate::store::{Document, DocumentFilter, DocumentStatus, NewDocument};
    use crate::upload::{UploadError, UploadFile, UploadItemOutcome, UploadRequest};
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
        response::Response,
    };
    use std::sync::Arc;
    use time::OffsetDateTime;
    use tokio::sync::Mutex;
    use tower::ServiceExt;
    use uuid::Uuid;

    const BOUNDARY: &str = "docpipe-test-boundary";

    #[derive(Default)]
    struct StubPipeline {
        documents: Vec<Document>,
        uploads: Mutex<Vec<UploadRequest>>,
        filters: Mutex<Vec<DocumentFilter>>,
        queue_full: bool,
        ocr_down: bool,
    }

    impl StubPipeline {
        fn with_document() -> (Self, Document) {
            let document = Document::from_new(
                NewDocument {
                    file_name: "scan.pdf".into(),
                    language: "en".into(),
                    file_path: "dept/scan.pdf".into(),
                    department_ids: vec![Uuid::new_v4()],
                    owner_id: Uuid::new_v4(),
                },
                OffsetDateTime::now_utc(),
            );
            (
                Self {
                    documents: vec![document.clone()],
                    ..Self::default()
                },
                document,
            )
        }
    }

    #[async_trait]
    impl PipelineApi for StubPipeline {
        async fn upload(
            &self,
            request: UploadRequest,
        ) -> Result<Vec<UploadItemOutcome>, ServiceError> {
            if request.files.is_empty() {
                let error = UploadError::Validation("at least one file is required".into());
                return Err(error.into());
            }
            let results = request
                .files
                .iter()
                .map(|file| UploadItemOutcome::Accepted {
                    document_id: Uuid::new_v4(),
                    file_name: file.file_name.clone(),
                    queued: true,
                })
                .collect();
            self.uploads.lock().await.push(request);
            Ok(results)
        }

        async fn list_documents(
            &self,
            filter: DocumentFilter,
        ) -> Result<Vec<Document>, ServiceError> {
            self.filters.lock().await.push(filter);
            Ok(self
                .documents
                .iter()
                .filter(|document| filter.status.is_none_or(|status| document.status == status))
                .take(filter.limit)
                .cloned()
                .collect())
        }

        async fn get_document(&self, id: Uuid) -> Result<Document, ServiceError> {
            self.documents
                .iter()
                .find(|document| document.id == id)
                .cloned()
                .ok_or(ServiceError::NotFound(id))
        }

        async fn trigger(&self, id: Uuid) -> Result<Submission, ServiceError> {
            self.get_document(id).await?;
            if self.queue_full {
                return Err(SubmitError::QueueFull(id).into());
            }
            Ok(Submission::Queued)
        }

        async fn extract_text(&self, file: UploadFile) -> Result<OcrOutput, ServiceError> {
            if self.ocr_down {
                return Err(OcrError::Unavailable("connection refused".into()).into());
            }
            let text = String::from_utf8_lossy(&file.content).to_string();
            Ok(combine_pages(vec![
                OcrPage {
                    page_index: 1,
                    text: file.file_name,
                    avg_confidence: 0.5,
                },
                OcrPage {
                    page_index: 0,
                    text,
                    avg_confidence: 0.9,
                },
            ]))
        }

        fn last_run(&self, _id: Uuid) -> Option<ProcessingReport> {
            None
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot {
                documents_uploaded: 3,
                ..MetricsSnapshot::default()
            }
        }
    }

    async fn send(service: Arc<StubPipeline>, request: Request<Body>) -> Response {
        create_router(service)
            .oneshot(request)
            .await
            .expect("router response")
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&body).expect("json body")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    fn multipart(parts: &[(&str, Option<&str>, &str)]) -> Request<Body> {
        multipart_to("/v1/documents", parts)
    }

    fn multipart_to(uri: &str, parts: &[(&str, Option<&str>, &str)]) -> Request<Body> {
        let mut body = String::new();
        for (name, file_name, value) in parts {
            body.push_str(&format!("--{BOUNDARY}\r\n"));
            match file_name {
                Some(file_name) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"
                )),
            }
            body.push_str(value);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    #[tokio::test]
    async fn upload_route_parses_multipart_fields() {
        let service = Arc::new(StubPipeline::default());
        let departments = [Uuid::new_v4(), Uuid::new_v4()];
        let owner = Uuid::new_v4();
        let department_list = format!("{}, {}", departments[0], departments[1]);
        let owner_text = owner.to_string();

        let response = send(
            service.clone(),
            multipart(&[
                ("files", Some("a.pdf"), "%PDF-a"),
                ("files", Some("b.png"), "PNG-b"),
                ("department_ids", None, department_list.as_str()),
                ("owner_id", None, owner_text.as_str()),
                ("language", None, "de"),
            ]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        let results = json["results"].as_array().expect("results");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["status"], "accepted");
        assert_eq!(results[0]["file_name"], "a.pdf");

        let uploads = service.uploads.lock().await;
        let request = &uploads[0];
        assert_eq!(request.department_ids, departments);
        assert_eq!(request.owner_id, Some(owner));
        assert_eq!(request.language.as_deref(), Some("de"));
        assert_eq!(request.files[1].file_name, "b.png");
        assert_eq!(&request.files[1].content[..], b"PNG-b");
    }

    #[tokio::test]
    async fn upload_without_files_is_bad_request() {
        let department = Uuid::new_v4().to_string();
        let response = send(
            Arc::new(StubPipeline::default()),
            multipart(&[("department_ids", None, department.as_str())]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert_eq!(json["kind"], "validation");
    }

    #[tokio::test]
    async fn upload_with_malformed_owner_is_bad_request() {
        let response = send(
            Arc::new(StubPipeline::default()),
            multipart(&[
                ("files", Some("a.pdf"), "%PDF"),
                ("owner_id", None, "not-a-uuid"),
            ]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert!(json["error"].as_str().unwrap().contains("owner_id"));
    }

    #[tokio::test]
    async fn list_route_applies_status_and_limit() {
        let (stub, document) = StubPipeline::with_document();
        let service = Arc::new(stub);

        let response = send(
            service.clone(),
            get("/v1/documents?status=uploaded&limit=500"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["documents"][0]["id"], document.id.to_string());
        let filters = service.filters.lock().await;
        assert_eq!(filters[0].status, Some(DocumentStatus::Uploaded));
        assert_eq!(filters[0].limit, 100);
    }

    #[tokio::test]
    async fn list_route_defaults_limit_to_twenty() {
        let service = Arc::new(StubPipeline::default());

        let response = send(service.clone(), get("/v1/documents")).await;

        assert_eq!(response.status(), StatusCode::OK);
        let filters = service.filters.lock().await;
        assert_eq!(filters[0].status, None);
        assert_eq!(filters[0].limit, 20);
    }

    #[tokio::test]
    async fn list_route_rejects_unknown_status() {
        let response = send(
            Arc::new(StubPipeline::default()),
            get("/v1/documents?status=finished"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_route_returns_document_or_404() {
        let (stub, document) = StubPipeline::with_document();
        let service = Arc::new(stub);

        let found = send(
            service.clone(),
            get(&format!("/v1/documents/{}", document.id)),
        )
        .await;
        assert_eq!(found.status(), StatusCode::OK);
        let json = json_body(found).await;
        assert_eq!(json["file_name"], "scan.pdf");
        assert_eq!(json["status"], "uploaded");

        let missing = send(service, get(&format!("/v1/documents/{}", Uuid::new_v4()))).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn process_route_queues_document() {
        let (stub, document) = StubPipeline::with_document();

        let response = send(
            Arc::new(stub),
            Request::builder()
                .method(Method::POST)
                .uri(format!("/v1/documents/{}/process", document.id))
                .body(Body::empty())
                .expect("request"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = json_body(response).await;
        assert_eq!(json["submission"], "queued");
    }

    #[tokio::test]
    async fn process_route_maps_full_queue_to_503() {
        let (stub, document) = StubPipeline::with_document();
        let stub = StubPipeline {
            queue_full: true,
            ..stub
        };

        let response = send(
            Arc::new(stub),
            Request::builder()
                .method(Method::POST)
                .uri(format!("/v1/documents/{}/process", document.id))
                .body(Body::empty())
                .expect("request"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_and_health_routes_respond() {
        let service = Arc::new(StubPipeline::default());

        let metrics = send(service.clone(), get("/metrics")).await;
        assert_eq!(metrics.status(), StatusCode::OK);
        assert_eq!(json_body(metrics).await["documents_uploaded"], 3);

        let health = send(service, get("/health")).await;
        assert_eq!(json_body(health).await["status"], "ok");
    }

    #[tokio::test]
    async fn ocr_route_returns_sorted_pages() {
        let response = send(
            Arc::new(StubPipeline::default()),
            multipart_to("/ocr", &[("file", Some("scan.png"), "page zero")]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["page_count"], 2);
        assert_eq!(json["pages"][0]["page_index"], 0);
        assert_eq!(json["pages"][0]["text"], "page zero");
        assert_eq!(json["pages"][1]["text"], "scan.png");
        assert_eq!(json["text"], "page zero\nscan.png\n");
    }

    #[tokio::test]
    async fn ocr_route_requires_file_field() {
        let response = send(
            Arc::new(StubPipeline::default()),
            multipart_to("/ocr", &[("files", Some("scan.png"), "data")]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert!(json["error"].as_str().unwrap().contains("file field"));
    }

    #[tokio::test]
    async fn ocr_route_maps_service_outage_to_502() {
        let stub = StubPipeline {
            ocr_down: true,
            ..StubPipeline::default()
        };

        let response = send(
            Arc::new(stub),
            multipart_to("/ocr", &[("file", Some("scan.png"), "data")]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(json_body(response).await["kind"], "service_unavailable");
    }
}
