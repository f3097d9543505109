//! Client for the external OCR extraction service.
//!
//! The service receives one file as a multipart upload and answers with per-page text and
//! confidence. The client folds the pages into a single text block, in page order, and
//! averages the confidences.

use crate::config::Config;
use crate::error::{ErrorKind, classify_http};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    Client, StatusCode,
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced while calling the OCR service.
#[derive(Debug, Error)]
pub enum OcrError {
    /// Client could not be built or the request could not be assembled.
    #[error("OCR client misconfigured: {0}")]
    Misconfigured(String),
    /// Service was unreachable or the call timed out.
    #[error("OCR service unavailable: {0}")]
    Unavailable(String),
    /// Service answered with a non-success status.
    #[error("OCR service returned {status}: {body}")]
    Rejected {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Response body, kept for diagnostics.
        body: String,
    },
    /// Service response could not be parsed.
    #[error("Malformed OCR response: {0}")]
    InvalidResponse(String),
}

impl OcrError {
    /// Classify the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Misconfigured(_) => ErrorKind::Configuration,
            Self::Unavailable(_) => ErrorKind::ServiceUnavailable,
            Self::Rejected { .. } | Self::InvalidResponse(_) => ErrorKind::ServiceRejected,
        }
    }
}

/// Text extracted from one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrOutput {
    /// Page texts in page order, each terminated by a newline.
    pub text: String,
    /// Mean of the per-page confidences; `0.0` when no pages were returned.
    pub confidence: f64,
    /// Number of pages the service reported.
    pub page_count: usize,
    /// The service's pages, sorted by `page_index`.
    pub pages: Vec<OcrPage>,
}

/// One page as reported by the OCR service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrPage {
    /// Zero-based page index.
    #[serde(default)]
    pub page_index: usize,
    /// Recognized text.
    #[serde(default)]
    pub text: String,
    /// Mean recognition confidence for the page.
    #[serde(default, alias = "confidence")]
    pub avg_confidence: f64,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    pages: Vec<OcrPage>,
}

/// Interface implemented by OCR backends.
#[async_trait]
pub trait OcrClient: Send + Sync {
    /// Extract text from `content`, uploaded under `file_name`.
    async fn extract(&self, file_name: &str, content: Bytes) -> Result<OcrOutput, OcrError>;
}

/// Fold service pages into one output. Pages are ordered by `page_index`.
pub fn combine_pages(mut pages: Vec<OcrPage>) -> OcrOutput {
    if pages.is_empty() {
        return OcrOutput {
            text: String::new(),
            confidence: 0.0,
            page_count: 0,
            pages,
        };
    }

    pages.sort_by_key(|page| page.page_index);
    let mut text = String::new();
    let mut confidence_sum = 0.0;
    for page in &pages {
        text.push_str(&page.text);
        text.push('\n');
        confidence_sum += page.avg_confidence;
    }

    OcrOutput {
        text,
        confidence: confidence_sum / pages.len() as f64,
        page_count: pages.len(),
        pages,
    }
}

/// Multipart-over-HTTP OCR client.
pub struct HttpOcrClient {
    http: Client,
    endpoint: String,
}

impl HttpOcrClient {
    /// Build a client for `endpoint` with a per-call timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, OcrError> {
        let http = Client::builder()
            .user_agent("docpipe/ocr")
            .timeout(timeout)
            .build()
            .map_err(|error| OcrError::Misconfigured(error.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    /// Build a client from the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, OcrError> {
        Self::new(config.ocr_url.clone(), config.ocr_timeout)
    }
}

#[async_trait]
impl OcrClient for HttpOcrClient {
    async fn extract(&self, file_name: &str, content: Bytes) -> Result<OcrOutput, OcrError> {
        let size = content.len();
        let part = Part::bytes(content.to_vec()).file_name(file_name.to_string());
        let form = Form::new().part("file", part);

        tracing::debug!(file_name, size, endpoint = %self.endpoint, "Sending file to OCR");
        let response = self
            .http
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|error| match classify_http(&error) {
                ErrorKind::Configuration => OcrError::Misconfigured(error.to_string()),
                _ => OcrError::Unavailable(format!("failed to reach {}: {error}", self.endpoint)),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(file_name, %status, "OCR service rejected file");
            return Err(OcrError::Rejected { status, body });
        }

        let body: OcrResponse = response
            .json()
            .await
            .map_err(|error| OcrError::InvalidResponse(error.to_string()))?;

        if body.pages.is_empty() {
            tracing::warn!(file_name, "OCR service returned no pages");
        }
        let output = combine_pages(body.pages);
        tracing::debug!(
            file_name,
            pages = output.page_count,
            confidence = output.confidence,
            "OCR completed"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    fn page(index: usize, text: &str, confidence: f64) -> OcrPage {
        OcrPage {
            page_index: index,
            text: text.into(),
            avg_confidence: confidence,
        }
    }

    #[test]
    fn combine_pages_joins_text_and_averages_confidence() {
        let output = combine_pages(vec![page(0, "A", 0.9), page(1, "B", 0.8), page(2, "C", 0.7)]);
        assert_eq!(output.text, "A\nB\nC\n");
        assert!((output.confidence - 0.8).abs() < 1e-9);
        assert_eq!(output.page_count, 3);
    }

    #[test]
    fn combine_pages_restores_page_order() {
        let output = combine_pages(vec![page(2, "C", 0.5), page(0, "A", 0.5), page(1, "B", 0.5)]);
        assert_eq!(output.text, "A\nB\nC\n");
        let indices: Vec<usize> = output.pages.iter().map(|page| page.page_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn combine_pages_handles_empty_page_list() {
        let output = combine_pages(Vec::new());
        assert_eq!(output.text, "");
        assert_eq!(output.confidence, 0.0);
        assert_eq!(output.page_count, 0);
    }

    #[tokio::test]
    async fn extract_posts_multipart_file() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/ocr")
                    .header_exists("content-type")
                    .body_contains("scan.pdf")
                    .body_contains("PDF-BYTES");
                then.status(200).json_body(json!({
                    "pages": [
                        { "page_index": 0, "text": "A", "avg_confidence": 0.9 },
                        { "page_index": 1, "text": "B", "avg_confidence": 0.8 },
                        { "page_index": 2, "text": "C", "avg_confidence": 0.7 }
                    ]
                }));
            })
            .await;

        let client = HttpOcrClient::new(format!("{}/ocr", server.base_url()), Duration::from_secs(5))
            .expect("client");
        let output = client
            .extract("scan.pdf", Bytes::from_static(b"PDF-BYTES"))
            .await
            .expect("ocr output");

        mock.assert();
        assert_eq!(output.text, "A\nB\nC\n");
        assert!((output.confidence - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn extract_reports_status_and_body_on_rejection() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/ocr");
                then.status(422).body("unsupported format");
            })
            .await;

        let client = HttpOcrClient::new(format!("{}/ocr", server.base_url()), Duration::from_secs(5))
            .expect("client");
        let error = client
            .extract("scan.bmp", Bytes::from_static(b"..."))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::ServiceRejected);
        let message = error.to_string();
        assert!(message.contains("422"));
        assert!(message.contains("unsupported format"));
    }

    #[tokio::test]
    async fn extract_treats_missing_pages_as_empty_text() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/ocr");
                then.status(200).json_body(json!({ "pages": [] }));
            })
            .await;

        let client = HttpOcrClient::new(format!("{}/ocr", server.base_url()), Duration::from_secs(5))
            .expect("client");
        let output = client
            .extract("blank.png", Bytes::from_static(b"png"))
            .await
            .expect("empty output");
        assert_eq!(output.text, "");
        assert_eq!(output.confidence, 0.0);
    }
}
