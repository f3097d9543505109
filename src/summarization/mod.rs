//! Client for the external text-summarization service.
//!
//! The service takes one block of text and returns one summary. It knows nothing about
//! chunking; [`crate::processing::HierarchicalSummarizer`] decides what to send. Each call is
//! bounded by the client timeout so a stalled service fails the stage instead of hanging it.

use crate::config::Config;
use crate::error::{ErrorKind, classify_http};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced while calling the summarization service.
#[derive(Debug, Error)]
pub enum SummarizationClientError {
    /// Client could not be built from the supplied settings.
    #[error("Summarization client misconfigured: {0}")]
    Misconfigured(String),
    /// Service was unreachable or the call timed out.
    #[error("Summarization service unavailable: {0}")]
    ProviderUnavailable(String),
    /// Service answered with a non-success status.
    #[error("Summarization service returned {status}: {body}")]
    Rejected {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Response body, kept for diagnostics.
        body: String,
    },
    /// Service response could not be parsed.
    #[error("Malformed summarization response: {0}")]
    InvalidResponse(String),
}

impl SummarizationClientError {
    /// Classify the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Misconfigured(_) => ErrorKind::Configuration,
            Self::ProviderUnavailable(_) => ErrorKind::ServiceUnavailable,
            Self::Rejected { .. } | Self::InvalidResponse(_) => ErrorKind::ServiceRejected,
        }
    }
}

/// Interface implemented by summarization backends.
#[async_trait]
pub trait SummarizationClient: Send + Sync {
    /// Summarize one block of text.
    async fn summarize(&self, text: &str) -> Result<String, SummarizationClientError>;
}

/// JSON-over-HTTP summarization client.
pub struct HttpSummarizationClient {
    http: Client,
    endpoint: String,
    prompt: String,
}

#[derive(Serialize)]
struct SummarizeBody<'a> {
    text: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct SummarizeResponse {
    summary: String,
}

impl HttpSummarizationClient {
    /// Build a client for `endpoint` with a per-call timeout.
    pub fn new(
        endpoint: impl Into<String>,
        prompt: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SummarizationClientError> {
        let http = Client::builder()
            .user_agent("docpipe/summary")
            .timeout(timeout)
            .build()
            .map_err(|error| SummarizationClientError::Misconfigured(error.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            prompt: prompt.unwrap_or_default(),
        })
    }

    /// Build a client from the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, SummarizationClientError> {
        Self::new(
            config.summarizer_url.clone(),
            config.summarizer_prompt.clone(),
            config.summarizer_timeout,
        )
    }
}

#[async_trait]
impl SummarizationClient for HttpSummarizationClient {
    async fn summarize(&self, text: &str) -> Result<String, SummarizationClientError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&SummarizeBody {
                text,
                prompt: &self.prompt,
            })
            .send()
            .await
            .map_err(|error| match classify_http(&error) {
                ErrorKind::Configuration => {
                    SummarizationClientError::Misconfigured(error.to_string())
                }
                _ => SummarizationClientError::ProviderUnavailable(format!(
                    "failed to reach {}: {error}",
                    self.endpoint
                )),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, "Summarization service rejected request");
            return Err(SummarizationClientError::Rejected { status, body });
        }

        let body: SummarizeResponse = response.json().await.map_err(|error| {
            SummarizationClientError::InvalidResponse(format!(
                "failed to decode summarization response: {error}"
            ))
        })?;

        Ok(body.summary.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    fn client_for(server: &MockServer) -> HttpSummarizationClient {
        HttpSummarizationClient::new(
            format!("{}/summarize", server.base_url()),
            Some("Summarize briefly".into()),
            Duration::from_secs(5),
        )
        .expect("client")
    }

    #[tokio::test]
    async fn summarize_handles_successful_response() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/summarize")
                    .json_body(json!({ "text": "Long text", "prompt": "Summarize briefly" }));
                then.status(200).json_body(json!({ "summary": " Short text \n" }));
            })
            .await;

        let summary = client_for(&server)
            .summarize("Long text")
            .await
            .expect("summary");

        mock.assert();
        assert_eq!(summary, "Short text");
    }

    #[tokio::test]
    async fn summarize_reports_status_and_body_on_rejection() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/summarize");
                then.status(503).body("model loading");
            })
            .await;

        let error = client_for(&server)
            .summarize("text")
            .await
            .expect_err("error response");

        assert_eq!(error.kind(), ErrorKind::ServiceRejected);
        assert!(matches!(
            error,
            SummarizationClientError::Rejected { status, ref body }
                if status == StatusCode::SERVICE_UNAVAILABLE && body == "model loading"
        ));
    }

    #[tokio::test]
    async fn summarize_rejects_malformed_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/summarize");
                then.status(200).json_body(json!({ "unexpected": true }));
            })
            .await;

        let error = client_for(&server).summarize("text").await.unwrap_err();
        assert!(matches!(error, SummarizationClientError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn summarize_reports_unreachable_service() {
        let client = HttpSummarizationClient::new(
            "http://127.0.0.1:9/summarize",
            None,
            Duration::from_secs(2),
        )
        .expect("client");

        let error = client.summarize("text").await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ServiceUnavailable);
    }
}
