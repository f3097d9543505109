//! Outbound email delivery.

use crate::config::Config;
use crate::error::{ErrorKind, classify_http};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced while handing an email to a transport.
#[derive(Debug, Error)]
pub enum EmailError {
    /// Transport could not be built from the supplied settings.
    #[error("Email transport misconfigured: {0}")]
    Misconfigured(String),
    /// Relay was unreachable or the call timed out.
    #[error("Mail relay unavailable: {0}")]
    Unavailable(String),
    /// Relay refused the message.
    #[error("Mail relay returned {status}: {body}")]
    Rejected {
        /// HTTP status returned by the relay.
        status: StatusCode,
        /// Response body, kept for diagnostics.
        body: String,
    },
}

impl EmailError {
    /// Classify the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Misconfigured(_) => ErrorKind::Configuration,
            Self::Unavailable(_) => ErrorKind::ServiceUnavailable,
            Self::Rejected { .. } => ErrorKind::ServiceRejected,
        }
    }
}

/// Plain-text email delivery.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Deliver one message to `to`.
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), EmailError>;
}

/// Posts messages as JSON to a mail relay API.
pub struct HttpEmailTransport {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    from: String,
}

#[derive(Serialize)]
struct MailBody<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

impl HttpEmailTransport {
    /// Build a transport for `endpoint`, sending as `from`.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        from: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, EmailError> {
        let http = Client::builder()
            .user_agent("docpipe/mail")
            .timeout(timeout)
            .build()
            .map_err(|error| EmailError::Misconfigured(error.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key,
            from: from.into(),
        })
    }
}

#[async_trait]
impl EmailTransport for HttpEmailTransport {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), EmailError> {
        let mut request = self.http.post(&self.endpoint).json(&MailBody {
            from: &self.from,
            to,
            subject,
            text: body,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|error| match classify_http(&error) {
            ErrorKind::Configuration => EmailError::Misconfigured(error.to_string()),
            _ => EmailError::Unavailable(format!("failed to reach {}: {error}", self.endpoint)),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmailError::Rejected { status, body });
        }
        Ok(())
    }
}

/// Stand-in used when no relay is configured. Every send fails, so notifications stay pending
/// until a relay is set up.
#[derive(Debug, Default)]
pub struct UnconfiguredEmailTransport;

#[async_trait]
impl EmailTransport for UnconfiguredEmailTransport {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), EmailError> {
        tracing::debug!(to, subject, "Email delivery not configured; message left pending");
        Err(EmailError::Misconfigured("MAIL_API_URL is not set".into()))
    }
}

/// Pick the relay transport when one is configured, otherwise a transport that always refuses.
pub fn transport_from_config(config: &Config) -> Result<Arc<dyn EmailTransport>, EmailError> {
    match &config.mail_api_url {
        Some(url) => Ok(Arc::new(HttpEmailTransport::new(
            url.clone(),
            config.mail_api_key.clone(),
            config.mail_from.clone(),
            config.http_timeout,
        )?)),
        None => {
            tracing::warn!("MAIL_API_URL is not set; notifications will stay pending");
            Ok(Arc::new(UnconfiguredEmailTransport))
        }
    }
}
