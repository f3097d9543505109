//! Object storage for uploaded file contents.
//!
//! [`RestObjectStorage`] speaks the Supabase storage API
//! (`/storage/v1/object/{bucket}/{path}`); [`InMemoryObjectStorage`] backs local runs and tests.

use crate::error::{ErrorKind, classify_http};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, Url};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors returned by object storage adapters.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Adapter settings were unusable.
    #[error("Object storage misconfigured: {0}")]
    Misconfigured(String),
    /// Storage could not be reached.
    #[error("Object storage unavailable: {0}")]
    Unavailable(String),
    /// Storage answered with an unexpected status.
    #[error("Object storage returned {status}: {body}")]
    Rejected {
        /// HTTP status returned by the storage service.
        status: StatusCode,
        /// Response body, kept for diagnostics.
        body: String,
    },
    /// Object does not exist.
    #[error("Object {bucket}/{path} not found")]
    NotFound {
        /// Bucket that was read.
        bucket: String,
        /// Path inside the bucket.
        path: String,
    },
}

impl StorageError {
    /// Classify the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Misconfigured(_) => ErrorKind::Configuration,
            Self::Unavailable(_) => ErrorKind::ServiceUnavailable,
            Self::Rejected { .. } => ErrorKind::ServiceRejected,
            Self::NotFound { .. } => ErrorKind::NotFound,
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(error: reqwest::Error) -> Self {
        match classify_http(&error) {
            ErrorKind::Configuration => Self::Misconfigured(error.to_string()),
            _ => Self::Unavailable(error.to_string()),
        }
    }
}

/// Bucketed blob storage.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `content` at `bucket/path`, replacing any existing object.
    async fn upload(&self, bucket: &str, path: &str, content: Bytes) -> Result<(), StorageError>;

    /// Read the object at `bucket/path`.
    async fn download(&self, bucket: &str, path: &str) -> Result<Bytes, StorageError>;
}

/// HTTP adapter for the Supabase storage API.
pub struct RestObjectStorage {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl RestObjectStorage {
    /// Construct a storage client for `base_url`.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let client = Client::builder()
            .user_agent("docpipe/storage")
            .timeout(timeout)
            .build()?;
        let base_url = Url::parse(base_url)
            .map_err(|error| StorageError::Misconfigured(format!("{base_url}: {error}")))?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Object URL with every bucket and path segment percent-encoded.
    fn object_url(&self, bucket: &str, path: &str) -> Result<Url, StorageError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                StorageError::Misconfigured(format!("{} cannot be a base URL", self.base_url))
            })?
            .pop_if_empty()
            .extend(["storage", "v1", "object"])
            .extend(bucket.split('/').filter(|segment| !segment.is_empty()))
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key.as_deref().filter(|key| !key.is_empty()) {
            Some(key) => request.header("apikey", key).bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl ObjectStorage for RestObjectStorage {
    async fn upload(&self, bucket: &str, path: &str, content: Bytes) -> Result<(), StorageError> {
        let size = content.len();
        let response = self
            .authorize(self.client.post(self.object_url(bucket, path)?))
            .header("x-upsert", "true")
            .header("content-type", "application/octet-stream")
            .body(content)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(bucket, path, %status, "Object upload failed");
            return Err(StorageError::Rejected { status, body });
        }
        tracing::debug!(bucket, path, size, "Object uploaded");
        Ok(())
    }

    async fn download(&self, bucket: &str, path: &str) -> Result<Bytes, StorageError> {
        let response = self
            .authorize(self.client.get(self.object_url(bucket, path)?))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.bytes().await?),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            }),
            status => {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(bucket, path, %status, "Object download failed");
                Err(StorageError::Rejected { status, body })
            }
        }
    }
}

/// Object storage held in process memory.
#[derive(Default)]
pub struct InMemoryObjectStorage {
    objects: RwLock<HashMap<(String, String), Bytes>>,
}

impl InMemoryObjectStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStorage for InMemoryObjectStorage {
    async fn upload(&self, bucket: &str, path: &str, content: Bytes) -> Result<(), StorageError> {
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), path.to_string()), content);
        Ok(())
    }

    async fn download(&self, bucket: &str, path: &str) -> Result<Bytes, StorageError> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            })
    }
}
