//! Records persisted by the metadata store and the errors its adapters return.

use crate::error::{ErrorKind, classify_http};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Errors returned by metadata store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Adapter settings were unusable (bad base URL, client build failure).
    #[error("Store misconfigured: {0}")]
    Misconfigured(String),
    /// Store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    /// Store answered with an unexpected status.
    #[error("Unexpected store response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the store.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Store response could not be decoded.
    #[error("Malformed store response: {0}")]
    InvalidResponse(String),
    /// Referenced record does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Record type that was looked up.
        entity: &'static str,
        /// Identifier that failed to resolve.
        id: Uuid,
    },
}

impl StoreError {
    /// Classify the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Misconfigured(_) => ErrorKind::Configuration,
            Self::Unavailable(_) => ErrorKind::ServiceUnavailable,
            Self::UnexpectedStatus { .. } | Self::InvalidResponse(_) => ErrorKind::ServiceRejected,
            Self::NotFound { .. } => ErrorKind::NotFound,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(error: reqwest::Error) -> Self {
        match classify_http(&error) {
            ErrorKind::Configuration => Self::Misconfigured(error.to_string()),
            ErrorKind::ServiceRejected => Self::InvalidResponse(error.to_string()),
            _ => Self::Unavailable(error.to_string()),
        }
    }
}

/// Processing status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Stored and waiting for OCR.
    Uploaded,
    /// OCR text persisted; waiting for summarization.
    OcrDone,
    /// Summary persisted; the document is complete.
    SummaryDone,
    /// The last processing attempt failed; see `error_message`.
    Error,
}

impl DocumentStatus {
    /// Wire representation used by the store and the HTTP API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::OcrDone => "ocr_done",
            Self::SummaryDone => "summary_done",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "uploaded" => Ok(Self::Uploaded),
            "ocr_done" => Ok(Self::OcrDone),
            "summary_done" => Ok(Self::SummaryDone),
            "error" => Ok(Self::Error),
            _ => Err(()),
        }
    }
}

/// An uploaded file and everything the pipeline learned about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Identifier assigned at creation.
    pub id: Uuid,
    /// Original file name.
    pub file_name: String,
    /// Source language tag.
    pub language: String,
    /// Object-storage path of the file contents, relative to the bucket.
    pub file_path: String,
    /// Owning departments.
    pub department_ids: Vec<Uuid>,
    /// Uploading user, who receives the notification.
    pub owner_id: Uuid,
    /// OCR output; `None` until OCR completes.
    #[serde(default)]
    pub ocr_text: Option<String>,
    /// Mean OCR confidence.
    #[serde(default)]
    pub ocr_confidence: Option<f64>,
    /// Summary; `None` until summarization completes.
    #[serde(default)]
    pub summary: Option<String>,
    /// Message of the last failed stage.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Current status.
    pub status: DocumentStatus,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last modification time.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Time the OCR text was persisted.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub ocr_completed_at: Option<OffsetDateTime>,
    /// Time the summary was persisted.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub summary_completed_at: Option<OffsetDateTime>,
}

impl Document {
    /// Build a freshly uploaded document.
    pub fn from_new(new: NewDocument, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name: new.file_name,
            language: new.language,
            file_path: new.file_path,
            department_ids: new.department_ids,
            owner_id: new.owner_id,
            ocr_text: None,
            ocr_confidence: None,
            summary: None,
            error_message: None,
            status: DocumentStatus::Uploaded,
            created_at: now,
            updated_at: now,
            ocr_completed_at: None,
            summary_completed_at: None,
        }
    }

    /// Apply a status transition and its fields in place.
    ///
    /// Any status other than `error` clears a stale `error_message`.
    pub fn apply(&mut self, status: DocumentStatus, update: DocumentUpdate, now: OffsetDateTime) {
        self.status = status;
        self.updated_at = now;
        if let Some(text) = update.ocr_text {
            self.ocr_text = Some(text);
        }
        if let Some(confidence) = update.ocr_confidence {
            self.ocr_confidence = Some(confidence);
        }
        if let Some(at) = update.ocr_completed_at {
            self.ocr_completed_at = Some(at);
        }
        if let Some(summary) = update.summary {
            self.summary = Some(summary);
        }
        if let Some(at) = update.summary_completed_at {
            self.summary_completed_at = Some(at);
        }
        if status == DocumentStatus::Error {
            self.error_message = update.error_message;
        } else {
            self.error_message = None;
        }
    }
}

/// Fields supplied by the upload path when creating a document.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    /// Original file name.
    pub file_name: String,
    /// Source language tag.
    pub language: String,
    /// Object-storage path of the file contents.
    pub file_path: String,
    /// Owning departments.
    pub department_ids: Vec<Uuid>,
    /// Uploading user.
    pub owner_id: Uuid,
}

/// Content fields persisted together with a status change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentUpdate {
    /// OCR output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
    /// Mean OCR confidence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_confidence: Option<f64>,
    /// OCR completion time.
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub ocr_completed_at: Option<OffsetDateTime>,
    /// Summary text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Summary completion time.
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub summary_completed_at: Option<OffsetDateTime>,
    /// Failure message for `error` transitions.
    pub error_message: Option<String>,
}

impl DocumentUpdate {
    /// Fields for the `ocr_done` transition.
    pub fn ocr(text: String, confidence: f64, at: OffsetDateTime) -> Self {
        Self {
            ocr_text: Some(text),
            ocr_confidence: Some(confidence),
            ocr_completed_at: Some(at),
            ..Self::default()
        }
    }

    /// Fields for the `summary_done` transition.
    pub fn summary(summary: String, at: OffsetDateTime) -> Self {
        Self {
            summary: Some(summary),
            summary_completed_at: Some(at),
            ..Self::default()
        }
    }

    /// Fields for the `error` transition.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Document listing filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentFilter {
    /// Only return documents with this status.
    pub status: Option<DocumentStatus>,
    /// Maximum number of documents returned, oldest first.
    pub limit: usize,
}

impl Default for DocumentFilter {
    fn default() -> Self {
        Self {
            status: None,
            limit: 20,
        }
    }
}

/// A pending or delivered "document processed" email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Identifier assigned at creation.
    pub id: Uuid,
    /// Recipient user.
    pub user_id: Uuid,
    /// Document the notification is about.
    pub document_id: Uuid,
    /// Whether delivery succeeded. Never reset once true.
    #[serde(default)]
    pub sent: bool,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Notification {
    /// Build an unsent notification for `user_id` about `document_id`.
    pub fn new(user_id: Uuid, document_id: Uuid, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            document_id,
            sent: false,
            created_at: now,
        }
    }
}

/// User lookup record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Identifier.
    pub id: Uuid,
    /// Email address, when the user has one on file.
    #[serde(default)]
    pub email: Option<String>,
    /// Department the user belongs to.
    #[serde(default)]
    pub department_id: Option<Uuid>,
    /// Role within the department, e.g. `head`.
    #[serde(default)]
    pub position: Option<String>,
}

impl User {
    /// Whether the user heads their department and receives quick shares.
    pub fn is_department_head(&self) -> bool {
        self.position
            .as_deref()
            .is_some_and(|position| position.trim().eq_ignore_ascii_case("head"))
    }
}

/// A short message shared with the heads of a department.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickShare {
    /// Identifier assigned at creation.
    pub id: Uuid,
    /// Department whose heads receive the message.
    pub department_id: Uuid,
    /// Free-form fields, rendered as one `key: value` line each.
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Whether a department head received it. Never reset once true.
    #[serde(default)]
    pub sent: bool,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl QuickShare {
    /// Build an unsent quick share for `department_id`.
    pub fn new(
        department_id: Uuid,
        data: serde_json::Map<String, serde_json::Value>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            department_id,
            data,
            sent: false,
            created_at: now,
        }
    }
}

/// Department lookup record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    /// Identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
}
