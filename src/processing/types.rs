//! Core data types and error definitions for the processing pipeline.

use crate::error::ErrorKind;
use crate::ocr::OcrError;
use crate::storage::StorageError;
use crate::store::StoreError;
use crate::summarization::SummarizationClientError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Errors produced while splitting text into word windows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkingError {
    /// Window of zero words can never make progress.
    #[error("chunk size must be greater than zero")]
    InvalidWindow,
    /// Overlap at or above the window size would keep the start index from advancing.
    #[error("chunk overlap {overlap} must be smaller than chunk size {max_words}")]
    OverlapTooLarge {
        /// Configured words per chunk.
        max_words: usize,
        /// Configured overlap.
        overlap: usize,
    },
}

impl ChunkingError {
    /// Chunking errors are always configuration problems.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Configuration
    }
}

/// Errors produced by the hierarchical summarizer.
#[derive(Debug, Error)]
pub enum SummarizeError {
    /// Chunk window settings were invalid.
    #[error("Failed to chunk text: {0}")]
    Chunking(#[from] ChunkingError),
    /// Summarizing one chunk failed; the whole attempt is abandoned.
    #[error("Failed to summarize chunk {index} of {total}: {source}")]
    Chunk {
        /// Zero-based chunk index.
        index: usize,
        /// Number of chunks in the attempt.
        total: usize,
        /// Underlying client failure.
        #[source]
        source: SummarizationClientError,
    },
    /// Summarizing the concatenated chunk summaries failed.
    #[error("Failed to combine {total} chunk summaries: {source}")]
    Combine {
        /// Number of chunk summaries that were combined.
        total: usize,
        /// Underlying client failure.
        #[source]
        source: SummarizationClientError,
    },
}

impl SummarizeError {
    /// Classify the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Chunking(error) => error.kind(),
            Self::Chunk { source, .. } | Self::Combine { source, .. } => source.kind(),
        }
    }

    /// Service calls issued before the attempt was abandoned, the failing one included.
    pub fn service_calls(&self) -> usize {
        match self {
            Self::Chunking(_) => 0,
            Self::Chunk { index, .. } => index + 1,
            Self::Combine { total, .. } => total + 1,
        }
    }
}

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Fetching the file and extracting its text.
    Ocr,
    /// Condensing the OCR text.
    Summarization,
    /// Recording the notification for the owner.
    Notification,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ocr => "ocr",
            Self::Summarization => "summarization",
            Self::Notification => "notification",
        })
    }
}

/// Failure inside a stage. Recorded on the document rather than returned to callers.
#[derive(Debug, Error)]
pub enum StageError {
    /// File contents could not be read from object storage.
    #[error("Failed to download file: {0}")]
    Download(#[from] StorageError),
    /// OCR extraction failed.
    #[error("OCR failed: {0}")]
    Ocr(#[from] OcrError),
    /// Summarization failed.
    #[error("Summarization failed: {0}")]
    Summarize(#[from] SummarizeError),
    /// Notification record could not be stored.
    #[error("Failed to record notification: {0}")]
    Notification(#[source] StoreError),
}

impl StageError {
    /// Classify the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Download(error) => error.kind(),
            Self::Ocr(error) => error.kind(),
            Self::Summarize(error) => error.kind(),
            Self::Notification(error) => error.kind(),
        }
    }
}

/// Errors that stop the orchestrator before it can record an outcome on the document.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Document does not exist.
    #[error("document {0} not found")]
    NotFound(Uuid),
    /// Metadata store failed while loading or updating the document.
    #[error("Store request failed: {0}")]
    Store(#[from] StoreError),
}

impl ProcessingError {
    /// Classify the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Store(error) => error.kind(),
        }
    }
}

/// Result of one orchestrator run for one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessingOutcome {
    /// The document reached `summary_done` during this run.
    Completed {
        /// Whether OCR ran in this run (false when resuming from `ocr_done`).
        ocr_ran: bool,
        /// Summarization service calls issued by this run.
        summarization_calls: usize,
    },
    /// The document was already `summary_done`; nothing ran.
    AlreadyComplete,
    /// A stage failed and the failure was recorded on the document.
    Failed {
        /// Stage that failed.
        stage: Stage,
        /// Failure category.
        kind: ErrorKind,
        /// Message persisted as the document's `error_message`.
        message: String,
    },
}

impl ProcessingOutcome {
    /// Whether the run left the document complete.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}
