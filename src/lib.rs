#![deny(missing_docs)]

//! Core library for the docpipe document processing server.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Shared error classification.
pub mod error;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline counters.
pub mod metrics;
/// Owner notifications and email delivery.
pub mod notify;
/// OCR service client.
pub mod ocr;
/// Chunking, summarization and the per-document worker pipeline.
pub mod processing;
/// Facade used by the HTTP surface.
pub mod service;
/// Object storage for uploaded files.
pub mod storage;
/// Metadata store for documents and notifications.
pub mod store;
/// Summarization service client.
pub mod summarization;
/// Batch upload coordination.
pub mod upload;
