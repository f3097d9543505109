//! Summaries for text of any length.
//!
//! Text is normalized, cut into overlapping word windows, and each window is summarized in
//! order. A single window's summary is returned as is; several summaries are space-joined and
//! summarized once more. The first failing call aborts the attempt; retrying is the caller's
//! job and happens at whole-document granularity. Text without any words gets a fixed summary
//! and no service call.

use super::chunking::{ChunkWindow, chunk_with_window};
use super::types::{ChunkingError, SummarizeError};
use crate::summarization::{SummarizationClient, SummarizationClientError};
use std::sync::Arc;
use std::time::Duration;

/// Summary stored for documents whose text has no words.
pub const EMPTY_TEXT_SUMMARY: &str = "Input text is too short to summarize.";

/// Summary text together with the work it took to produce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchicalSummary {
    /// Final summary.
    pub text: String,
    /// Number of chunks the input was split into.
    pub chunk_count: usize,
    /// Calls issued to the summarization service.
    pub service_calls: usize,
}

/// Chunk-then-combine summarizer on top of a [`SummarizationClient`].
pub struct HierarchicalSummarizer {
    client: Arc<dyn SummarizationClient>,
    window: ChunkWindow,
    call_timeout: Option<Duration>,
}

impl HierarchicalSummarizer {
    /// Build a summarizer, validating the chunk window up front.
    pub fn new(
        client: Arc<dyn SummarizationClient>,
        max_words: usize,
        overlap: usize,
    ) -> Result<Self, ChunkingError> {
        Ok(Self {
            client,
            window: ChunkWindow::new(max_words, overlap)?,
            call_timeout: None,
        })
    }

    /// Bound every service call, independent of the client's own transport timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Chunk window in use.
    pub fn window(&self) -> ChunkWindow {
        self.window
    }

    /// Produce one summary for `text`.
    pub async fn summarize(&self, text: &str) -> Result<HierarchicalSummary, SummarizeError> {
        let normalized = normalize(text);
        let chunks = chunk_with_window(&normalized, self.window);
        let total = chunks.len();
        if total == 0 {
            tracing::debug!("No words to summarize");
            return Ok(HierarchicalSummary {
                text: EMPTY_TEXT_SUMMARY.into(),
                chunk_count: 0,
                service_calls: 0,
            });
        }

        tracing::debug!(
            words = chunks.word_count(),
            chunks = total,
            max_words = self.window.max_words(),
            overlap = self.window.overlap(),
            "Summarizing text"
        );

        let mut summaries = Vec::with_capacity(total);
        for (index, chunk) in chunks.enumerate() {
            let summary = self
                .call(&chunk.join(" "))
                .await
                .map_err(|source| SummarizeError::Chunk {
                    index,
                    total,
                    source,
                })?;
            tracing::trace!(index, total, "Chunk summarized");
            summaries.push(summary);
        }

        if total == 1 {
            let text = summaries.pop().unwrap_or_default();
            return Ok(HierarchicalSummary {
                text,
                chunk_count: 1,
                service_calls: 1,
            });
        }

        let combined = summaries.join(" ");
        let text = self
            .call(&combined)
            .await
            .map_err(|source| SummarizeError::Combine { total, source })?;

        Ok(HierarchicalSummary {
            text,
            chunk_count: total,
            service_calls: total + 1,
        })
    }
}

impl HierarchicalSummarizer {
    async fn call(&self, text: &str) -> Result<String, SummarizationClientError> {
        let Some(limit) = self.call_timeout else {
            return self.client.summarize(text).await;
        };
        tokio::time::timeout(limit, self.client.summarize(text))
            .await
            .unwrap_or_else(|_| {
                Err(SummarizationClientError::ProviderUnavailable(format!(
                    "summarization call timed out after {}s",
                    limit.as_secs_f64()
                )))
            })
    }
}

/// Collapse line breaks into spaces and trim.
fn normalize(text: &str) -> String {
    text.replace(['\r', '\n'], " ").trim().to_string()
}
