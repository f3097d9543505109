use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity since startup.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_uploaded: AtomicU64,
    documents_completed: AtomicU64,
    documents_failed: AtomicU64,
    ocr_calls: AtomicU64,
    summarization_calls: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
    quick_shares_sent: AtomicU64,
    quick_shares_failed: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a document accepted by the upload path.
    pub fn record_upload(&self) {
        self.documents_uploaded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a document that reached `summary_done`.
    pub fn record_completed(&self) {
        self.documents_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a document whose processing ended in `error`.
    pub fn record_failed(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one call to the OCR service.
    pub fn record_ocr_call(&self) {
        self.ocr_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record `count` calls to the summarization service.
    pub fn record_summarization_calls(&self, count: u64) {
        self.summarization_calls.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a delivered notification.
    pub fn record_notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a notification attempt that did not complete.
    pub fn record_notification_failed(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a quick share delivered to every department head.
    pub fn record_quick_share_sent(&self) {
        self.quick_shares_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a quick share left pending after a failed attempt.
    pub fn record_quick_share_failed(&self) {
        self.quick_shares_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_uploaded: self.documents_uploaded.load(Ordering::Relaxed),
            documents_completed: self.documents_completed.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            ocr_calls: self.ocr_calls.load(Ordering::Relaxed),
            summarization_calls: self.summarization_calls.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            quick_shares_sent: self.quick_shares_sent.load(Ordering::Relaxed),
            quick_shares_failed: self.quick_shares_failed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents accepted by the upload path.
    pub documents_uploaded: u64,
    /// Documents that reached `summary_done`.
    pub documents_completed: u64,
    /// Processing runs that ended in `error`.
    pub documents_failed: u64,
    /// Calls issued to the OCR service.
    pub ocr_calls: u64,
    /// Calls issued to the summarization service, chunk and combine calls alike.
    pub summarization_calls: u64,
    /// Notifications delivered and marked sent.
    pub notifications_sent: u64,
    /// Notification attempts that failed lookup, delivery or marking.
    pub notifications_failed: u64,
    /// Quick shares delivered and marked sent.
    pub quick_shares_sent: u64,
    /// Quick share attempts that failed.
    pub quick_shares_failed: u64,
}
