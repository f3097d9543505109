//! Periodic delivery of pending "document processed" notifications.
//!
//! A notification is flagged sent only after the transport accepted the email, so a crash
//! or failure between the two steps resends it on a later cycle (at-least-once). Records
//! whose owner has no email address stay pending and are re-evaluated every cycle.

use super::polling::{PollingCycle, poll_until_shutdown};
use super::transport::EmailTransport;
use crate::metrics::PipelineMetrics;
use crate::store::{Document, DocumentStore, Notification, NotificationStore, StoreError};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What happened to one notification during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Email accepted by the transport and the record flagged sent.
    Sent,
    /// Recipient has no email address; the record stays pending.
    SkippedNoEmail,
    /// Lookup, delivery or flagging failed; the record stays pending.
    Failed {
        /// Human readable failure.
        reason: String,
    },
}

/// Outcome for one notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    /// Notification that was handled.
    pub notification_id: Uuid,
    /// Document it refers to.
    pub document_id: Uuid,
    /// What happened.
    pub outcome: DeliveryOutcome,
}

/// Per-notification results of one dispatch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// One entry per pending notification, oldest first.
    pub results: Vec<DeliveryResult>,
}

impl DispatchReport {
    /// Number of notifications delivered in this cycle.
    pub fn sent(&self) -> usize {
        self.count(|outcome| matches!(outcome, DeliveryOutcome::Sent))
    }

    /// Number of notifications skipped for lack of an address.
    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, DeliveryOutcome::SkippedNoEmail))
    }

    /// Number of notifications that failed.
    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, DeliveryOutcome::Failed { .. }))
    }

    fn count(&self, predicate: impl Fn(&DeliveryOutcome) -> bool) -> usize {
        self.results
            .iter()
            .filter(|result| predicate(&result.outcome))
            .count()
    }
}

/// Subject and body of a notification email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

/// Build the email for a processed document.
pub fn compose_email(document: &Document, department_names: &[String]) -> EmailMessage {
    let mut body = format!(
        "Your document has been processed.\n\nFile: {}\n",
        document.file_name
    );
    if !department_names.is_empty() {
        body.push_str(&format!("Departments: {}\n", department_names.join(", ")));
    }
    if let Some(summary) = document.summary.as_deref() {
        body.push_str(&format!("\nSummary:\n{summary}\n"));
    }
    EmailMessage {
        subject: format!("Document processed: {}", document.file_name),
        body,
    }
}

/// Sends pending notifications on a fixed period.
pub struct NotificationDispatcher {
    documents: Arc<dyn DocumentStore>,
    notifications: Arc<dyn NotificationStore>,
    transport: Arc<dyn EmailTransport>,
    metrics: Arc<PipelineMetrics>,
    interval: Duration,
}

impl NotificationDispatcher {
    /// Create a dispatcher that runs a cycle every `interval`.
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        notifications: Arc<dyn NotificationStore>,
        transport: Arc<dyn EmailTransport>,
        interval: Duration,
    ) -> Self {
        Self {
            documents,
            notifications,
            transport,
            metrics: Arc::new(PipelineMetrics::new()),
            interval,
        }
    }

    /// Share a metrics registry with the rest of the server.
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Attempt every pending notification once.
    ///
    /// Only a failure to list pending notifications is returned as `Err`; per-record failures
    /// are reported in the [`DispatchReport`] and never stop the cycle.
    pub async fn run_cycle(&self) -> Result<DispatchReport, StoreError> {
        let pending = self.notifications.list_unsent().await?;
        let mut report = DispatchReport::default();
        for notification in pending {
            let outcome = self.deliver(&notification).await;
            match &outcome {
                DeliveryOutcome::Sent => self.metrics.record_notification_sent(),
                DeliveryOutcome::SkippedNoEmail => debug!(
                    notification_id = %notification.id,
                    user_id = %notification.user_id,
                    "Recipient has no email address"
                ),
                DeliveryOutcome::Failed { reason } => {
                    self.metrics.record_notification_failed();
                    warn!(
                        notification_id = %notification.id,
                        document_id = %notification.document_id,
                        reason = %reason,
                        "Notification delivery failed"
                    );
                }
            }
            report.results.push(DeliveryResult {
                notification_id: notification.id,
                document_id: notification.document_id,
                outcome,
            });
        }
        Ok(report)
    }

    /// Run cycles until `shutdown` changes or its sender is dropped.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        poll_until_shutdown(&self, self.interval, shutdown).await;
    }

    async fn deliver(&self, notification: &Notification) -> DeliveryOutcome {
        let user = match self.documents.get_user(notification.user_id).await {
            Ok(user) => user,
            Err(error) => return failed(format!("user lookup failed: {error}")),
        };
        let Some(email) = user.and_then(|user| user.email).filter(|email| !email.is_empty())
        else {
            return DeliveryOutcome::SkippedNoEmail;
        };

        let document = match self.documents.get_document(notification.document_id).await {
            Ok(Some(document)) => document,
            Ok(None) => {
                return failed(format!("document {} not found", notification.document_id));
            }
            Err(error) => return failed(format!("document lookup failed: {error}")),
        };

        let message = compose_email(&document, &self.department_names(&document).await);
        if let Err(error) = self
            .transport
            .send(&email, &message.subject, &message.body)
            .await
        {
            return failed(format!("delivery failed: {error}"));
        }

        match self.notifications.mark_sent(notification.id).await {
            Ok(()) => {
                info!(
                    notification_id = %notification.id,
                    document_id = %document.id,
                    "Notification sent"
                );
                DeliveryOutcome::Sent
            }
            Err(error) => failed(format!("sent but could not be flagged: {error}")),
        }
    }

    async fn department_names(&self, document: &Document) -> Vec<String> {
        let mut names = Vec::with_capacity(document.department_ids.len());
        for id in &document.department_ids {
            match self.documents.get_department(*id).await {
                Ok(Some(department)) => names.push(department.name),
                Ok(None) => debug!(department_id = %id, "Department not found"),
                Err(error) => {
                    warn!(department_id = %id, error = %error, "Department lookup failed")
                }
            }
        }
        names
    }
}

#[async_trait]
impl PollingCycle for NotificationDispatcher {
    type Report = DispatchReport;

    fn label(&self) -> &'static str {
        "notifications"
    }

    async fn run_cycle(&self) -> Result<DispatchReport, StoreError> {
        NotificationDispatcher::run_cycle(self).await
    }

    fn log_report(&self, report: &DispatchReport) {
        if !report.results.is_empty() {
            info!(
                sent = report.sent(),
                skipped = report.skipped(),
                failed = report.failed(),
                "Notification cycle finished"
            );
        }
    }
}

fn failed(reason: String) -> DeliveryOutcome {
    DeliveryOutcome::Failed { reason }
}
