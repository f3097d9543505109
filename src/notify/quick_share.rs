//! Delivery of quick shares to department heads.
//!
//! Each pending quick share is emailed to every user of its department whose position is
//! `head` and who has an address on file. The record is flagged sent once at least one head
//! accepted it; otherwise it stays pending for the next cycle.

use super::dispatch::EmailMessage;
use super::polling::{PollingCycle, poll_until_shutdown};
use super::transport::EmailTransport;
use crate::metrics::PipelineMetrics;
use crate::store::{DocumentStore, QuickShare, QuickShareStore, StoreError};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SUBJECT: &str = "Quick Share Notification";

/// What happened to one quick share during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QuickShareOutcome {
    /// Delivered to `recipients` heads and flagged sent.
    Sent {
        /// Heads whose email was accepted.
        recipients: usize,
    },
    /// The department has no head with an email address; the record stays pending.
    NoRecipients,
    /// Lookup, every delivery, or flagging failed; the record stays pending.
    Failed {
        /// Human readable failure.
        reason: String,
    },
}

/// Per-record results of one quick share cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuickShareReport {
    /// `(quick share id, outcome)`, oldest first.
    pub results: Vec<(Uuid, QuickShareOutcome)>,
}

impl QuickShareReport {
    /// Number of quick shares flagged sent in this cycle.
    pub fn sent(&self) -> usize {
        self.results
            .iter()
            .filter(|(_, outcome)| matches!(outcome, QuickShareOutcome::Sent { .. }))
            .count()
    }

    /// Number of quick shares left pending because of a failure.
    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|(_, outcome)| matches!(outcome, QuickShareOutcome::Failed { .. }))
            .count()
    }
}

/// Render a quick share as an email, one `key: value` line per field in key order.
pub fn format_quick_share(quick_share: &QuickShare) -> EmailMessage {
    let mut body = String::from("You have received a quick share:\n\n");
    for (key, value) in &quick_share.data {
        match value {
            Value::String(text) => body.push_str(&format!("{key}: {text}\n")),
            other => body.push_str(&format!("{key}: {other}\n")),
        }
    }
    EmailMessage {
        subject: SUBJECT.into(),
        body,
    }
}

/// Sends pending quick shares on a fixed period.
pub struct QuickShareDispatcher {
    users: Arc<dyn DocumentStore>,
    quick_shares: Arc<dyn QuickShareStore>,
    transport: Arc<dyn EmailTransport>,
    metrics: Arc<PipelineMetrics>,
    interval: Duration,
}

impl QuickShareDispatcher {
    /// Create a dispatcher that runs a cycle every `interval`.
    pub fn new(
        users: Arc<dyn DocumentStore>,
        quick_shares: Arc<dyn QuickShareStore>,
        transport: Arc<dyn EmailTransport>,
        interval: Duration,
    ) -> Self {
        Self {
            users,
            quick_shares,
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

    /// Attempt every pending quick share once.
    pub async fn run_cycle(&self) -> Result<QuickShareReport, StoreError> {
        let pending = self.quick_shares.list_unsent_quick_shares().await?;
        let mut report = QuickShareReport::default();
        for quick_share in pending {
            let outcome = self.deliver(&quick_share).await;
            match &outcome {
                QuickShareOutcome::Sent { recipients } => {
                    self.metrics.record_quick_share_sent();
                    info!(quick_share_id = %quick_share.id, recipients, "Quick share sent");
                }
                QuickShareOutcome::NoRecipients => debug!(
                    quick_share_id = %quick_share.id,
                    department_id = %quick_share.department_id,
                    "No department head with an email address"
                ),
                QuickShareOutcome::Failed { reason } => {
                    self.metrics.record_quick_share_failed();
                    warn!(quick_share_id = %quick_share.id, reason = %reason, "Quick share failed");
                }
            }
            report.results.push((quick_share.id, outcome));
        }
        Ok(report)
    }

    /// Run cycles until `shutdown` changes or its sender is dropped.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        poll_until_shutdown(&self, self.interval, shutdown).await;
    }

    async fn deliver(&self, quick_share: &QuickShare) -> QuickShareOutcome {
        let users = match self.users.department_users(quick_share.department_id).await {
            Ok(users) => users,
            Err(error) => {
                return QuickShareOutcome::Failed {
                    reason: format!("user lookup failed: {error}"),
                };
            }
        };
        let heads: Vec<String> = users
            .into_iter()
            .filter(|user| user.is_department_head())
            .filter_map(|user| user.email.filter(|email| !email.trim().is_empty()))
            .collect();
        if heads.is_empty() {
            return QuickShareOutcome::NoRecipients;
        }

        let message = format_quick_share(quick_share);
        let mut recipients = 0;
        let mut last_error = None;
        for email in &heads {
            match self
                .transport
                .send(email, &message.subject, &message.body)
                .await
            {
                Ok(()) => recipients += 1,
                Err(error) => {
                    warn!(quick_share_id = %quick_share.id, error = %error, "Delivery to head failed");
                    last_error = Some(error);
                }
            }
        }
        if recipients == 0 {
            let reason = last_error.map_or_else(String::new, |error| error.to_string());
            return QuickShareOutcome::Failed {
                reason: format!("delivery failed: {reason}"),
            };
        }

        match self.quick_shares.mark_quick_share_sent(quick_share.id).await {
            Ok(()) => QuickShareOutcome::Sent { recipients },
            Err(error) => QuickShareOutcome::Failed {
                reason: format!("sent but could not be flagged: {error}"),
            },
        }
    }
}

#[async_trait]
impl PollingCycle for QuickShareDispatcher {
    type Report = QuickShareReport;

    fn label(&self) -> &'static str {
        "quick_shares"
    }

    async fn run_cycle(&self) -> Result<QuickShareReport, StoreError> {
        QuickShareDispatcher::run_cycle(self).await
    }

    fn log_report(&self, report: &QuickShareReport) {
        if !report.results.is_empty() {
            info!(
                sent = report.sent(),
                failed = report.failed(),
                pending = report.results.len() - report.sent(),
                "Quick share cycle finished"
            );
        }
    }
}
