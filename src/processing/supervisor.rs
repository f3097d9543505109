//! Bounded worker pool that runs [`DocumentProcessor`] for queued document identifiers.
//!
//! Submissions land in a bounded `mpsc` queue; a single worker drains it and spawns at most
//! `concurrency` orchestrator runs at once. A document that is already queued or running is
//! not queued again. Runs that abort because the store failed are remembered and resubmitted
//! by the next recovery sweep.

use super::orchestrator::DocumentProcessor;
use super::types::ProcessingOutcome;
use crate::error::ErrorKind;
use crate::store::{DocumentFilter, DocumentStatus, DocumentStore, StoreError};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const RECOVERY_BATCH: usize = 100;
/// Reports kept for `GET /v1/documents/{id}`; the oldest is evicted first.
pub const DEFAULT_REPORT_CAPACITY: usize = 1024;

/// Errors returned when a document cannot be queued.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// Queue is at capacity; the caller should retry later.
    #[error("processing queue is full, document {0} was not queued")]
    QueueFull(Uuid),
    /// The worker has shut down.
    #[error("processing worker has stopped")]
    Closed,
}

impl SubmitError {
    /// Classify the failure.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ServiceUnavailable
    }
}

/// Whether a submission added work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Submission {
    /// Document was added to the queue.
    Queued,
    /// Document was already queued or running.
    AlreadyInFlight,
}

/// Last recorded run for a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingReport {
    /// Document that was processed.
    pub document_id: Uuid,
    /// Outcome when the run reached a recorded result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ProcessingOutcome>,
    /// Error when the run could not record anything on the document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the run finished.
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
}

/// Last run per document, bounded to `capacity` documents.
struct ReportLog {
    capacity: usize,
    order: VecDeque<Uuid>,
    reports: HashMap<Uuid, ProcessingReport>,
}

impl ReportLog {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            reports: HashMap::new(),
        }
    }

    fn insert(&mut self, report: ProcessingReport) {
        let id = report.document_id;
        if self.reports.insert(id, report).is_some() {
            self.order.retain(|existing| *existing != id);
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.reports.remove(&oldest);
            }
        }
    }

    fn get(&self, id: Uuid) -> Option<&ProcessingReport> {
        self.reports.get(&id)
    }
}

struct SupervisorState {
    in_flight: Mutex<HashSet<Uuid>>,
    reports: Mutex<ReportLog>,
    /// Documents whose last run aborted before its outcome was stored.
    retry: Mutex<HashSet<Uuid>>,
}

impl SupervisorState {
    fn new(report_capacity: usize) -> Self {
        Self {
            in_flight: Mutex::new(HashSet::new()),
            reports: Mutex::new(ReportLog::new(report_capacity)),
            retry: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, id: Uuid) -> bool {
        self.in_flight
            .lock()
            .map(|mut in_flight| in_flight.insert(id))
            .unwrap_or(false)
    }

    fn release(&self, id: Uuid) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&id);
        }
    }

    fn record(&self, report: ProcessingReport) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.insert(report);
        }
    }

    fn mark_for_retry(&self, id: Uuid, retry: bool) {
        if let Ok(mut pending) = self.retry.lock() {
            if retry {
                pending.insert(id);
            } else {
                pending.remove(&id);
            }
        }
    }

    fn retry_candidates(&self) -> Vec<Uuid> {
        self.retry
            .lock()
            .map(|pending| pending.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Releases the in-flight claim even when the run panics.
struct Claim {
    state: Arc<SupervisorState>,
    id: Uuid,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.state.release(self.id);
    }
}

/// Handle used to queue documents and read their last outcome. Cheap to clone.
#[derive(Clone)]
pub struct ProcessingSupervisor {
    sender: mpsc::Sender<Uuid>,
    state: Arc<SupervisorState>,
}

/// Queue consumer paired with a [`ProcessingSupervisor`].
pub struct SupervisorWorker {
    receiver: mpsc::Receiver<Uuid>,
    processor: Arc<DocumentProcessor>,
    state: Arc<SupervisorState>,
    semaphore: Arc<Semaphore>,
}

impl ProcessingSupervisor {
    /// Create a supervisor and the worker that must be run for queued documents to progress.
    pub fn new(
        processor: Arc<DocumentProcessor>,
        concurrency: usize,
        queue_capacity: usize,
    ) -> (Self, SupervisorWorker) {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let state = Arc::new(SupervisorState::new(DEFAULT_REPORT_CAPACITY));
        let worker = SupervisorWorker {
            receiver,
            processor,
            state: state.clone(),
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        };
        (Self { sender, state }, worker)
    }

    /// Create a supervisor and spawn its worker on the current runtime.
    pub fn start(
        processor: Arc<DocumentProcessor>,
        concurrency: usize,
        queue_capacity: usize,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (supervisor, worker) = Self::new(processor, concurrency, queue_capacity);
        let handle = tokio::spawn(worker.run(shutdown));
        (supervisor, handle)
    }

    /// Queue `id`, waiting for room when the queue is full.
    pub async fn submit(&self, id: Uuid) -> Result<Submission, SubmitError> {
        if !self.state.claim(id) {
            return Ok(Submission::AlreadyInFlight);
        }
        if self.sender.send(id).await.is_err() {
            self.state.release(id);
            return Err(SubmitError::Closed);
        }
        debug!(document_id = %id, "Document queued");
        Ok(Submission::Queued)
    }

    /// Queue `id` without waiting; a full queue is reported as [`SubmitError::QueueFull`].
    pub fn try_submit(&self, id: Uuid) -> Result<Submission, SubmitError> {
        if !self.state.claim(id) {
            return Ok(Submission::AlreadyInFlight);
        }
        match self.sender.try_send(id) {
            Ok(()) => {
                debug!(document_id = %id, "Document queued");
                Ok(Submission::Queued)
            }
            Err(error) => {
                self.state.release(id);
                Err(match error {
                    mpsc::error::TrySendError::Full(_) => SubmitError::QueueFull(id),
                    mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
                })
            }
        }
    }

    /// Last finished run for `id`, if any.
    pub fn report(&self, id: Uuid) -> Option<ProcessingReport> {
        self.state
            .reports
            .lock()
            .ok()
            .and_then(|reports| reports.get(id).cloned())
    }

    /// Whether `id` is queued or running.
    pub fn is_in_flight(&self, id: Uuid) -> bool {
        self.state
            .in_flight
            .lock()
            .map(|in_flight| in_flight.contains(&id))
            .unwrap_or(false)
    }

    /// Queue documents whose last run aborted, then documents left in `uploaded` or
    /// `ocr_done`, e.g. after a restart.
    ///
    /// Stops early when the queue fills; the next sweep picks up the rest.
    pub async fn recover_once(&self, documents: &dyn DocumentStore) -> Result<usize, StoreError> {
        let mut queued = 0;
        for id in self.state.retry_candidates() {
            match self.try_submit(id) {
                Ok(Submission::Queued) => queued += 1,
                Ok(Submission::AlreadyInFlight) => {}
                Err(error) => {
                    debug!(error = %error, "Recovery sweep stopped early");
                    return Ok(queued);
                }
            }
        }
        for status in [DocumentStatus::Uploaded, DocumentStatus::OcrDone] {
            let filter = DocumentFilter {
                status: Some(status),
                limit: RECOVERY_BATCH,
            };
            for document in documents.list_documents(&filter).await? {
                match self.try_submit(document.id) {
                    Ok(Submission::Queued) => queued += 1,
                    Ok(Submission::AlreadyInFlight) => {}
                    Err(error) => {
                        debug!(error = %error, "Recovery sweep stopped early");
                        return Ok(queued);
                    }
                }
            }
        }
        Ok(queued)
    }

    /// Periodically run [`Self::recover_once`] until `shutdown` fires.
    pub async fn run_recovery(
        self,
        documents: Arc<dyn DocumentStore>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.recover_once(documents.as_ref()).await {
                        Ok(0) => {}
                        Ok(queued) => info!(queued, "Recovery sweep queued documents"),
                        Err(error) => warn!(error = %error, "Recovery sweep failed to list documents"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("Recovery sweep stopped");
    }
}

impl SupervisorWorker {
    /// Drain the queue until every sender is dropped or `shutdown` fires, then wait for running
    /// documents to finish.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                received = self.receiver.recv() => {
                    let Some(id) = received else { break };
                    let claim = Claim { state: self.state.clone(), id };
                    let permit = tokio::select! {
                        permit = self.semaphore.clone().acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                        _ = shutdown.changed() => {
                            debug!(document_id = %id, "Shutdown while waiting for a slot");
                            break;
                        }
                    };
                    let processor = self.processor.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        let result = processor.process(id).await;
                        let report = match result {
                            Ok(outcome) => {
                                claim.state.mark_for_retry(id, false);
                                if !outcome.is_success() {
                                    warn!(
                                        document_id = %id,
                                        outcome = ?outcome,
                                        "Document processing failed"
                                    );
                                }
                                ProcessingReport {
                                    document_id: id,
                                    outcome: Some(outcome),
                                    error: None,
                                    finished_at: OffsetDateTime::now_utc(),
                                }
                            }
                            Err(error) => {
                                claim
                                    .state
                                    .mark_for_retry(id, error.kind() != ErrorKind::NotFound);
                                error!(
                                    document_id = %id,
                                    kind = ?error.kind(),
                                    error = %error,
                                    "Document processing aborted"
                                );
                                ProcessingReport {
                                    document_id: id,
                                    outcome: None,
                                    error: Some(error.to_string()),
                                    finished_at: OffsetDateTime::now_utc(),
                                }
                            }
                        };
                        claim.state.record(report);
                        drop(claim);
                    });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(error) = joined {
                        error!(error = %error, "Processing task panicked");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        self.receiver.close();
        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                error!(error = %error, "Processing task panicked");
            }
        }
        info!("Processing worker stopped");
    }
}
