//! Per-message job state.
//!
//! A [`Job`] is owned by the task running its pipeline. Phase changes go
//! through [`Job::advance`], which enforces the state machine:
//!
//! ```text
//! Started → Scanning → (Halted | Screening) → Classifying → Routing
//!   → Optimizing → Generating ⇄ {ProviderFailover, QualityRetry}
//!   → Validating → Complete
//! ```
//!
//! `Cancelled` and `Error` are reachable from every non-terminal phase.
//! `Screening` may also move to `Halted`.

use crate::admission::AdmissionDenial;
use crate::events::{EventStatus, JobEvent, Phase, PhaseEvent};
use crate::routing::RouterError;
use crate::store::StoreError;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use uuid::Uuid;

/// Marker appended to text kept from a cancelled generation.
pub const CANCELLATION_MARKER: &str = "\n\n[Generation cancelled]";

/// Lifecycle phase of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    /// Accepted, nothing done yet.
    Started,
    /// DLP scan and admission control.
    Scanning,
    /// Security gate.
    Screening,
    /// Intent, sentiment, style, prompt quality.
    Classifying,
    /// Candidate selection.
    Routing,
    /// Prompt rewrite and parameter tuning.
    Optimizing,
    /// A generation attempt is streaming.
    Generating,
    /// Between a provider fault and the next attempt.
    ProviderFailover,
    /// Between a failed validation and the next attempt.
    QualityRetry,
    /// Checking the response.
    Validating,
    /// Finished successfully.
    Complete,
    /// Generation withheld for risk (or admission denied).
    Halted,
    /// Cancelled by the client.
    Cancelled,
    /// Unrecoverable failure.
    Error,
}

impl JobPhase {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobPhase::Complete | JobPhase::Halted | JobPhase::Cancelled | JobPhase::Error
        )
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: JobPhase) -> bool {
        use JobPhase::*;
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Cancelled | Error) {
            return true;
        }
        matches!(
            (self, next),
            (Started, Scanning)
                | (Scanning, Screening)
                | (Scanning, Halted)
                | (Screening, Halted)
                | (Screening, Classifying)
                | (Classifying, Routing)
                | (Routing, Optimizing)
                | (Optimizing, Generating)
                | (Generating, ProviderFailover)
                | (Generating, Validating)
                | (ProviderFailover, Generating)
                | (Validating, QualityRetry)
                | (Validating, Complete)
                | (QualityRetry, Generating)
        )
    }

    /// Stable name for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            JobPhase::Started => "started",
            JobPhase::Scanning => "scanning",
            JobPhase::Screening => "screening",
            JobPhase::Classifying => "classifying",
            JobPhase::Routing => "routing",
            JobPhase::Optimizing => "optimizing",
            JobPhase::Generating => "generating",
            JobPhase::ProviderFailover => "provider_failover",
            JobPhase::QualityRetry => "quality_retry",
            JobPhase::Validating => "validating",
            JobPhase::Complete => "complete",
            JobPhase::Halted => "halted",
            JobPhase::Cancelled => "cancelled",
            JobPhase::Error => "error",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecoverable job failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Internal state-machine violation.
    #[error("illegal phase transition {from} -> {to}")]
    InvalidTransition {
        /// Phase the job was in.
        from: JobPhase,
        /// Requested phase.
        to: JobPhase,
    },

    /// Every candidate model failed.
    #[error("all {attempts} candidate models failed; last error: {last_error}")]
    CandidatesExhausted {
        /// Attempts made.
        attempts: usize,
        /// Error of the final attempt.
        last_error: String,
    },

    /// Routing produced no usable candidates.
    #[error("routing failed: {0}")]
    Routing(#[from] RouterError),

    /// The conversation store failed.
    #[error("conversation store failed: {0}")]
    Store(#[from] StoreError),

    /// The message is empty after trimming.
    #[error("message must not be empty")]
    EmptyMessage,
}

impl JobError {
    /// Short label for metrics.
    pub fn err_type(&self) -> &'static str {
        match self {
            JobError::InvalidTransition { .. } => "invalid_transition",
            JobError::CandidatesExhausted { .. } => "candidates_exhausted",
            JobError::Routing(_) => "routing",
            JobError::Store(_) => "store",
            JobError::EmptyMessage => "empty_message",
        }
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Response delivered.
    Complete,
    /// Security gate withheld generation.
    Halted,
    /// Client cancelled.
    Cancelled,
    /// Admission control refused the request.
    Rejected(AdmissionDenial),
    /// Unrecoverable failure.
    Failed(JobError),
}

impl JobOutcome {
    /// Metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Complete => "complete",
            JobOutcome::Halted => "halted",
            JobOutcome::Cancelled => "cancelled",
            JobOutcome::Rejected(_) => "rejected",
            JobOutcome::Failed(_) => "failed",
        }
    }
}

/// One message's journey through the pipeline.
#[derive(Debug)]
pub struct Job {
    id: String,
    session_id: String,
    phase: JobPhase,
    cancel: CancellationToken,
    text: String,
    candidate_index: usize,
    spent_usd: f64,
    started_at: Instant,
}

impl Job {
    /// Fresh job in `Started`.
    pub fn new(session_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), session_id, cancel)
    }

    /// Job with a caller-chosen id.
    pub fn with_id(
        id: impl Into<String>,
        session_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            phase: JobPhase::Started,
            cancel,
            text: String::new(),
            candidate_index: 0,
            spent_usd: 0.0,
            started_at: Instant::now(),
        }
    }

    /// Job id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Owning session.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current phase.
    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// [`JobError::InvalidTransition`] if the state machine forbids it; the
    /// phase is left unchanged.
    pub fn advance(&mut self, next: JobPhase) -> Result<(), JobError> {
        if !self.phase.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        trace!(job_id = %self.id, from = %self.phase, to = %next, "job: phase transition");
        self.phase = next;
        Ok(())
    }

    /// Token shared with the connection for cooperative cancellation.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Append a streamed fragment.
    pub fn append_text(&mut self, fragment: &str) {
        self.text.push_str(fragment);
    }

    /// Discard streamed text (failover or quality retry).
    pub fn clear_text(&mut self) {
        self.text.clear();
    }

    /// Text streamed in the current attempt.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Record which candidate is being tried.
    pub fn set_candidate_index(&mut self, index: usize) {
        self.candidate_index = index;
    }

    /// Index of the candidate being tried.
    pub fn candidate_index(&self) -> usize {
        self.candidate_index
    }

    /// Add the estimated cost of one provider attempt.
    pub fn add_spend(&mut self, usd: f64) {
        if usd.is_finite() && usd > 0.0 {
            self.spent_usd += usd;
        }
    }

    /// Estimated provider spend across every attempt, accepted or not.
    pub fn spent_usd(&self) -> f64 {
        self.spent_usd
    }

    /// Time since the job was created.
    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Move to `Cancelled` and return the kept text plus the marker.
    ///
    /// Idempotent: a job already cancelled returns the same text again.
    pub fn finalize_cancelled(&mut self) -> String {
        if self.phase != JobPhase::Cancelled {
            // Terminal phases other than Cancelled never reach here; the
            // pipeline stops checking cancellation once it finishes.
            let _ = self.advance(JobPhase::Cancelled);
        }
        format!("{}{}", self.text, CANCELLATION_MARKER)
    }
}

/// Sends a job's events to its connection.
///
/// Once the job is cancelled, ordinary events are dropped; only the final
/// `cancelled` event goes out, after which the emitter is muted for good.
#[derive(Clone)]
pub struct JobEmitter {
    job_id: Arc<str>,
    tx: mpsc::Sender<JobEvent>,
    cancel: CancellationToken,
    muted: Arc<AtomicBool>,
}

impl JobEmitter {
    /// Emitter for `job_id`.
    pub fn new(job_id: &str, tx: mpsc::Sender<JobEvent>, cancel: CancellationToken) -> Self {
        Self {
            job_id: Arc::from(job_id),
            tx,
            cancel,
            muted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Job id events are stamped with.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Payload-free status update.
    pub async fn status(&self, phase: Phase, status: EventStatus) {
        self.send(JobEvent::status(&*self.job_id, phase, status)).await;
    }

    /// `completed` event with payload.
    pub async fn completed(&self, event: PhaseEvent) {
        self.send(JobEvent::completed(&*self.job_id, event)).await;
    }

    /// Event with payload and explicit status.
    pub async fn with_payload(&self, status: EventStatus, event: PhaseEvent) {
        self.send(JobEvent::with_payload(&*self.job_id, status, event)).await;
    }

    /// `error`-status event with payload and failure text.
    pub async fn failed(&self, event: PhaseEvent, message: impl Into<String>) {
        self.send(
            JobEvent::with_payload(&*self.job_id, EventStatus::Error, event).with_error(message),
        )
        .await;
    }

    /// `error` event.
    pub async fn error(&self, phase: Phase, message: impl Into<String>) {
        self.send(JobEvent::error(&*self.job_id, phase, message)).await;
    }

    /// Send `event` even after cancellation, then mute.
    pub async fn finish(&self, event: JobEvent) {
        if self.muted.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.tx.send(event).await.is_err() {
            trace!(job_id = %self.job_id, "job: connection gone before final event");
        }
    }

    /// Whether the final event has been sent.
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    async fn send(&self, event: JobEvent) {
        if self.is_muted() || self.cancel.is_cancelled() {
            return;
        }
        if self.tx.send(event).await.is_err() {
            // Nobody is listening: the connection closed. Stop the job.
            trace!(job_id = %self.job_id, "job: connection gone, cancelling");
            self.cancel.cancel();
        }
    }
}
