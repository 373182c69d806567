//! One client connection.
//!
//! A [`Connection`] accepts inbound commands and runs at most one job at a
//! time on its own Tokio task. Events flow back through the `mpsc` sender
//! the transport handed in.

use super::job::{Job, JobEmitter, JobOutcome};
use super::pipeline::Pipeline;
use super::Orchestrator;
use crate::events::{AnalyzePayload, InboundCommand, JobEvent, Phase};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

/// Error text for an `analyze` that arrives while a job is running.
pub const JOB_IN_PROGRESS: &str = "a job is already in progress";

/// Who is on the other end of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    /// Session id; keys admission counters and owns conversations.
    pub session_id: String,
    /// Client network origin (first `X-Forwarded-For` hop or peer address).
    pub origin: String,
    /// Authenticated callers bypass admission control.
    pub authenticated: bool,
    /// User whose rule-set override applies, if any.
    pub user_id: Option<String>,
}

impl ConnectionContext {
    /// Unauthenticated demo caller.
    pub fn anonymous(session_id: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            origin: origin.into(),
            authenticated: false,
            user_id: None,
        }
    }

    /// Authenticated caller.
    pub fn authenticated(
        session_id: impl Into<String>,
        origin: impl Into<String>,
        user_id: Option<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            origin: origin.into(),
            authenticated: true,
            user_id,
        }
    }
}

struct ActiveJob {
    id: String,
    cancel: CancellationToken,
    handle: JoinHandle<JobOutcome>,
}

/// Per-connection job driver.
pub struct Connection {
    orch: Arc<Orchestrator>,
    ctx: Arc<ConnectionContext>,
    tx: mpsc::Sender<JobEvent>,
    active: Option<ActiveJob>,
}

impl Connection {
    /// Connection sending its events to `tx`.
    pub fn new(
        orch: Arc<Orchestrator>,
        ctx: ConnectionContext,
        tx: mpsc::Sender<JobEvent>,
    ) -> Self {
        Self {
            orch,
            ctx: Arc::new(ctx),
            tx,
            active: None,
        }
    }

    /// Caller identity.
    pub fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    /// Id of the running job, if any.
    pub fn active_job_id(&mut self) -> Option<&str> {
        self.reap();
        self.active.as_ref().map(|a| a.id.as_str())
    }

    /// Dispatch one inbound command.
    pub async fn handle(&mut self, command: InboundCommand) {
        match command {
            InboundCommand::Analyze { payload } => {
                self.analyze(payload).await;
            }
            InboundCommand::Cancel { job_id } => {
                self.cancel(&job_id);
            }
        }
    }

    /// Start a job for `payload`. Returns its id, or `None` when another
    /// job is still running (an error event is sent instead).
    pub async fn analyze(&mut self, payload: AnalyzePayload) -> Option<String> {
        self.reap();
        if let Some(active) = &self.active {
            let rejected = Uuid::new_v4().to_string();
            debug!(
                session_id = %self.ctx.session_id,
                active_job = %active.id,
                rejected_job = %rejected,
                "connection: second analyze rejected"
            );
            // The client may already be gone; nothing to do then.
            let _ = self
                .tx
                .send(JobEvent::error(rejected, Phase::Started, JOB_IN_PROGRESS))
                .await;
            return None;
        }

        let cancel = CancellationToken::new();
        let job = Job::new(self.ctx.session_id.clone(), cancel.clone());
        let id = job.id().to_string();
        let emitter = JobEmitter::new(&id, self.tx.clone(), cancel.clone());
        let span = info_span!("job", job_id = %id, session_id = %self.ctx.session_id);
        info!(parent: &span, "job accepted");
        let pipeline = Pipeline::new(
            Arc::clone(&self.orch),
            Arc::clone(&self.ctx),
            job,
            emitter,
            payload,
        );
        let handle = tokio::spawn(pipeline.run().instrument(span));
        self.active = Some(ActiveJob {
            id: id.clone(),
            cancel,
            handle,
        });
        Some(id)
    }

    /// Request cancellation of `job_id`. Returns `false` if it is not the
    /// running job.
    pub fn cancel(&mut self, job_id: &str) -> bool {
        self.reap();
        match &self.active {
            Some(active) if active.id == job_id => {
                info!(job_id, "connection: cancellation requested");
                active.cancel.cancel();
                true
            }
            _ => {
                debug!(job_id, "connection: cancel for unknown or finished job ignored");
                false
            }
        }
    }

    /// Wait for the running job to finish and return its outcome.
    pub async fn wait(&mut self) -> Option<JobOutcome> {
        let active = self.active.take()?;
        active.handle.await.ok()
    }

    fn reap(&mut self) {
        if self
            .active
            .as_ref()
            .is_some_and(|a| a.handle.is_finished())
        {
            self.active = None;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.cancel.cancel();
        }
    }
}
