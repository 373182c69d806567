//! Phase sequencing for one job.
//!
//! Each phase runs inside an `info_span!("job.phase", ...)` whose
//! `duration_ms`, `outcome` and `error_kind` fields are recorded once the
//! phase returns. Message and response text never appear in spans or logs.
//!
//! Wire phases are bracketed: a `processing` event goes out before the
//! work and a `completed` (or `error`) event after it. `started` brackets
//! scanning and admission. Sub-events such as `dlp_warning`, `sentiment`
//! or `response_chunk` are only ever `completed`. The terminal `complete`
//! event is sent through [`JobEmitter::finish`], so a cancel racing the
//! last step can never swallow it.

use super::connection::ConnectionContext;
use super::job::{Job, JobEmitter, JobError, JobOutcome, JobPhase};
use super::Orchestrator;
use crate::analysis::{AnalysisResult, OptimizedPrompt, SecurityGate};
use crate::dlp;
use crate::engine::{EngineError, GenerationOutput, GenerationRequest};
use crate::events::{
    AnalyzePayload, Cancelled, Completed, ConversationCreated, DlpWarning, EventStatus, IntentUpdate,
    JobEvent, ModelSelected, Phase, PhaseEvent, PromptPrepared, SecurityHalt, SecurityUpdate,
    SentimentUpdate, StyleUpdate,
};
use crate::metrics;
use crate::provider::{GenerationParams, ModelProvider};
use crate::routing::{Complexity, RequestFeatures, RoutingDecision};
use crate::store::{AnalysisLog, StoredMessage};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

/// Why a job left the happy path.
#[derive(Debug)]
enum Exit {
    Cancelled,
    Failed(JobError),
}

impl From<JobError> for Exit {
    fn from(e: JobError) -> Self {
        Exit::Failed(e)
    }
}

impl From<crate::store::StoreError> for Exit {
    fn from(e: crate::store::StoreError) -> Self {
        Exit::Failed(JobError::Store(e))
    }
}

enum Flow {
    Continue,
    Done(JobOutcome),
}

/// Await `fut` unless the job is cancelled first.
async fn run_cancellable<T>(
    token: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, Exit> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Exit::Cancelled),
        v = fut => Ok(v),
    }
}

/// Wire phase that errors during `phase` are reported under.
fn wire_phase(phase: JobPhase) -> Phase {
    match phase {
        JobPhase::Started | JobPhase::Scanning => Phase::Started,
        JobPhase::Screening | JobPhase::Halted => Phase::Security,
        JobPhase::Classifying => Phase::Intent,
        JobPhase::Routing => Phase::Model,
        JobPhase::Optimizing => Phase::Prompt,
        JobPhase::Generating | JobPhase::ProviderFailover | JobPhase::QualityRetry => {
            Phase::Generating
        }
        JobPhase::Validating => Phase::Validating,
        JobPhase::Complete | JobPhase::Error => Phase::Complete,
        JobPhase::Cancelled => Phase::Cancelled,
    }
}

/// Message shown when generation is withheld.
fn halt_message(score: u8, threshold: u8) -> String {
    format!(
        "This request was blocked by the security policy (risk score {score}/10, threshold \
         {threshold}). No response was generated."
    )
}

pub(crate) struct Pipeline {
    orch: Arc<Orchestrator>,
    ctx: Arc<ConnectionContext>,
    job: Job,
    emitter: JobEmitter,
    payload: AnalyzePayload,
    conversation_id: Option<String>,
    redacted: String,
    analysis: AnalysisResult,
    analysis_model: Option<Arc<dyn ModelProvider>>,
    routing: Option<RoutingDecision>,
    prepared: Option<(OptimizedPrompt, GenerationParams)>,
    output: Option<GenerationOutput>,
}

impl Pipeline {
    pub(crate) fn new(
        orch: Arc<Orchestrator>,
        ctx: Arc<ConnectionContext>,
        job: Job,
        emitter: JobEmitter,
        payload: AnalyzePayload,
    ) -> Self {
        let conversation_id = payload.conversation_id.clone();
        Self {
            orch,
            ctx,
            job,
            emitter,
            payload,
            conversation_id,
            redacted: String::new(),
            analysis: AnalysisResult::default(),
            analysis_model: None,
            routing: None,
            prepared: None,
            output: None,
        }
    }

    /// Drive the job to a terminal phase.
    pub(crate) async fn run(mut self) -> JobOutcome {
        let outcome = match self.execute().await {
            Ok(outcome) => outcome,
            Err(Exit::Cancelled) => self.finish_cancelled().await,
            Err(Exit::Failed(e)) => self.finish_failed(e).await,
        };
        self.charge_demo_budget();
        info!(
            target: "orchestrator::pipeline",
            job_id = %self.job.id(),
            session_id = %self.job.session_id(),
            outcome = outcome.as_str(),
            duration_ms = self.job.elapsed_ms(),
            "job finished"
        );
        metrics::inc_job(outcome.as_str());
        outcome
    }

    async fn execute(&mut self) -> Result<JobOutcome, Exit> {
        self.start().await?;
        for phase in [
            JobPhase::Scanning,
            JobPhase::Screening,
            JobPhase::Classifying,
            JobPhase::Routing,
            JobPhase::Optimizing,
            JobPhase::Generating,
            JobPhase::Complete,
        ] {
            if self.job.is_cancelled() {
                return Err(Exit::Cancelled);
            }
            if let Flow::Done(outcome) = self.run_phase(phase).await? {
                return Ok(outcome);
            }
        }
        // Complete always returns Done.
        Ok(JobOutcome::Complete)
    }

    async fn run_phase(&mut self, phase: JobPhase) -> Result<Flow, Exit> {
        let span = info_span!(
            "job.phase",
            job_id = %self.job.id(),
            session_id = %self.job.session_id(),
            phase = phase.as_str(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
            error_kind = tracing::field::Empty,
        );
        let started = Instant::now();
        let result = match phase {
            JobPhase::Scanning => self.scanning().instrument(span.clone()).await,
            JobPhase::Screening => self.screening().instrument(span.clone()).await,
            JobPhase::Classifying => self.classifying().instrument(span.clone()).await,
            JobPhase::Routing => self.routing().instrument(span.clone()).await,
            JobPhase::Optimizing => self.optimizing().instrument(span.clone()).await,
            JobPhase::Generating => self.generating().instrument(span.clone()).await,
            JobPhase::Complete => self.complete().instrument(span.clone()).await,
            other => Err(Exit::Failed(JobError::InvalidTransition {
                from: self.job.phase(),
                to: other,
            })),
        };
        let elapsed = started.elapsed();
        metrics::record_phase_latency(phase.as_str(), elapsed);
        span.record("duration_ms", elapsed.as_millis() as u64);
        match &result {
            Ok(Flow::Continue) => span.record("outcome", "ok"),
            Ok(Flow::Done(outcome)) => span.record("outcome", outcome.as_str()),
            Err(Exit::Cancelled) => span.record("outcome", "cancelled"),
            Err(Exit::Failed(e)) => {
                span.record("outcome", "error");
                span.record("error_kind", e.err_type())
            }
        };
        result
    }

    // ── Phases ─────────────────────────────────────────────────────────────

    async fn start(&mut self) -> Result<(), Exit> {
        self.emitter
            .status(Phase::Started, EventStatus::Processing)
            .await;
        if self.payload.message.trim().is_empty() {
            return Err(Exit::Failed(JobError::EmptyMessage));
        }
        Ok(())
    }

    async fn scanning(&mut self) -> Result<Flow, Exit> {
        self.job.advance(JobPhase::Scanning)?;
        let scan = dlp::scan(&self.payload.message);
        if scan.has_sensitive_data {
            let kinds = scan.kinds();
            for kind in &kinds {
                let n = scan.findings.iter().filter(|f| f.kind == *kind).count();
                metrics::add_dlp_findings(kind.as_str(), n);
            }
            info!(
                target: "orchestrator::pipeline",
                kinds = ?kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
                count = scan.findings.len(),
                "dlp: sensitive data redacted"
            );
            self.emitter
                .completed(PhaseEvent::DlpWarning(DlpWarning {
                    placeholders: kinds.iter().map(|k| k.placeholder()).collect(),
                    types: kinds,
                    count: scan.findings.len(),
                    summary: scan.summary.clone(),
                }))
                .await;
        }
        self.redacted = scan.redacted_message;

        if !self.ctx.authenticated {
            let decision = self
                .orch
                .admission
                .can_send(&self.ctx.session_id, &self.ctx.origin);
            if let Some(reason) = decision.reason.filter(|_| !decision.allowed) {
                metrics::inc_admission_rejection(reason.as_str());
                warn!(
                    target: "orchestrator::pipeline",
                    reason = reason.as_str(),
                    "admission: demo request rejected"
                );
                self.job.advance(JobPhase::Halted)?;
                self.emitter
                    .error(Phase::Started, reason.to_string())
                    .await;
                return Ok(Flow::Done(JobOutcome::Rejected(reason)));
            }
        }

        // Rejected requests never get a conversation.
        if self.conversation_id.is_none() {
            let id = self
                .orch
                .store
                .create_conversation(&self.ctx.session_id)
                .await?;
            self.emitter
                .completed(PhaseEvent::ConversationCreated(ConversationCreated {
                    conversation_id: id.clone(),
                }))
                .await;
            self.conversation_id = Some(id);
        }
        let conversation = self.conversation()?;
        self.orch
            .store
            .append_message(&conversation, StoredMessage::user(self.redacted.clone()))
            .await?;
        self.emitter
            .status(Phase::Started, EventStatus::Completed)
            .await;
        Ok(Flow::Continue)
    }

    async fn screening(&mut self) -> Result<Flow, Exit> {
        self.job.advance(JobPhase::Screening)?;
        self.emitter
            .status(Phase::Security, EventStatus::Processing)
            .await;

        let gate = Arc::clone(&self.orch.security);
        // A floor that already halts cannot be lowered by the model, so the
        // model is not consulted at all.
        let floor_halts = SecurityGate::heuristic_floor(&self.redacted)
            .is_some_and(|(floor, _)| floor >= gate.threshold());
        let model = if floor_halts {
            None
        } else {
            self.analysis_model()
        };
        let token = self.job.cancel_token().clone();
        let verdict =
            run_cancellable(&token, gate.assess(&self.redacted, model.as_deref())).await?;
        let a = &verdict.assessment;
        self.analysis
            .raise_security(a.effective_score, a.explanation.clone());
        self.emitter
            .completed(PhaseEvent::Security(SecurityUpdate {
                score: self.analysis.security_score,
                explanation: self.analysis.security_explanation.clone(),
                threshold: verdict.threshold,
                heuristic_floor: a.heuristic_floor,
                model_score: a.model_score,
            }))
            .await;

        if verdict.halted {
            self.job.advance(JobPhase::Halted)?;
            info!(
                target: "orchestrator::pipeline",
                score = a.effective_score,
                threshold = verdict.threshold,
                "security: generation withheld"
            );
            let message = halt_message(self.analysis.security_score, verdict.threshold);
            self.emitter
                .completed(PhaseEvent::SecurityHalt(SecurityHalt {
                    security_halted: true,
                    score: self.analysis.security_score,
                    threshold: verdict.threshold,
                    explanation: self.analysis.security_explanation.clone(),
                    message: message.clone(),
                }))
                .await;

            let conversation = self.conversation()?;
            self.orch
                .store
                .append_message(&conversation, StoredMessage::assistant(message, None, false))
                .await?;
            self.log_analysis(&conversation, true).await?;
            self.emitter
                .finish(JobEvent::completed(
                    self.job.id(),
                    PhaseEvent::Complete(Box::new(Completed {
                        response: String::new(),
                        model: None,
                        analysis: self.analysis.clone(),
                        validation_passed: false,
                        security_halted: true,
                        conversation_id: conversation,
                        cost_usd: 0.0,
                        duration_ms: self.job.elapsed_ms(),
                    })),
                ))
                .await;
            return Ok(Flow::Done(JobOutcome::Halted));
        }
        Ok(Flow::Continue)
    }

    async fn classifying(&mut self) -> Result<Flow, Exit> {
        self.job.advance(JobPhase::Classifying)?;
        self.emitter
            .status(Phase::Intent, EventStatus::Processing)
            .await;
        let model = self.analysis_model();
        let token = self.job.cancel_token().clone();
        let classification = run_cancellable(
            &token,
            self.orch.classifier.classify(&self.redacted, model.as_deref()),
        )
        .await?;
        classification.apply_to(&mut self.analysis);

        if self.payload.use_deep_research {
            let research = run_cancellable(
                &token,
                self.orch.research.classify(&self.redacted, model.as_deref()),
            )
            .await?;
            self.job
                .add_spend(self.orch.research_cost(&self.redacted, &research));
            if research.is_research {
                self.analysis.intent = crate::analysis::Intent::Research;
            }
        }

        self.emitter
            .completed(PhaseEvent::Intent(IntentUpdate {
                intent: self.analysis.intent,
                complexity: classification.complexity,
            }))
            .await;
        self.emitter
            .completed(PhaseEvent::Sentiment(SentimentUpdate {
                sentiment: self.analysis.sentiment,
                detail: self.analysis.sentiment_detail.clone(),
            }))
            .await;
        self.emitter
            .completed(PhaseEvent::Style(StyleUpdate {
                style: self.analysis.style,
            }))
            .await;
        self.emitter
            .completed(PhaseEvent::PromptQuality(self.analysis.prompt_quality.clone()))
            .await;
        Ok(Flow::Continue)
    }

    async fn routing(&mut self) -> Result<Flow, Exit> {
        self.job.advance(JobPhase::Routing)?;
        self.emitter
            .status(Phase::Model, EventStatus::Processing)
            .await;
        let features = RequestFeatures {
            task_type: self.analysis.intent,
            complexity: self.analysis.complexity.unwrap_or(Complexity::Moderate),
            security_score: self.analysis.security_score,
            prompt: &self.redacted,
        };
        let decision = self
            .orch
            .router
            .select_candidates(&features, self.ctx.user_id.as_deref())
            .map_err(JobError::Routing)?;
        let Some(primary) = decision.primary().cloned() else {
            return Err(Exit::Failed(JobError::Routing(
                crate::routing::RouterError::NoCandidates,
            )));
        };
        self.emitter
            .completed(PhaseEvent::Model(ModelSelected {
                model: primary.model_id,
                alias: primary.alias,
                provider: primary.provider,
                rule_id: decision.rule_id.clone(),
                rule_name: decision.rule_name.clone(),
                reasoning: decision.reasoning.clone(),
                candidates: decision.candidates.clone(),
                scope: decision.scope.clone(),
                version: decision.version,
            }))
            .await;
        self.routing = Some(decision);
        Ok(Flow::Continue)
    }

    async fn optimizing(&mut self) -> Result<Flow, Exit> {
        self.job.advance(JobPhase::Optimizing)?;
        self.emitter
            .status(Phase::Prompt, EventStatus::Processing)
            .await;
        let optimized = self.orch.optimizer.optimize(&self.redacted, &self.analysis);
        self.emitter
            .completed(PhaseEvent::Prompt(PromptPrepared {
                optimized_prompt: optimized.prompt.clone(),
                strategies: optimized.applied.clone(),
            }))
            .await;
        self.emitter
            .status(Phase::Parameters, EventStatus::Processing)
            .await;
        let params = self.orch.tuner.tune(&self.analysis);
        self.emitter
            .completed(PhaseEvent::Parameters(params))
            .await;
        self.prepared = Some((optimized, params));
        Ok(Flow::Continue)
    }

    async fn generating(&mut self) -> Result<Flow, Exit> {
        self.job.advance(JobPhase::Generating)?;
        let (Some(routing), Some((optimized, params))) = (&self.routing, &self.prepared) else {
            return Err(Exit::Failed(JobError::InvalidTransition {
                from: JobPhase::Optimizing,
                to: JobPhase::Generating,
            }));
        };
        let system = self.orch.context.build(
            &self.payload.conversation_history,
            self.analysis.style,
            self.payload.preset_id.as_deref(),
            self.payload.system_prompt.as_deref(),
        );
        let request = GenerationRequest {
            system: &system,
            prompt: &optimized.prompt,
            params: *params,
            intent: self.analysis.intent,
            candidates: routing.candidates.clone(),
            api_keys: &self.payload.api_keys,
        };
        let output = self
            .orch
            .engine
            .generate(&mut self.job, &self.emitter, request)
            .await
            .map_err(|e| match e {
                EngineError::Cancelled => Exit::Cancelled,
                EngineError::Exhausted {
                    attempts,
                    last_error,
                } => Exit::Failed(JobError::CandidatesExhausted {
                    attempts,
                    last_error,
                }),
                EngineError::NoCandidates => {
                    Exit::Failed(JobError::Routing(crate::routing::RouterError::NoCandidates))
                }
                EngineError::Job(e) => Exit::Failed(e),
            })?;
        self.output = Some(output);
        Ok(Flow::Continue)
    }

    async fn complete(&mut self) -> Result<Flow, Exit> {
        let Some(output) = self.output.take() else {
            return Err(Exit::Failed(JobError::InvalidTransition {
                from: self.job.phase(),
                to: JobPhase::Complete,
            }));
        };
        self.job.advance(JobPhase::Complete)?;
        let conversation = self.conversation()?;
        self.orch
            .store
            .append_message(
                &conversation,
                StoredMessage::assistant(
                    output.text.clone(),
                    Some(output.candidate.model_id.clone()),
                    false,
                ),
            )
            .await?;
        self.log_analysis(&conversation, false).await?;
        // Past this point a cancel no longer applies: the job is terminal.
        self.emitter
            .finish(JobEvent::completed(
                self.job.id(),
                PhaseEvent::Complete(Box::new(Completed {
                    response: output.text,
                    model: Some(output.candidate.model_id),
                    analysis: self.analysis.clone(),
                    validation_passed: output.validation.passed,
                    security_halted: false,
                    conversation_id: conversation,
                    cost_usd: self.job.spent_usd(),
                    duration_ms: self.job.elapsed_ms(),
                })),
            ))
            .await;
        Ok(Flow::Done(JobOutcome::Complete))
    }

    // ── Terminal paths ─────────────────────────────────────────────────────

    async fn finish_cancelled(&mut self) -> JobOutcome {
        let text = self.job.finalize_cancelled();
        info!(
            target: "orchestrator::pipeline",
            job_id = %self.job.id(),
            kept_chars = text.len(),
            "job cancelled"
        );
        if let Some(conversation) = self.conversation_id.clone() {
            let model = self.output.as_ref().map(|o| o.candidate.model_id.clone()).or_else(|| {
                let routing = self.routing.as_ref()?;
                routing
                    .candidates
                    .get(self.job.candidate_index())
                    .map(|c| c.model_id.clone())
            });
            let stored = self
                .orch
                .store
                .append_message(
                    &conversation,
                    StoredMessage::assistant(text.clone(), model, true),
                )
                .await;
            if let Err(e) = stored {
                warn!(target: "orchestrator::pipeline", error = %e, "could not store cancelled message");
            }
        }
        self.emitter
            .finish(JobEvent::completed(
                self.job.id(),
                PhaseEvent::Cancelled(Cancelled { text }),
            ))
            .await;
        JobOutcome::Cancelled
    }

    async fn finish_failed(&mut self, e: JobError) -> JobOutcome {
        let phase = self.job.phase();
        metrics::inc_phase_error(phase.as_str(), e.err_type());
        error!(
            target: "orchestrator::pipeline",
            job_id = %self.job.id(),
            phase = phase.as_str(),
            error_kind = e.err_type(),
            error = %e,
            "job failed"
        );
        let _ = self.job.advance(JobPhase::Error);
        let message = match &e {
            JobError::CandidatesExhausted { .. } | JobError::EmptyMessage => e.to_string(),
            _ => format!("an internal error occurred during {}", wire_phase(phase)),
        };
        self.emitter.error(wire_phase(phase), message).await;
        JobOutcome::Failed(e)
    }

    // ── Helpers ────────────────────────────────────────────────────────────

    /// Charge every provider attempt of a demo job, whatever its outcome.
    fn charge_demo_budget(&self) {
        let spent = self.job.spent_usd();
        if self.ctx.authenticated || spent <= 0.0 {
            return;
        }
        self.orch.admission.record_cost(spent);
        info!(
            target: "orchestrator::pipeline",
            job_id = %self.job.id(),
            cost_usd = spent,
            "admission: demo spend recorded"
        );
    }

    fn conversation(&self) -> Result<String, Exit> {
        self.conversation_id
            .clone()
            .ok_or(Exit::Failed(JobError::Store(crate::store::StoreError::Backend(
                "job has no conversation".to_string(),
            ))))
    }

    fn analysis_model(&mut self) -> Option<Arc<dyn ModelProvider>> {
        if self.analysis_model.is_none() {
            self.analysis_model = self.orch.analysis_provider(&self.payload.api_keys);
        }
        self.analysis_model.clone()
    }

    async fn log_analysis(&self, conversation: &str, halted: bool) -> Result<(), Exit> {
        self.orch
            .store
            .log_analysis(
                conversation,
                AnalysisLog {
                    job_id: self.job.id().to_string(),
                    analysis: self.analysis.clone(),
                    halted,
                    logged_at: Utc::now(),
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Intent, ResponseValidator};
    use crate::provider::{ProviderKind, ScriptedProviderFactory};
    use crate::routing::{Candidate, GenerationCost};
    use tokio::sync::mpsc;

    const ANSWER: &str = "Paris is the capital of France, and it has been for centuries.";

    fn validating_job(token: CancellationToken) -> Job {
        let mut job = Job::new("session", token);
        for p in [
            JobPhase::Scanning,
            JobPhase::Screening,
            JobPhase::Classifying,
            JobPhase::Routing,
            JobPhase::Optimizing,
            JobPhase::Generating,
            JobPhase::Validating,
        ] {
            job.advance(p).expect("test: legal");
        }
        job
    }

    #[tokio::test]
    async fn test_cancel_racing_completion_still_delivers_complete() {
        let orch = Orchestrator::builder(Arc::new(ScriptedProviderFactory::new()))
            .analysis_model(None)
            .build()
            .expect("test: build");
        let (tx, mut rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let job = validating_job(token.clone());
        let emitter = JobEmitter::new(job.id(), tx, token.clone());
        let mut payload = AnalyzePayload::new("What is the capital of France?");
        payload.conversation_id = Some("conv-1".into());

        let mut pipeline = Pipeline::new(
            Arc::new(orch),
            Arc::new(ConnectionContext::anonymous("session", "203.0.113.9")),
            job,
            emitter,
            payload,
        );
        pipeline.output = Some(GenerationOutput {
            text: ANSWER.into(),
            candidate: Candidate {
                alias: "gpt-pro".into(),
                model_id: "gpt-5".into(),
                provider: ProviderKind::OpenAi,
            },
            validation: ResponseValidator::default().validate(
                "What is the capital of France?",
                ANSWER,
                Intent::Factual,
            ),
            cost: GenerationCost::default(),
            attempts: 1,
            provider_faults: 0,
            quality_retries: 0,
        });

        token.cancel();
        let flow = pipeline.complete().await;
        assert!(matches!(flow, Ok(Flow::Done(JobOutcome::Complete))));
        drop(pipeline);

        let mut phases = Vec::new();
        while let Some(e) = rx.recv().await {
            phases.push(e.phase());
        }
        assert_eq!(phases, vec![Phase::Complete]);
    }

    #[test]
    fn test_wire_phase_for_failover_states() {
        assert_eq!(wire_phase(JobPhase::ProviderFailover), Phase::Generating);
        assert_eq!(wire_phase(JobPhase::Routing), Phase::Model);
        assert_eq!(wire_phase(JobPhase::Scanning), Phase::Started);
    }

    #[test]
    fn test_halt_message_names_score_and_threshold() {
        let m = halt_message(8, 8);
        assert!(m.contains("8/10"));
        assert!(m.contains("threshold 8"));
    }

    #[tokio::test]
    async fn test_run_cancellable_prefers_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let r = run_cancellable(&token, async { 1 }).await;
        assert!(matches!(r, Err(Exit::Cancelled)));
        let live = CancellationToken::new();
        assert!(matches!(run_cancellable(&live, async { 2 }).await, Ok(2)));
    }
}
