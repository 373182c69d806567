//! # Stage: Generation
//!
//! ## Responsibility
//! Stream a response from the first healthy candidate, fail over across
//! candidates on provider faults, and escalate to the next candidate when a
//! response fails validation.
//!
//! ## Guarantees
//! - Bounded: both loops share one [`CandidateRetry`] cursor, so the number
//!   of attempts never exceeds the candidate count, and quality retries are
//!   further capped by `max_quality_retries`.
//! - Exactly one `provider_error` event per failed attempt, emitted before
//!   the next attempt starts; a failed attempt never emits `response`.
//! - Streamed text of a discarded attempt is cleared from the job and a
//!   `response_clear` event tells the client to drop it.
//! - Cancellation aborts the in-flight provider call.
//! - Every attempt that streamed tokens is priced into the job's spend,
//!   whether it was accepted, rejected by validation, cut off by a fault or
//!   cancelled.
//! - Response text is never logged.
//!
//! ## NOT Responsible For
//! - Choosing the candidates (see `routing`)
//! - Persisting the final message (see `orchestrator`)

use crate::analysis::{Intent, ResponseValidator, ValidationReport};
use crate::enhanced::{
    CandidateRetry, CircuitBreaker, FailureClass, ProviderBreakers, RetryDecision,
};
use crate::events::{
    EventStatus, GenerationAttempt, Phase, PhaseEvent, ProviderFailover, QualityRetry,
    ResponseChunk, ResponseText, ValidationOutcome,
};
use crate::metrics;
use crate::orchestrator::job::{Job, JobEmitter, JobError, JobPhase};
use crate::provider::{ApiKeys, GenerationParams, ProviderError, ProviderFactory};
use crate::registry::ModelAliasRegistry;
use crate::routing::{Candidate, CostTracker, GenerationCost};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default deadline for one generation attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(90);

/// Generation failures that end the job.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The candidate list was empty.
    #[error("no candidate models to try")]
    NoCandidates,

    /// Every candidate failed.
    #[error("all {attempts} candidate models failed; last error: {last_error}")]
    Exhausted {
        /// Attempts made.
        attempts: usize,
        /// Error text of the last attempt.
        last_error: String,
    },

    /// The job was cancelled mid-generation.
    #[error("generation cancelled")]
    Cancelled,

    /// Job state-machine violation.
    #[error(transparent)]
    Job(#[from] JobError),
}

/// Inputs of one generation.
#[derive(Debug)]
pub struct GenerationRequest<'a> {
    /// System prompt from the context builder.
    pub system: &'a str,
    /// Optimized user prompt.
    pub prompt: &'a str,
    /// Tuned sampling parameters.
    pub params: GenerationParams,
    /// Detected intent, used by validation.
    pub intent: Intent,
    /// Ordered candidates from the router.
    pub candidates: Vec<Candidate>,
    /// Caller-supplied provider keys.
    pub api_keys: &'a ApiKeys,
}

/// Accepted response.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// Response text.
    pub text: String,
    /// Candidate that produced it.
    pub candidate: Candidate,
    /// Validation of the accepted response (may have failed when the
    /// quality budget ran out).
    pub validation: ValidationReport,
    /// Estimated cost of the accepted attempt. The job's
    /// [`spent_usd`](Job::spent_usd) also counts discarded attempts.
    pub cost: GenerationCost,
    /// Attempts made, including the accepted one.
    pub attempts: usize,
    /// Provider faults seen.
    pub provider_faults: usize,
    /// Quality retries taken.
    pub quality_retries: usize,
}

/// Streaming generation with failover and quality-gated retry.
pub struct GenerationEngine {
    factory: Arc<dyn ProviderFactory>,
    registry: Arc<ModelAliasRegistry>,
    breakers: Arc<ProviderBreakers>,
    costs: Arc<CostTracker>,
    validator: ResponseValidator,
    max_quality_retries: usize,
    attempt_timeout: Duration,
    failover_backoff: Duration,
}

impl GenerationEngine {
    /// Engine with default validation, two quality retries and no backoff.
    pub fn new(
        factory: Arc<dyn ProviderFactory>,
        registry: Arc<ModelAliasRegistry>,
        breakers: Arc<ProviderBreakers>,
        costs: Arc<CostTracker>,
    ) -> Self {
        Self {
            factory,
            registry,
            breakers,
            costs,
            validator: ResponseValidator::default(),
            max_quality_retries: 2,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            failover_backoff: Duration::ZERO,
        }
    }

    /// Replace the response validator.
    pub fn with_validator(mut self, validator: ResponseValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Cap on quality-gated retries.
    pub fn with_max_quality_retries(mut self, n: usize) -> Self {
        self.max_quality_retries = n;
        self
    }

    /// Deadline for one attempt, from call to end of stream.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Pause before trying the next candidate after a provider fault.
    pub fn with_failover_backoff(mut self, backoff: Duration) -> Self {
        self.failover_backoff = backoff;
        self
    }

    /// Per-provider breakers.
    pub fn breakers(&self) -> &Arc<ProviderBreakers> {
        &self.breakers
    }

    /// Cost totals.
    pub fn costs(&self) -> &Arc<CostTracker> {
        &self.costs
    }

    /// Provider factory.
    pub fn factory(&self) -> &Arc<dyn ProviderFactory> {
        &self.factory
    }

    /// Run generation for `job`, which must be in [`JobPhase::Generating`].
    ///
    /// On success the job is left in [`JobPhase::Validating`]; the caller
    /// completes it.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NoCandidates`] on an empty candidate list.
    /// - [`EngineError::Exhausted`] when every candidate failed.
    /// - [`EngineError::Cancelled`] when the job was cancelled.
    pub async fn generate(
        &self,
        job: &mut Job,
        emitter: &JobEmitter,
        request: GenerationRequest<'_>,
    ) -> Result<GenerationOutput, EngineError> {
        if request.candidates.is_empty() {
            return Err(EngineError::NoCandidates);
        }
        let mut retry = CandidateRetry::new(request.candidates.clone(), self.max_quality_retries)
            .with_backoff(self.failover_backoff);
        let mut last_error = String::new();

        loop {
            let Some(candidate) = retry.current().cloned() else {
                return Err(EngineError::Exhausted {
                    attempts: retry.attempts(),
                    last_error,
                });
            };
            if job.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            job.set_candidate_index(retry.index());
            info!(
                target: "orchestrator::engine",
                job_id = %job.id(),
                model = %candidate.model_id,
                provider = %candidate.provider,
                attempt = retry.attempts(),
                "engine: generation attempt"
            );
            let attempt = GenerationAttempt {
                model: candidate.model_id.clone(),
                provider: candidate.provider,
                attempt: retry.attempts(),
            };
            emitter
                .with_payload(
                    EventStatus::Processing,
                    PhaseEvent::Generating(attempt.clone()),
                )
                .await;

            match self.attempt(job, emitter, &candidate, &request).await {
                Ok(text) => {
                    let cost = self.charge(job, &candidate, &request, &text);
                    emitter
                        .with_payload(EventStatus::Completed, PhaseEvent::Generating(attempt))
                        .await;
                    emitter
                        .completed(PhaseEvent::Response(ResponseText {
                            text: text.clone(),
                            model: candidate.model_id.clone(),
                        }))
                        .await;
                    job.advance(JobPhase::Validating)?;
                    emitter
                        .status(Phase::Validating, EventStatus::Processing)
                        .await;
                    let report = self.validator.validate(request.prompt, &text, request.intent);
                    emitter
                        .completed(PhaseEvent::Validating(ValidationOutcome {
                            passed: report.passed,
                            reason: report.reason.clone(),
                            overall: report.overall,
                        }))
                        .await;

                    if !report.passed && retry.can_retry_quality() {
                        if let RetryDecision::Advance { .. } =
                            retry.on_failure(FailureClass::QualityFault)
                        {
                            let reason = report.reason.clone().unwrap_or_default();
                            debug!(
                                target: "orchestrator::engine",
                                job_id = %job.id(),
                                reason = %reason,
                                "engine: response failed validation, escalating"
                            );
                            job.clear_text();
                            emitter
                                .status(Phase::ResponseClear, EventStatus::Completed)
                                .await;
                            job.advance(JobPhase::QualityRetry)?;
                            metrics::inc_quality_retry();
                            let next_model = retry
                                .current()
                                .map(|c| c.model_id.clone())
                                .unwrap_or_default();
                            emitter
                                .completed(PhaseEvent::Retrying(QualityRetry {
                                    reason,
                                    next_model,
                                    retry: retry.quality_retries(),
                                }))
                                .await;
                            job.advance(JobPhase::Generating)?;
                            continue;
                        }
                    }

                    return Ok(GenerationOutput {
                        text,
                        candidate,
                        validation: report,
                        cost,
                        attempts: retry.attempts(),
                        provider_faults: retry.provider_faults(),
                        quality_retries: retry.quality_retries(),
                    });
                }
                Err(ProviderError::Cancelled) => {
                    self.charge_partial(job, &candidate, &request);
                    return Err(EngineError::Cancelled);
                }
                Err(e) => {
                    warn!(
                        target: "orchestrator::engine",
                        job_id = %job.id(),
                        model = %candidate.model_id,
                        provider = %candidate.provider,
                        error_kind = e.err_type(),
                        "engine: provider fault"
                    );
                    metrics::inc_provider_failover(candidate.provider.as_str());
                    last_error = e.to_string();
                    self.charge_partial(job, &candidate, &request);

                    if !job.text().is_empty() {
                        job.clear_text();
                        emitter
                            .status(Phase::ResponseClear, EventStatus::Completed)
                            .await;
                    }
                    job.advance(JobPhase::ProviderFailover)?;
                    let next = retry.peek_next().cloned();
                    emitter
                        .failed(
                            PhaseEvent::ProviderError(ProviderFailover {
                                failed_model: candidate.model_id.clone(),
                                failed_provider: candidate.provider,
                                error_type: e.err_type(),
                                next_model: next.as_ref().map(|c| c.model_id.clone()),
                                next_provider: next.as_ref().map(|c| c.provider),
                            }),
                            last_error.clone(),
                        )
                        .await;

                    match retry.on_failure(FailureClass::ProviderFault) {
                        RetryDecision::Advance { delay, .. } => {
                            if !delay.is_zero() {
                                tokio::select! {
                                    _ = job.cancel_token().cancelled() => return Err(EngineError::Cancelled),
                                    _ = tokio::time::sleep(delay) => {}
                                }
                            }
                            job.advance(JobPhase::Generating)?;
                        }
                        RetryDecision::Exhausted | RetryDecision::Abort => {
                            return Err(EngineError::Exhausted {
                                attempts: retry.attempts(),
                                last_error,
                            });
                        }
                    }
                }
            }
        }
    }

    /// One streamed call. Appends every fragment to the job and emits it.
    async fn attempt(
        &self,
        job: &mut Job,
        emitter: &JobEmitter,
        candidate: &Candidate,
        request: &GenerationRequest<'_>,
    ) -> Result<String, ProviderError> {
        let breaker = self.breakers.get(candidate.provider);
        if !breaker.try_acquire().await {
            return Err(ProviderError::CircuitOpen(candidate.provider));
        }
        let provider = self.factory.create(
            candidate.provider,
            &candidate.model_id,
            request.api_keys,
        )?;

        let cancel = job.cancel_token().clone();
        let deadline = Instant::now() + self.attempt_timeout;
        let provider_kind = candidate.provider;
        let timed_out = move || ProviderError::Timeout {
            provider: provider_kind,
        };

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            r = tokio::time::timeout_at(
                deadline,
                provider.generate_stream(request.system, request.prompt, &request.params),
            ) => r,
        };
        let mut stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(self.settle(&breaker, e).await),
            Err(_) => return Err(self.settle(&breaker, timed_out()).await),
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                n = tokio::time::timeout_at(deadline, stream.next()) => n,
            };
            match next {
                Err(_) => return Err(self.settle(&breaker, timed_out()).await),
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(self.settle(&breaker, e).await),
                Ok(Some(Ok(token))) => {
                    if token.is_empty() {
                        continue;
                    }
                    job.append_text(&token);
                    emitter
                        .completed(PhaseEvent::ResponseChunk(ResponseChunk { token }))
                        .await;
                }
            }
        }
        breaker.record_success().await;
        Ok(job.text().to_string())
    }

    /// Feed the breaker for faults that reflect provider health.
    async fn settle(
        &self,
        breaker: &CircuitBreaker,
        e: ProviderError,
    ) -> ProviderError {
        if matches!(
            e,
            ProviderError::Timeout { .. }
                | ProviderError::Unavailable { .. }
                | ProviderError::Malformed { .. }
        ) {
            breaker.record_failure().await;
        }
        e
    }

    /// Price an attempt that produced `text` and add it to the job's spend.
    fn charge(
        &self,
        job: &mut Job,
        candidate: &Candidate,
        request: &GenerationRequest<'_>,
        text: &str,
    ) -> GenerationCost {
        let Some(family) = self.registry.family_of(&candidate.alias) else {
            return GenerationCost::default();
        };
        let input = format!("{}\n{}", request.system, request.prompt);
        let cost = self.costs.record(family, &input, text);
        job.add_spend(cost.cost_usd);
        cost
    }

    /// Charge whatever a failed or cancelled attempt streamed before it stopped.
    fn charge_partial(
        &self,
        job: &mut Job,
        candidate: &Candidate,
        request: &GenerationRequest<'_>,
    ) {
        if job.text().is_empty() {
            return;
        }
        let partial = job.text().to_string();
        self.charge(job, candidate, request, &partial);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::JobEvent;
    use crate::provider::{ProviderKind, ScriptStep, ScriptedProvider, ScriptedProviderFactory};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    const GOOD: &str = "Paris is the capital of France, and it has been for centuries.";

    fn candidate(alias: &str, model: &str, provider: ProviderKind) -> Candidate {
        Candidate {
            alias: alias.into(),
            model_id: model.into(),
            provider,
        }
    }

    fn candidates() -> Vec<Candidate> {
        vec![
            candidate("gpt-pro", "gpt-5", ProviderKind::OpenAi),
            candidate("claude-sonnet", "claude-sonnet-4-5-20250929", ProviderKind::Anthropic),
            candidate("gemini-pro", "gemini-2.5-pro", ProviderKind::Google),
        ]
    }

    fn engine(factory: ScriptedProviderFactory) -> GenerationEngine {
        GenerationEngine::new(
            Arc::new(factory),
            Arc::new(ModelAliasRegistry::with_builtin_families().expect("builtin registry")),
            Arc::new(ProviderBreakers::default()),
            Arc::new(CostTracker::new()),
        )
    }

    fn generating_job(token: CancellationToken) -> Job {
        let mut job = Job::new("session", token);
        for p in [
            JobPhase::Scanning,
            JobPhase::Screening,
            JobPhase::Classifying,
            JobPhase::Routing,
            JobPhase::Optimizing,
            JobPhase::Generating,
        ] {
            job.advance(p).expect("legal");
        }
        job
    }

    async fn run(
        engine: &GenerationEngine,
        token: CancellationToken,
    ) -> (Result<GenerationOutput, EngineError>, Vec<JobEvent>, Job) {
        let (tx, mut rx) = mpsc::channel(256);
        let mut job = generating_job(token.clone());
        let emitter = JobEmitter::new(job.id(), tx, token);
        let keys = ApiKeys::default();
        let result = engine
            .generate(
                &mut job,
                &emitter,
                GenerationRequest {
                    system: "Be helpful.",
                    prompt: "What is the capital of France?",
                    params: GenerationParams::default(),
                    intent: Intent::Factual,
                    candidates: candidates(),
                    api_keys: &keys,
                },
            )
            .await;
        drop(emitter);
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        (result, events, job)
    }

    fn phases(events: &[JobEvent]) -> Vec<Phase> {
        events.iter().map(JobEvent::phase).collect()
    }

    #[tokio::test]
    async fn test_first_candidate_succeeds() {
        let openai = Arc::new(
            ScriptedProvider::new(ProviderKind::OpenAi, "gpt-5")
                .with_steps([ScriptStep::stream(["Paris is the capital ", "of France, and it has been for centuries."], Duration::ZERO)]),
        );
        let engine = engine(ScriptedProviderFactory::new().with_model(openai));
        let (result, events, job) = run(&engine, CancellationToken::new()).await;
        let out = result.expect("generation succeeds");
        assert_eq!(out.text, GOOD);
        assert_eq!(out.attempts, 1);
        assert!(out.validation.passed);
        assert!(out.cost.cost_usd > 0.0);
        assert!((job.spent_usd() - out.cost.cost_usd).abs() < 1e-12);
        assert_eq!(job.phase(), JobPhase::Validating);
        let p = phases(&events);
        assert_eq!(p.iter().filter(|p| **p == Phase::ResponseChunk).count(), 2);
        assert_eq!(p.last(), Some(&Phase::Validating));
    }

    #[tokio::test]
    async fn test_provider_fault_fails_over_once() {
        let openai = Arc::new(
            ScriptedProvider::new(ProviderKind::OpenAi, "gpt-5").with_steps([ScriptStep::Fail(
                ProviderError::Timeout {
                    provider: ProviderKind::OpenAi,
                },
            )]),
        );
        let anthropic = Arc::new(
            ScriptedProvider::new(ProviderKind::Anthropic, "claude-sonnet-4-5-20250929")
                .with_steps([ScriptStep::reply(GOOD)]),
        );
        let engine = engine(
            ScriptedProviderFactory::new()
                .with_model(openai.clone())
                .with_model(anthropic.clone()),
        );
        let (result, events, _) = run(&engine, CancellationToken::new()).await;
        let out = result.expect("second candidate succeeds");
        assert_eq!(out.candidate.provider, ProviderKind::Anthropic);
        assert_eq!(out.provider_faults, 1);

        let p = phases(&events);
        let errors: Vec<&JobEvent> = events
            .iter()
            .filter(|e| e.phase() == Phase::ProviderError)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].event_status(), EventStatus::Error);
        let Some(PhaseEvent::ProviderError(payload)) = errors[0].payload() else {
            panic!("provider_error carries a payload");
        };
        assert_eq!(payload.next_model.as_deref(), Some("claude-sonnet-4-5-20250929"));

        let err_at = p.iter().position(|p| *p == Phase::ProviderError).expect("present");
        let second_attempt = p
            .iter()
            .enumerate()
            .filter(|(_, p)| **p == Phase::Generating)
            .nth(1)
            .map(|(i, _)| i)
            .expect("second attempt");
        assert!(err_at < second_attempt);
        assert_eq!(p.iter().filter(|p| **p == Phase::Response).count(), 1);
        assert_eq!(openai.calls(), 1);
        assert_eq!(anthropic.calls(), 1);
    }

    #[tokio::test]
    async fn test_partial_stream_then_fault_clears_text() {
        let openai = Arc::new(
            ScriptedProvider::new(ProviderKind::OpenAi, "gpt-5").with_steps([
                ScriptStep::FailAfter(
                    vec!["Half an ans".into()],
                    ProviderError::Unavailable {
                        provider: ProviderKind::OpenAi,
                        message: "connection reset".into(),
                    },
                ),
            ]),
        );
        let anthropic = Arc::new(
            ScriptedProvider::new(ProviderKind::Anthropic, "claude-sonnet-4-5-20250929")
                .with_steps([ScriptStep::reply(GOOD)]),
        );
        let engine = engine(
            ScriptedProviderFactory::new()
                .with_model(openai)
                .with_model(anthropic),
        );
        let (result, events, job) = run(&engine, CancellationToken::new()).await;
        let out = result.expect("failover succeeds");
        assert_eq!(out.text, GOOD);
        assert!(job.spent_usd() > out.cost.cost_usd);
        let p = phases(&events);
        let clear = p.iter().position(|p| *p == Phase::ResponseClear).expect("cleared");
        let err = p.iter().position(|p| *p == Phase::ProviderError).expect("error");
        assert!(clear < err);
    }

    #[tokio::test]
    async fn test_all_candidates_fail() {
        let engine = engine(ScriptedProviderFactory::new());
        let (result, events, job) = run(&engine, CancellationToken::new()).await;
        match result {
            Err(EngineError::Exhausted { attempts, last_error }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("no API key"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(
            events.iter().filter(|e| e.phase() == Phase::ProviderError).count(),
            3
        );
        assert_eq!(job.phase(), JobPhase::ProviderFailover);
    }

    #[tokio::test]
    async fn test_quality_failure_escalates_then_accepts() {
        let openai = Arc::new(
            ScriptedProvider::new(ProviderKind::OpenAi, "gpt-5")
                .with_steps([ScriptStep::reply("I can't help with that.")]),
        );
        let anthropic = Arc::new(
            ScriptedProvider::new(ProviderKind::Anthropic, "claude-sonnet-4-5-20250929")
                .with_steps([ScriptStep::reply(GOOD)]),
        );
        let engine = engine(
            ScriptedProviderFactory::new()
                .with_model(openai)
                .with_model(anthropic),
        );
        let (result, events, job) = run(&engine, CancellationToken::new()).await;
        let out = result.expect("escalation succeeds");
        assert_eq!(out.quality_retries, 1);
        assert!(
            job.spent_usd() > out.cost.cost_usd,
            "the rejected attempt is charged too"
        );
        assert_eq!(out.candidate.alias, "claude-sonnet");
        let p = phases(&events);
        assert!(p.contains(&Phase::Retrying));
        assert!(p.contains(&Phase::ResponseClear));
        assert_eq!(p.iter().filter(|p| **p == Phase::ProviderError).count(), 0);
    }

    #[tokio::test]
    async fn test_quality_retries_are_bounded() {
        let refusal = ScriptStep::reply("I can't help with that.");
        let factory = ScriptedProviderFactory::new()
            .with_kind(Arc::new(
                ScriptedProvider::new(ProviderKind::OpenAi, "gpt-5").with_steps([refusal.clone()]),
            ))
            .with_kind(Arc::new(
                ScriptedProvider::new(ProviderKind::Anthropic, "claude")
                    .with_steps([refusal.clone()]),
            ))
            .with_kind(Arc::new(
                ScriptedProvider::new(ProviderKind::Google, "gemini").with_steps([refusal]),
            ));
        let engine = engine(factory).with_max_quality_retries(1);
        let (result, _, _) = run(&engine, CancellationToken::new()).await;
        let out = result.expect("accepted after budget spent");
        assert_eq!(out.attempts, 2);
        assert!(!out.validation.passed);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_stream() {
        let openai = Arc::new(
            ScriptedProvider::new(ProviderKind::OpenAi, "gpt-5").with_steps([ScriptStep::stream(
                ["one ", "two ", "three ", "four "],
                Duration::from_millis(50),
            )]),
        );
        let engine = engine(ScriptedProviderFactory::new().with_model(openai));
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            canceller.cancel();
        });
        let (result, _, job) = run(&engine, token).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert!(job.spent_usd() > 0.0, "streamed tokens are charged");
        assert!(job.text().starts_with("one "));
        assert!(!job.text().contains("four"));
    }

    #[tokio::test]
    async fn test_open_breaker_skips_provider() {
        let openai = Arc::new(ScriptedProvider::new(ProviderKind::OpenAi, "gpt-5"));
        let anthropic = Arc::new(
            ScriptedProvider::new(ProviderKind::Anthropic, "claude-sonnet-4-5-20250929")
                .with_steps([ScriptStep::reply(GOOD)]),
        );
        let engine = engine(
            ScriptedProviderFactory::new()
                .with_model(openai.clone())
                .with_model(anthropic),
        );
        engine.breakers().get(ProviderKind::OpenAi).trip().await;
        let (result, events, _) = run(&engine, CancellationToken::new()).await;
        assert!(result.is_ok());
        assert_eq!(openai.calls(), 0);
        let err = events
            .iter()
            .find(|e| e.phase() == Phase::ProviderError)
            .expect("failover event");
        assert!(err.error_message().is_some_and(|m| m.contains("circuit breaker")));
    }
}
