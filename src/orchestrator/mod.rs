//! # Stage: Job Orchestration
//!
//! ## Responsibility
//! Own the services every job needs, and drive one job per connection
//! through the analyze-then-generate pipeline.
//!
//! ## Guarantees
//! - At most one non-terminal job per [`Connection`]; a second `analyze`
//!   is rejected with an error event while one is running.
//! - Cancellation is cooperative and deterministic: partial text is kept
//!   with a marker and no event follows the `cancelled` event.
//! - Only redacted text ever reaches a provider.
//!
//! ## NOT Responsible For
//! - Transport (see `web_api`)
//! - Scoring, routing or generation internals (see the stage modules)

pub mod connection;
pub mod job;
mod pipeline;

pub use connection::{Connection, ConnectionContext};
pub use job::{Job, JobEmitter, JobError, JobOutcome, JobPhase, CANCELLATION_MARKER};

use crate::admission::{AdmissionDenial, DemoBudgetTracker, DemoLimits};
use crate::config::OrchestratorConfig;
use crate::analysis::research::RESEARCH_PROMPT;
use crate::analysis::{
    Classifier, ParameterTuner, PromptOptimizer, ResearchClassification, ResearchClassifier,
    ResponseValidator, SecurityGate, SystemContextBuilder,
};
use crate::dlp;
use crate::engine::{GenerationEngine, DEFAULT_ATTEMPT_TIMEOUT};
use crate::metrics;
use crate::enhanced::ProviderBreakers;
use crate::provider::{ApiKeys, ModelProvider, ProviderFactory};
use crate::registry::ModelAliasRegistry;
use crate::routing::{CostTracker, ModelRouter, RuleScope, RuleSetStore};
use crate::store::{ConversationStore, InMemoryConversationStore};
use crate::OrchestratorError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Author recorded on rule-set versions published from the config file.
pub const CONFIG_AUTHOR: &str = "config";

/// Default alias of the model used for screening and classification.
pub const DEFAULT_ANALYSIS_MODEL: &str = "gemini-flash";

/// Shared, process-wide services. Cheap to share behind an `Arc`.
pub struct Orchestrator {
    registry: Arc<ModelAliasRegistry>,
    router: Arc<ModelRouter>,
    store: Arc<dyn ConversationStore>,
    security: Arc<SecurityGate>,
    admission: Arc<DemoBudgetTracker>,
    engine: GenerationEngine,
    classifier: Classifier,
    research: ResearchClassifier,
    optimizer: PromptOptimizer,
    tuner: ParameterTuner,
    context: SystemContextBuilder,
    analysis_model: Option<String>,
}

impl Orchestrator {
    /// Start building an orchestrator around `factory`.
    pub fn builder(factory: Arc<dyn ProviderFactory>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(factory)
    }

    /// Alias registry.
    pub fn registry(&self) -> &Arc<ModelAliasRegistry> {
        &self.registry
    }

    /// Model router (and its rule-set store).
    pub fn router(&self) -> &Arc<ModelRouter> {
        &self.router
    }

    /// Conversation store.
    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Security gate.
    pub fn security(&self) -> &Arc<SecurityGate> {
        &self.security
    }

    /// Demo admission controller.
    pub fn admission(&self) -> &Arc<DemoBudgetTracker> {
        &self.admission
    }

    /// Generation engine.
    pub fn engine(&self) -> &GenerationEngine {
        &self.engine
    }

    /// Provider for the analysis model, or `None` when none is configured
    /// or no credential is available. Analysis then runs on heuristics.
    pub(crate) fn analysis_provider(&self, keys: &ApiKeys) -> Option<Arc<dyn ModelProvider>> {
        let alias = self.analysis_model.as_deref()?;
        let family = self.registry.family_of(alias)?;
        let model_id = self.registry.resolve(alias);
        match self.engine.factory().create(family.provider, &model_id, keys) {
            Ok(p) => Some(p),
            Err(e) => {
                debug!(alias, error = %e, "analysis model unavailable, using heuristics");
                None
            }
        }
    }

    /// Apply a reloaded config to running services.
    ///
    /// Changes the security threshold and, when the configured org rule
    /// set differs from the current org version, publishes it as a new
    /// version. Other settings take effect on restart.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::ConfigError`] if the threshold or rule set is
    /// rejected; nothing is changed in that case.
    pub fn apply_config(&self, config: &OrchestratorConfig) -> Result<(), OrchestratorError> {
        let draft = config.router.rule_set.clone();
        if let Some(draft) = &draft {
            crate::routing::RuleSet::compile(draft.clone(), &self.registry)
                .map_err(|e| OrchestratorError::ConfigError(e.to_string()))?;
        }
        self.security
            .set_threshold(config.security.threshold)
            .map_err(|e| OrchestratorError::ConfigError(e.to_string()))?;

        if let Some(draft) = draft {
            let store = self.router.store();
            let unchanged = store
                .current(&RuleScope::Org)
                .is_some_and(|v| v.rule_set.to_draft() == draft);
            if !unchanged {
                let version = store
                    .publish(
                        RuleScope::Org,
                        draft,
                        Some(CONFIG_AUTHOR.to_string()),
                        &self.registry,
                    )
                    .map_err(|e| OrchestratorError::ConfigError(e.to_string()))?;
                info!(version = version.version, "config: org rule set published");
            }
        }
        info!(
            threshold = config.security.threshold,
            "config: applied"
        );
        Ok(())
    }

    /// Decide whether `message` needs deep research, using server keys.
    ///
    /// The message is redacted before any model sees it. Unauthenticated
    /// callers go through admission control first, and the model call is
    /// charged to the demo budget.
    ///
    /// # Errors
    ///
    /// The [`AdmissionDenial`] when a demo caller is over a limit. No model
    /// is called in that case.
    pub async fn classify_research(
        &self,
        message: &str,
        ctx: &ConnectionContext,
    ) -> Result<ResearchClassification, AdmissionDenial> {
        if !ctx.authenticated {
            let decision = self.admission.can_send(&ctx.session_id, &ctx.origin);
            if let Some(reason) = decision.reason.filter(|_| !decision.allowed) {
                metrics::inc_admission_rejection(reason.as_str());
                debug!(reason = reason.as_str(), "admission: research request rejected");
                return Err(reason);
            }
        }
        let redacted = dlp::scan(message).redacted_message;
        let model = self.analysis_provider(&ApiKeys::default());
        let verdict = self.research.classify(&redacted, model.as_deref()).await;
        let cost = self.research_cost(&redacted, &verdict);
        if !ctx.authenticated && cost > 0.0 {
            self.admission.record_cost(cost);
        }
        Ok(verdict)
    }

    /// Estimated USD cost of the model call behind `verdict`; zero when the
    /// keyword fallback ran without a model reply.
    fn research_cost(&self, message: &str, verdict: &ResearchClassification) -> f64 {
        let (Some(answer), Some(alias)) = (verdict.answer.as_deref(), self.analysis_model.as_deref())
        else {
            return 0.0;
        };
        let Some(family) = self.registry.family_of(alias) else {
            return 0.0;
        };
        let input = format!("{RESEARCH_PROMPT}\n{message}");
        self.engine.costs().record(family, &input, answer).cost_usd
    }
}

/// Builder for [`Orchestrator`]. Every collaborator has a default.
pub struct OrchestratorBuilder {
    factory: Arc<dyn ProviderFactory>,
    registry: Option<Arc<ModelAliasRegistry>>,
    rule_store: Option<Arc<RuleSetStore>>,
    store: Option<Arc<dyn ConversationStore>>,
    security: Option<Arc<SecurityGate>>,
    security_threshold: Option<u8>,
    admission: Option<Arc<DemoBudgetTracker>>,
    breakers: Option<Arc<ProviderBreakers>>,
    costs: Option<Arc<CostTracker>>,
    validator: ResponseValidator,
    context: SystemContextBuilder,
    optimizer: PromptOptimizer,
    tuner: ParameterTuner,
    analysis_model: Option<String>,
    max_quality_retries: usize,
    attempt_timeout: Duration,
    failover_backoff: Duration,
}

impl OrchestratorBuilder {
    fn new(factory: Arc<dyn ProviderFactory>) -> Self {
        Self {
            factory,
            registry: None,
            rule_store: None,
            store: None,
            security: None,
            security_threshold: None,
            admission: None,
            breakers: None,
            costs: None,
            validator: ResponseValidator::default(),
            context: SystemContextBuilder::default(),
            optimizer: PromptOptimizer::default(),
            tuner: ParameterTuner::default(),
            analysis_model: Some(DEFAULT_ANALYSIS_MODEL.to_string()),
            max_quality_retries: 2,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            failover_backoff: Duration::ZERO,
        }
    }

    /// Apply every setting from `config`.
    ///
    /// The configured org rule set is published by [`Orchestrator::apply_config`],
    /// which callers run after [`OrchestratorBuilder::build`].
    pub fn with_config(mut self, config: &OrchestratorConfig) -> Self {
        self.security_threshold = Some(config.security.threshold);
        self.admission = Some(Arc::new(DemoBudgetTracker::new(config.demo.limits())));
        self.breakers = Some(Arc::new(config.generation.breakers()));
        self.context = config.analysis.context_builder();
        self.tuner = ParameterTuner::new(config.generation.max_tokens_cap);
        self.analysis_model = config.analysis.model_alias();
        self.max_quality_retries = config.generation.max_quality_retries;
        self.attempt_timeout = config.generation.attempt_timeout();
        self.failover_backoff = config.generation.failover_backoff();
        self
    }

    /// Use an existing alias registry.
    pub fn registry(mut self, registry: Arc<ModelAliasRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use an existing rule-set store.
    pub fn rule_store(mut self, store: Arc<RuleSetStore>) -> Self {
        self.rule_store = Some(store);
        self
    }

    /// Use a conversation store other than the in-memory one.
    pub fn conversation_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use an existing security gate.
    pub fn security(mut self, gate: Arc<SecurityGate>) -> Self {
        self.security = Some(gate);
        self
    }

    /// Use an existing admission controller.
    pub fn admission(mut self, tracker: Arc<DemoBudgetTracker>) -> Self {
        self.admission = Some(tracker);
        self
    }

    /// Use existing provider breakers.
    pub fn breakers(mut self, breakers: Arc<ProviderBreakers>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    /// Use an existing cost tracker.
    pub fn costs(mut self, costs: Arc<CostTracker>) -> Self {
        self.costs = Some(costs);
        self
    }

    /// Response validator.
    pub fn validator(mut self, validator: ResponseValidator) -> Self {
        self.validator = validator;
        self
    }

    /// System-context builder.
    pub fn context(mut self, context: SystemContextBuilder) -> Self {
        self.context = context;
        self
    }

    /// Prompt optimizer.
    pub fn optimizer(mut self, optimizer: PromptOptimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Parameter tuner.
    pub fn tuner(mut self, tuner: ParameterTuner) -> Self {
        self.tuner = tuner;
        self
    }

    /// Alias of the analysis model; `None` runs analysis on heuristics.
    pub fn analysis_model(mut self, alias: Option<String>) -> Self {
        self.analysis_model = alias;
        self
    }

    /// Cap on quality-gated retries.
    pub fn max_quality_retries(mut self, n: usize) -> Self {
        self.max_quality_retries = n;
        self
    }

    /// Deadline for one generation attempt.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Pause between failover attempts.
    pub fn failover_backoff(mut self, backoff: Duration) -> Self {
        self.failover_backoff = backoff;
        self
    }

    /// Assemble the orchestrator.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::ConfigError`] if the built-in registry or rule
    /// set fails to compile, or the configured threshold is out of range.
    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let registry = match self.registry {
            Some(r) => r,
            None => Arc::new(
                ModelAliasRegistry::with_builtin_families()
                    .map_err(|e| OrchestratorError::ConfigError(e.to_string()))?,
            ),
        };
        let security = match (self.security, self.security_threshold) {
            (Some(gate), _) => gate,
            (None, Some(t)) => Arc::new(
                SecurityGate::new(t).map_err(|e| OrchestratorError::ConfigError(e.to_string()))?,
            ),
            (None, None) => Arc::default(),
        };
        let rule_store = self.rule_store.unwrap_or_default();
        let router = ModelRouter::new(Arc::clone(&registry), rule_store)
            .map_err(|e| OrchestratorError::ConfigError(e.to_string()))?;
        let engine = GenerationEngine::new(
            self.factory,
            Arc::clone(&registry),
            self.breakers.unwrap_or_default(),
            self.costs.unwrap_or_default(),
        )
        .with_validator(self.validator)
        .with_max_quality_retries(self.max_quality_retries)
        .with_attempt_timeout(self.attempt_timeout)
        .with_failover_backoff(self.failover_backoff);

        Ok(Orchestrator {
            registry,
            router: Arc::new(router),
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryConversationStore::new())),
            security,
            admission: self
                .admission
                .unwrap_or_else(|| Arc::new(DemoBudgetTracker::new(DemoLimits::default()))),
            engine,
            classifier: Classifier::new(),
            research: ResearchClassifier::new(),
            optimizer: self.optimizer,
            tuner: self.tuner,
            context: self.context,
            analysis_model: self.analysis_model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderKind, ScriptStep, ScriptedProvider, ScriptedProviderFactory};
    use crate::routing::RuleSetDraft;

    fn orchestrator(config: &OrchestratorConfig) -> Orchestrator {
        Orchestrator::builder(Arc::new(ScriptedProviderFactory::new()))
            .with_config(config)
            .build()
            .expect("test: build")
    }

    #[test]
    fn test_with_config_sets_threshold_and_analysis_model() {
        let mut config = OrchestratorConfig::default();
        config.security.threshold = 6;
        config.analysis.model = Some(String::new());
        let orch = orchestrator(&config);
        assert_eq!(orch.security().threshold(), 6);
        assert!(orch.analysis_provider(&ApiKeys::default()).is_none());
    }

    fn research_orchestrator(gemini: Arc<ScriptedProvider>, limits: DemoLimits) -> Orchestrator {
        Orchestrator::builder(Arc::new(ScriptedProviderFactory::new().with_kind(gemini)))
            .admission(Arc::new(DemoBudgetTracker::new(limits)))
            .build()
            .expect("test: build")
    }

    #[tokio::test]
    async fn test_research_classify_is_admitted_and_charged_for_demo_callers() {
        let gemini = Arc::new(
            ScriptedProvider::new(ProviderKind::Google, "gemini-2.5-flash")
                .with_steps([ScriptStep::reply("yes"), ScriptStep::reply("no")]),
        );
        let limits = DemoLimits {
            max_per_session: 1,
            ..DemoLimits::default()
        };
        let orch = research_orchestrator(Arc::clone(&gemini), limits);
        let demo = ConnectionContext::anonymous("s-1", "203.0.113.9");

        let verdict = orch
            .classify_research("Survey the literature on CRDTs with citations", &demo)
            .await
            .expect("test: first call admitted");
        assert!(verdict.is_research);
        assert!(verdict.model_decided);
        assert!(orch.admission().get_spent_today() > 0.0);

        let denied = orch.classify_research("And on OT?", &demo).await;
        assert!(matches!(denied, Err(AdmissionDenial::SessionLimit { .. })));
        assert_eq!(gemini.calls(), 1, "a rejected caller never reaches the model");
    }

    #[tokio::test]
    async fn test_research_classify_skips_admission_for_operators() {
        let gemini = Arc::new(ScriptedProvider::new(ProviderKind::Google, "gemini-2.5-flash"));
        let limits = DemoLimits {
            max_per_session: 1,
            ..DemoLimits::default()
        };
        let orch = research_orchestrator(Arc::clone(&gemini), limits);
        let operator = ConnectionContext::authenticated("s-1", "203.0.113.9", None);
        for _ in 0..3 {
            orch.classify_research("compare vector databases", &operator)
                .await
                .expect("test: operators are never limited");
        }
        assert_eq!(gemini.calls(), 3);
        assert_eq!(orch.admission().get_spent_today(), 0.0);
    }

    #[test]
    fn test_build_rejects_out_of_range_threshold() {
        let mut config = OrchestratorConfig::default();
        config.security.threshold = 0;
        let result = Orchestrator::builder(Arc::new(ScriptedProviderFactory::new()))
            .with_config(&config)
            .build();
        assert!(matches!(result, Err(OrchestratorError::ConfigError(_))));
    }

    #[test]
    fn test_apply_config_publishes_rule_set_once() {
        let orch = orchestrator(&OrchestratorConfig::default());
        let mut config = OrchestratorConfig::default();
        config.security.threshold = 5;
        config.router.rule_set = Some(RuleSetDraft {
            rules: vec![],
            catch_all: vec!["gpt-mini".into()],
        });

        orch.apply_config(&config).expect("test: apply");
        orch.apply_config(&config).expect("test: apply again");

        assert_eq!(orch.security().threshold(), 5);
        let history = orch.router().store().history(&RuleScope::Org);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].author.as_deref(), Some(CONFIG_AUTHOR));
    }

    #[test]
    fn test_apply_config_rejects_bad_rule_set_without_changes() {
        let orch = orchestrator(&OrchestratorConfig::default());
        let mut config = OrchestratorConfig::default();
        config.security.threshold = 3;
        config.router.rule_set = Some(RuleSetDraft {
            rules: vec![],
            catch_all: vec!["no-such-model".into()],
        });
        assert!(orch.apply_config(&config).is_err());
        assert_eq!(orch.security().threshold(), 8);
        assert!(orch.router().store().history(&RuleScope::Org).is_empty());
    }
}
