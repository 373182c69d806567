//! Model routing logic.
//!
//! The [`ModelRouter`] picks the rule set for a request (the user's
//! override if one is published, else the organisation's), finds the first
//! matching rule, and resolves its priority list through the
//! [`ModelAliasRegistry`] into an ordered candidate list.

use super::rules::{RequestFeatures, RouterError, RuleSet, RuleSetDraft};
use super::store::{RuleScope, RuleSetStore};
use crate::provider::ProviderKind;
use crate::registry::ModelAliasRegistry;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// One model the generation engine may try.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Family alias.
    pub alias: String,
    /// Concrete model id at the time of routing.
    pub model_id: String,
    /// Provider serving the model.
    pub provider: ProviderKind,
}

/// The routing decision for a single request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    /// Matched rule, or `None` when the catch-all applied.
    pub rule_id: Option<String>,
    /// Human-readable rule name.
    pub rule_name: String,
    /// Why these models were chosen.
    pub reasoning: String,
    /// Scope whose rule set was used.
    pub scope: RuleScope,
    /// Version of that rule set, or `None` for the built-in fallback.
    pub version: Option<u32>,
    /// Ordered, de-duplicated candidates. Never empty.
    pub candidates: Vec<Candidate>,
}

impl RoutingDecision {
    /// First candidate.
    pub fn primary(&self) -> Option<&Candidate> {
        self.candidates.first()
    }
}

/// Rule-based model router.
///
/// Thread-safe: the store and registry use interior locking.
///
/// # Panics
///
/// This type and its methods never panic.
pub struct ModelRouter {
    registry: Arc<ModelAliasRegistry>,
    store: Arc<RuleSetStore>,
    fallback: RuleSet,
}

impl std::fmt::Debug for ModelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRouter")
            .field("fallback_rules", &self.fallback.rules().len())
            .finish()
    }
}

impl ModelRouter {
    /// Create a router. The built-in rules are used until an organisation
    /// rule set is published.
    ///
    /// # Errors
    ///
    /// Fails only if the built-in rules do not resolve against `registry`.
    pub fn new(
        registry: Arc<ModelAliasRegistry>,
        store: Arc<RuleSetStore>,
    ) -> Result<Self, RouterError> {
        let fallback = RuleSet::compile(RuleSetDraft::builtin(), &registry)?;
        Ok(Self {
            registry,
            store,
            fallback,
        })
    }

    /// Rule-set store backing this router.
    pub fn store(&self) -> &Arc<RuleSetStore> {
        &self.store
    }

    /// Registry used to resolve candidates.
    pub fn registry(&self) -> &Arc<ModelAliasRegistry> {
        &self.registry
    }

    /// Choose the ordered candidate list for a request.
    ///
    /// # Errors
    ///
    /// [`RouterError::NoCandidates`] if the selected list resolves to no
    /// known model (possible only if the registry changed underneath a
    /// published rule set).
    pub fn select_candidates(
        &self,
        features: &RequestFeatures<'_>,
        user_id: Option<&str>,
    ) -> Result<RoutingDecision, RouterError> {
        let user_scope = RuleScope::for_user(user_id);
        let published = match &user_scope {
            RuleScope::User(_) => self
                .store
                .current(&user_scope)
                .or_else(|| self.store.current(&RuleScope::Org)),
            RuleScope::Org => self.store.current(&RuleScope::Org),
        };
        let (rule_set, scope, version) = match &published {
            Some(v) => (&v.rule_set, v.scope.clone(), Some(v.version)),
            None => (&self.fallback, RuleScope::Org, None),
        };

        let (rule_id, rule_name, reasoning, priority) = match rule_set.first_match(features) {
            Some(rule) => (
                Some(rule.id.clone()),
                rule.name.clone(),
                rule.reasoning.clone(),
                rule.model_priority.as_slice(),
            ),
            None => (
                None,
                "Catch-all".to_string(),
                "No rule matched; using the default model order.".to_string(),
                rule_set.catch_all(),
            ),
        };

        let candidates = self.resolve_candidates(priority);
        let Some(primary) = candidates.first() else {
            return Err(RouterError::NoCandidates);
        };
        let reasoning = match self.registry.family(&primary.alias) {
            Some(family) if !family.strengths.is_empty() => format!(
                "{} {} is strong at {}.",
                reasoning.trim(),
                primary.alias,
                family.strengths.join(", ")
            )
            .trim()
            .to_string(),
            _ => reasoning,
        };

        debug!(
            scope = %scope,
            version = ?version,
            rule = rule_id.as_deref().unwrap_or("catch_all"),
            primary = %primary.model_id,
            candidates = candidates.len(),
            "router: candidates selected"
        );

        Ok(RoutingDecision {
            rule_id,
            rule_name,
            reasoning,
            scope,
            version,
            candidates,
        })
    }

    fn resolve_candidates(&self, priority: &[String]) -> Vec<Candidate> {
        let mut out: Vec<Candidate> = Vec::with_capacity(priority.len());
        for entry in priority {
            let Some(family) = self.registry.family_of(entry) else {
                continue;
            };
            let model_id = self.registry.resolve(entry);
            if out.iter().any(|c| c.model_id == model_id) {
                continue;
            }
            out.push(Candidate {
                alias: family.alias.clone(),
                model_id,
                provider: family.provider,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Intent;
    use crate::routing::rules::{RouterRule, RuleConditions};
    use crate::routing::Complexity;

    fn router() -> ModelRouter {
        let registry = Arc::new(ModelAliasRegistry::with_builtin_families().expect("compile"));
        ModelRouter::new(registry, Arc::new(RuleSetStore::new())).expect("builtins resolve")
    }

    fn coding() -> RequestFeatures<'static> {
        RequestFeatures {
            task_type: Intent::Coding,
            complexity: Complexity::Moderate,
            security_score: 0,
            prompt: "write a parser",
        }
    }

    #[test]
    fn test_builtin_fallback_when_nothing_published() {
        let decision = router().select_candidates(&coding(), None).expect("routes");
        assert_eq!(decision.rule_id.as_deref(), Some("coding"));
        assert_eq!(decision.version, None);
        let ids: Vec<&str> = decision.candidates.iter().map(|c| c.alias.as_str()).collect();
        assert_eq!(ids, vec!["claude-sonnet", "gpt-pro", "gemini-pro"]);
        assert!(decision.reasoning.contains("claude-sonnet is strong at"));
    }

    #[test]
    fn test_candidates_follow_registry_updates() {
        let router = router();
        router
            .registry()
            .update("claude-sonnet", "claude-sonnet-5")
            .expect("valid update");
        let decision = router.select_candidates(&coding(), None).expect("routes");
        assert_eq!(
            decision.primary().map(|c| c.model_id.as_str()),
            Some("claude-sonnet-5")
        );
    }

    #[test]
    fn test_user_override_wins_over_org() {
        let router = router();
        let reg = Arc::clone(router.registry());
        let _ = router
            .store()
            .publish(RuleScope::Org, RuleSetDraft::builtin(), None, &reg);
        let user_draft = RuleSetDraft {
            rules: vec![RouterRule {
                id: "mine".into(),
                name: "Mine".into(),
                enabled: true,
                conditions: RuleConditions::default(),
                model_priority: vec!["gemini-flash".into()],
                reasoning: "I like it.".into(),
            }],
            catch_all: vec!["gemini-flash".into()],
        };
        let _ = router
            .store()
            .publish(RuleScope::User("u1".into()), user_draft, None, &reg);

        let mine = router.select_candidates(&coding(), Some("u1")).expect("routes");
        assert_eq!(mine.rule_id.as_deref(), Some("mine"));
        assert_eq!(mine.scope, RuleScope::User("u1".into()));

        let other = router.select_candidates(&coding(), Some("u2")).expect("routes");
        assert_eq!(other.scope, RuleScope::Org);
        assert_eq!(other.version, Some(1));
    }

    #[test]
    fn test_catch_all_and_dedup() {
        let router = router();
        let reg = Arc::clone(router.registry());
        let draft = RuleSetDraft {
            rules: Vec::new(),
            catch_all: vec![
                "gpt-pro".into(),
                "gpt-5".into(),
                "claude-haiku".into(),
            ],
        };
        let _ = router.store().publish(RuleScope::Org, draft, None, &reg);
        let decision = router.select_candidates(&coding(), None).expect("routes");
        assert_eq!(decision.rule_id, None);
        assert_eq!(decision.candidates.len(), 2, "gpt-pro resolves to gpt-5");
    }
}
