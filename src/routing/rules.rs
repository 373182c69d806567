//! Routing rules and rule sets.
//!
//! A [`RuleSet`] is an ordered list of [`RouterRule`]s plus a catch-all
//! priority list. Rules are evaluated top to bottom; the first enabled rule
//! whose conditions all hold supplies the candidate list.

use crate::analysis::Intent;
use crate::registry::ModelAliasRegistry;
use crate::routing::Complexity;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Routing and rule-set errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// A rule has no models to try.
    #[error("rule '{0}' has an empty model priority list")]
    EmptyPriorityList(String),

    /// A priority entry is neither an alias nor a member of a known family.
    #[error("rule '{rule_id}' references unknown model '{model}'")]
    UnknownModel {
        /// Offending rule (or `catch_all`).
        rule_id: String,
        /// Unresolvable entry.
        model: String,
    },

    /// Two rules share an id.
    #[error("duplicate rule id '{0}'")]
    DuplicateRuleId(String),

    /// A rule id is empty.
    #[error("rule ids must not be empty")]
    EmptyRuleId,

    /// A custom pattern does not compile.
    #[error("rule '{rule_id}' has an invalid custom pattern: {reason}")]
    InvalidPattern {
        /// Offending rule.
        rule_id: String,
        /// Compiler message.
        reason: String,
    },

    /// `min_prompt_length` exceeds `max_prompt_length`.
    #[error("rule '{0}' has min_prompt_length greater than max_prompt_length")]
    InvalidLengthRange(String),

    /// A security ceiling is outside 0–10.
    #[error("rule '{0}' has max_security_score above 10")]
    InvalidSecurityCeiling(String),

    /// The catch-all list is empty.
    #[error("catch-all priority list must not be empty")]
    EmptyCatchAll,

    /// The requested version does not exist in this scope.
    #[error("version {version} does not exist for scope {scope}")]
    UnknownVersion {
        /// Scope searched.
        scope: String,
        /// Missing version.
        version: u32,
    },

    /// Nothing was ever published in this scope.
    #[error("no rule set published for scope {0}")]
    NoRuleSet(String),

    /// The selected priority list resolved to no usable model.
    #[error("no candidate models could be resolved")]
    NoCandidates,
}

/// Conditions a request must meet for a rule to apply.
///
/// Every condition that is set must hold. Empty lists match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleConditions {
    /// Matching task types.
    pub task_types: Vec<Intent>,
    /// Matching complexity levels.
    pub complexity: Vec<Complexity>,
    /// Only apply when the security score is at or below this value.
    pub max_security_score: Option<u8>,
    /// Minimum prompt length in characters.
    pub min_prompt_length: Option<usize>,
    /// Maximum prompt length in characters.
    pub max_prompt_length: Option<usize>,
    /// Regular expression that must match somewhere in the prompt.
    pub custom_pattern: Option<String>,
}

/// One routing rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouterRule {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Disabled rules are skipped.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// When the rule applies.
    #[serde(default)]
    pub conditions: RuleConditions,
    /// Aliases or concrete ids, most preferred first.
    pub model_priority: Vec<String>,
    /// Why this rule routes the way it does.
    #[serde(default)]
    pub reasoning: String,
}

fn default_true() -> bool {
    true
}

/// Unvalidated rule set, as submitted by an operator or loaded from config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleSetDraft {
    /// Ordered rules.
    #[serde(default)]
    pub rules: Vec<RouterRule>,
    /// Used when no rule matches.
    pub catch_all: Vec<String>,
}

/// What the router knows about a request.
#[derive(Debug, Clone, Copy)]
pub struct RequestFeatures<'a> {
    /// Classified task type.
    pub task_type: Intent,
    /// Heuristic complexity.
    pub complexity: Complexity,
    /// Effective security score.
    pub security_score: u8,
    /// Prompt text, for length and custom-pattern conditions.
    pub prompt: &'a str,
}

/// Validated, compiled rule set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    rules: Vec<RouterRule>,
    catch_all: Vec<String>,
    #[serde(skip)]
    patterns: Vec<Option<Regex>>,
}

impl RuleSet {
    /// Validate `draft` against `registry` and compile its patterns.
    ///
    /// # Errors
    ///
    /// Returns the first [`RouterError`] found: empty or duplicate ids,
    /// empty priority lists, unresolvable models, bad patterns or ranges.
    pub fn compile(draft: RuleSetDraft, registry: &ModelAliasRegistry) -> Result<Self, RouterError> {
        if draft.catch_all.is_empty() {
            return Err(RouterError::EmptyCatchAll);
        }
        for model in &draft.catch_all {
            if !registry.is_routable(model) {
                return Err(RouterError::UnknownModel {
                    rule_id: "catch_all".to_string(),
                    model: model.clone(),
                });
            }
        }

        let mut seen = HashSet::new();
        let mut patterns = Vec::with_capacity(draft.rules.len());
        for rule in &draft.rules {
            if rule.id.trim().is_empty() {
                return Err(RouterError::EmptyRuleId);
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(RouterError::DuplicateRuleId(rule.id.clone()));
            }
            if rule.model_priority.is_empty() {
                return Err(RouterError::EmptyPriorityList(rule.id.clone()));
            }
            if let Some(model) = rule.model_priority.iter().find(|m| !registry.is_routable(m)) {
                return Err(RouterError::UnknownModel {
                    rule_id: rule.id.clone(),
                    model: model.clone(),
                });
            }
            let c = &rule.conditions;
            if let (Some(min), Some(max)) = (c.min_prompt_length, c.max_prompt_length) {
                if min > max {
                    return Err(RouterError::InvalidLengthRange(rule.id.clone()));
                }
            }
            if c.max_security_score.is_some_and(|s| s > 10) {
                return Err(RouterError::InvalidSecurityCeiling(rule.id.clone()));
            }
            let pattern = match &c.custom_pattern {
                Some(p) => Some(Regex::new(p).map_err(|e| RouterError::InvalidPattern {
                    rule_id: rule.id.clone(),
                    reason: e.to_string(),
                })?),
                None => None,
            };
            patterns.push(pattern);
        }

        Ok(Self {
            rules: draft.rules,
            catch_all: draft.catch_all,
            patterns,
        })
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[RouterRule] {
        &self.rules
    }

    /// Catch-all priority list.
    pub fn catch_all(&self) -> &[String] {
        &self.catch_all
    }

    /// Back to an editable draft.
    pub fn to_draft(&self) -> RuleSetDraft {
        RuleSetDraft {
            rules: self.rules.clone(),
            catch_all: self.catch_all.clone(),
        }
    }

    /// First enabled rule whose conditions all hold.
    pub fn first_match(&self, features: &RequestFeatures<'_>) -> Option<&RouterRule> {
        self.rules
            .iter()
            .zip(&self.patterns)
            .find(|(rule, pattern)| rule.enabled && conditions_hold(rule, pattern.as_ref(), features))
            .map(|(rule, _)| rule)
    }
}

fn conditions_hold(rule: &RouterRule, pattern: Option<&Regex>, f: &RequestFeatures<'_>) -> bool {
    let c = &rule.conditions;
    let length = f.prompt.chars().count();
    (c.task_types.is_empty() || c.task_types.contains(&f.task_type))
        && (c.complexity.is_empty() || c.complexity.contains(&f.complexity))
        && c.max_security_score.map_or(true, |max| f.security_score <= max)
        && c.min_prompt_length.map_or(true, |min| length >= min)
        && c.max_prompt_length.map_or(true, |max| length <= max)
        && pattern.map_or(true, |re| re.is_match(f.prompt))
}

impl RuleSetDraft {
    /// Rules shipped with the service.
    pub fn builtin() -> Self {
        fn rule(
            id: &str,
            name: &str,
            conditions: RuleConditions,
            models: &[&str],
            reasoning: &str,
        ) -> RouterRule {
            RouterRule {
                id: id.to_string(),
                name: name.to_string(),
                enabled: true,
                conditions,
                model_priority: models.iter().map(|m| m.to_string()).collect(),
                reasoning: reasoning.to_string(),
            }
        }

        Self {
            rules: vec![
                rule(
                    "complex-coding",
                    "Complex coding",
                    RuleConditions {
                        task_types: vec![Intent::Coding],
                        complexity: vec![Complexity::Complex],
                        ..RuleConditions::default()
                    },
                    &["claude-opus", "gpt-pro", "gemini-pro"],
                    "Large or multi-part coding work benefits from the strongest reasoning model.",
                ),
                rule(
                    "coding",
                    "Coding",
                    RuleConditions {
                        task_types: vec![Intent::Coding],
                        ..RuleConditions::default()
                    },
                    &["claude-sonnet", "gpt-pro", "gemini-pro"],
                    "Everyday coding requests go to a strong, fast coding model.",
                ),
                rule(
                    "research",
                    "Research",
                    RuleConditions {
                        task_types: vec![Intent::Research, Intent::Analytical],
                        ..RuleConditions::default()
                    },
                    &["gemini-pro", "gpt-pro", "claude-sonnet"],
                    "Research and analysis favour long context and broad knowledge.",
                ),
                rule(
                    "creative",
                    "Creative writing",
                    RuleConditions {
                        task_types: vec![Intent::Creative],
                        ..RuleConditions::default()
                    },
                    &["claude-sonnet", "gpt-pro", "gemini-flash"],
                    "Creative writing favours models with a natural voice.",
                ),
                rule(
                    "quick-answers",
                    "Quick answers",
                    RuleConditions {
                        complexity: vec![Complexity::Simple],
                        max_security_score: Some(3),
                        max_prompt_length: Some(500),
                        ..RuleConditions::default()
                    },
                    &["gemini-flash", "gpt-mini", "claude-haiku"],
                    "Short, low-risk questions are answered fastest and cheapest by a small model.",
                ),
            ],
            catch_all: vec![
                "gpt-pro".to_string(),
                "claude-sonnet".to_string(),
                "gemini-pro".to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ModelAliasRegistry {
        ModelAliasRegistry::with_builtin_families().expect("built-ins compile")
    }

    fn features(prompt: &str, intent: Intent, complexity: Complexity) -> RequestFeatures<'_> {
        RequestFeatures {
            task_type: intent,
            complexity,
            security_score: 0,
            prompt,
        }
    }

    #[test]
    fn test_builtin_rules_compile() {
        assert!(RuleSet::compile(RuleSetDraft::builtin(), &registry()).is_ok());
    }

    #[test]
    fn test_first_match_respects_order_and_enabled() {
        let reg = registry();
        let mut draft = RuleSetDraft::builtin();
        let set = RuleSet::compile(draft.clone(), &reg).expect("valid");
        let f = features("refactor my service", Intent::Coding, Complexity::Complex);
        assert_eq!(set.first_match(&f).map(|r| r.id.as_str()), Some("complex-coding"));

        draft.rules[0].enabled = false;
        let set = RuleSet::compile(draft, &reg).expect("valid");
        assert_eq!(set.first_match(&f).map(|r| r.id.as_str()), Some("coding"));
    }

    #[test]
    fn test_no_match_falls_through() {
        let set = RuleSet::compile(RuleSetDraft::builtin(), &registry()).expect("valid");
        let long_prompt = "x".repeat(800);
        let f = features(&long_prompt, Intent::Other, Complexity::Moderate);
        assert!(set.first_match(&f).is_none());
    }

    #[test]
    fn test_security_ceiling_excludes_risky_prompts() {
        let set = RuleSet::compile(RuleSetDraft::builtin(), &registry()).expect("valid");
        let mut f = features("what is 2+2", Intent::Factual, Complexity::Simple);
        assert_eq!(set.first_match(&f).map(|r| r.id.as_str()), Some("quick-answers"));
        f.security_score = 5;
        assert!(set.first_match(&f).is_none());
    }

    #[test]
    fn test_custom_pattern_condition() {
        let draft = RuleSetDraft {
            rules: vec![RouterRule {
                id: "sql".into(),
                name: "SQL".into(),
                enabled: true,
                conditions: RuleConditions {
                    custom_pattern: Some(r"(?i)\bselect\b.+\bfrom\b".into()),
                    ..RuleConditions::default()
                },
                model_priority: vec!["gpt-pro".into()],
                reasoning: String::new(),
            }],
            catch_all: vec!["gemini-flash".into()],
        };
        let set = RuleSet::compile(draft, &registry()).expect("valid");
        let hit = features("SELECT id FROM users", Intent::Coding, Complexity::Simple);
        let miss = features("select a colour", Intent::Other, Complexity::Simple);
        assert!(set.first_match(&hit).is_some());
        assert!(set.first_match(&miss).is_none());
    }

    #[test]
    fn test_compile_rejects_bad_drafts() {
        let reg = registry();
        let mut draft = RuleSetDraft::builtin();
        draft.rules[1].model_priority = vec!["no-such-model".into()];
        assert!(matches!(
            RuleSet::compile(draft, &reg),
            Err(RouterError::UnknownModel { .. })
        ));

        let mut draft = RuleSetDraft::builtin();
        draft.rules[1].id = draft.rules[0].id.clone();
        assert!(matches!(
            RuleSet::compile(draft, &reg),
            Err(RouterError::DuplicateRuleId(_))
        ));

        let mut draft = RuleSetDraft::builtin();
        draft.catch_all.clear();
        assert_eq!(RuleSet::compile(draft, &reg).err(), Some(RouterError::EmptyCatchAll));

        let mut draft = RuleSetDraft::builtin();
        draft.rules[0].conditions.custom_pattern = Some("(".into());
        assert!(matches!(
            RuleSet::compile(draft, &reg),
            Err(RouterError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_concrete_model_ids_are_routable() {
        let mut draft = RuleSetDraft::builtin();
        draft.rules[0].model_priority = vec!["claude-opus-5".into(), "gpt-pro".into()];
        assert!(RuleSet::compile(draft, &registry()).is_ok());
    }
}
