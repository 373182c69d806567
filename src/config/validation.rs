//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`OrchestratorConfig`] that
//! cannot be expressed through the type system alone (range checks, alias
//! resolution, rule-set compilation).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use super::{OrchestratorConfig, MAX_WINDOW_S};
use crate::registry::ModelAliasRegistry;
use crate::routing::RuleSet;

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "security.threshold").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Validate `config` against the built-in model families.
///
/// # Errors
///
/// Every violation found, in field order.
pub fn validate(config: &OrchestratorConfig) -> Result<(), Vec<ConfigError>> {
    match ModelAliasRegistry::with_builtin_families() {
        Ok(registry) => validate_with_registry(config, &registry),
        Err(e) => Err(vec![ConfigError::Validation(e.to_string())]),
    }
}

/// Validate `config`, resolving model aliases through `registry`.
///
/// # Errors
///
/// Every violation found, in field order.
pub fn validate_with_registry(
    config: &OrchestratorConfig,
    registry: &ModelAliasRegistry,
) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Server ───────────────────────────────────────────────────────
    if config.server.port == 0 {
        errors.push(invalid("server.port", 0, "must be non-zero"));
    }
    if config.server.host.trim().is_empty() {
        errors.push(invalid("server.host", "\"\"", "must not be empty"));
    }
    if config.server.max_message_bytes < 1024 {
        errors.push(invalid(
            "server.max_message_bytes",
            config.server.max_message_bytes,
            "must be at least 1024",
        ));
    }
    if config.server.ping_interval_s == 0 {
        errors.push(invalid("server.ping_interval_s", 0, "must be at least 1 second"));
    }
    if config
        .server
        .operator_tokens
        .iter()
        .any(|t| t.trim().is_empty())
    {
        errors.push(invalid(
            "server.operator_tokens",
            "\"\"",
            "tokens must not be empty",
        ));
    }

    // ── Security ─────────────────────────────────────────────────────
    if !(1..=10).contains(&config.security.threshold) {
        errors.push(invalid(
            "security.threshold",
            config.security.threshold,
            "must be between 1 and 10",
        ));
    }

    // ── Demo admission ───────────────────────────────────────────────
    if config.demo.window_s == 0 || config.demo.window_s > MAX_WINDOW_S {
        errors.push(invalid(
            "demo.window_s",
            config.demo.window_s,
            "must be between 1 second and one week",
        ));
    }
    if !config.demo.daily_budget_usd.is_finite() || config.demo.daily_budget_usd < 0.0 {
        errors.push(invalid(
            "demo.daily_budget_usd",
            config.demo.daily_budget_usd,
            "must be a non-negative amount",
        ));
    }
    if config.demo.max_per_session > config.demo.max_per_origin {
        errors.push(invalid(
            "demo.max_per_session",
            config.demo.max_per_session,
            "must be \u{2264} max_per_origin",
        ));
    }

    // ── Generation ───────────────────────────────────────────────────
    let generation = &config.generation;
    if generation.max_quality_retries == 0 {
        errors.push(invalid(
            "generation.max_quality_retries",
            0,
            "must be at least 1",
        ));
    }
    if generation.attempt_timeout_s == 0 {
        errors.push(invalid(
            "generation.attempt_timeout_s",
            0,
            "must be at least 1 second",
        ));
    }
    if generation.max_tokens_cap < 64 {
        errors.push(invalid(
            "generation.max_tokens_cap",
            generation.max_tokens_cap,
            "must be at least 64",
        ));
    }
    if generation.breaker_failure_threshold == 0 {
        errors.push(invalid(
            "generation.breaker_failure_threshold",
            0,
            "must be at least 1",
        ));
    }
    if !(0.0..=1.0).contains(&generation.breaker_success_rate) {
        errors.push(invalid(
            "generation.breaker_success_rate",
            generation.breaker_success_rate,
            "must be between 0.0 and 1.0",
        ));
    }
    if generation.breaker_cooldown_s == 0 {
        errors.push(invalid(
            "generation.breaker_cooldown_s",
            0,
            "must be at least 1 second",
        ));
    }

    // ── Analysis ─────────────────────────────────────────────────────
    if let Some(alias) = config.analysis.model_alias() {
        if registry.family_of(&alias).is_none() {
            errors.push(invalid(
                "analysis.model",
                &alias,
                "is not a known model alias or family member",
            ));
        }
    }
    if config.analysis.base_prompt.trim().is_empty() {
        errors.push(invalid("analysis.base_prompt", "\"\"", "must not be empty"));
    }

    // ── Router ───────────────────────────────────────────────────────
    if let Some(draft) = &config.router.rule_set {
        if let Err(e) = RuleSet::compile(draft.clone(), registry) {
            errors.push(invalid("router.rule_set", "<rule set>", &e.to_string()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{RouterRule, RuleConditions, RuleSetDraft};

    fn field_errors(config: &OrchestratorConfig, field: &str) -> usize {
        validate(config)
            .err()
            .unwrap_or_default()
            .iter()
            .filter(|e| matches!(e, ConfigError::InvalidField { field: f, .. } if f == field))
            .count()
    }

    #[test]
    fn test_validate_default_config_passes() {
        assert!(validate(&OrchestratorConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = OrchestratorConfig::default();
        config.server.port = 0;
        assert_eq!(field_errors(&config, "server.port"), 1);
    }

    #[test]
    fn test_validate_empty_operator_token_fails() {
        let mut config = OrchestratorConfig::default();
        config.server.operator_tokens = vec!["ok".into(), " ".into()];
        assert_eq!(field_errors(&config, "server.operator_tokens"), 1);
    }

    #[test]
    fn test_validate_small_message_cap_fails() {
        let mut config = OrchestratorConfig::default();
        config.server.max_message_bytes = 10;
        assert_eq!(field_errors(&config, "server.max_message_bytes"), 1);
    }

    #[test]
    fn test_validate_threshold_bounds() {
        for bad in [0u8, 11] {
            let mut config = OrchestratorConfig::default();
            config.security.threshold = bad;
            assert_eq!(field_errors(&config, "security.threshold"), 1, "threshold {bad}");
        }
        for good in [1u8, 10] {
            let mut config = OrchestratorConfig::default();
            config.security.threshold = good;
            assert!(validate(&config).is_ok(), "threshold {good}");
        }
    }

    #[test]
    fn test_validate_zero_window_fails() {
        let mut config = OrchestratorConfig::default();
        config.demo.window_s = 0;
        assert_eq!(field_errors(&config, "demo.window_s"), 1);
    }

    #[test]
    fn test_validate_negative_budget_fails() {
        let mut config = OrchestratorConfig::default();
        config.demo.daily_budget_usd = -1.0;
        assert_eq!(field_errors(&config, "demo.daily_budget_usd"), 1);
    }

    #[test]
    fn test_validate_zero_budget_passes() {
        let mut config = OrchestratorConfig::default();
        config.demo.daily_budget_usd = 0.0;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_validate_session_limit_above_origin_limit_fails() {
        let mut config = OrchestratorConfig::default();
        config.demo.max_per_session = 50;
        assert_eq!(field_errors(&config, "demo.max_per_session"), 1);
    }

    #[test]
    fn test_validate_zero_quality_retries_fails() {
        let mut config = OrchestratorConfig::default();
        config.generation.max_quality_retries = 0;
        assert_eq!(field_errors(&config, "generation.max_quality_retries"), 1);
    }

    #[test]
    fn test_validate_breaker_settings() {
        let mut config = OrchestratorConfig::default();
        config.generation.breaker_failure_threshold = 0;
        config.generation.breaker_success_rate = 1.5;
        config.generation.breaker_cooldown_s = 0;
        assert_eq!(field_errors(&config, "generation.breaker_failure_threshold"), 1);
        assert_eq!(field_errors(&config, "generation.breaker_success_rate"), 1);
        assert_eq!(field_errors(&config, "generation.breaker_cooldown_s"), 1);
    }

    #[test]
    fn test_validate_unknown_analysis_model_fails() {
        let mut config = OrchestratorConfig::default();
        config.analysis.model = Some("mystery-model".into());
        assert_eq!(field_errors(&config, "analysis.model"), 1);
    }

    #[test]
    fn test_validate_unresolvable_router_alias_fails() {
        let mut config = OrchestratorConfig::default();
        config.router.rule_set = Some(RuleSetDraft {
            rules: vec![RouterRule {
                id: "r1".into(),
                name: "bad".into(),
                enabled: true,
                conditions: RuleConditions::default(),
                model_priority: vec!["not-a-model".into()],
                reasoning: String::new(),
            }],
            catch_all: vec!["gpt-pro".into()],
        });
        assert_eq!(field_errors(&config, "router.rule_set"), 1);
    }

    #[test]
    fn test_validate_resolvable_router_passes() {
        let mut config = OrchestratorConfig::default();
        config.router.rule_set = Some(RuleSetDraft {
            rules: vec![],
            catch_all: vec!["claude-sonnet".into(), "gpt-mini".into()],
        });
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = OrchestratorConfig::default();
        config.server.port = 0;
        config.security.threshold = 42;
        config.demo.window_s = 0;
        config.generation.max_quality_retries = 0;
        let errors = validate(&config).expect_err("test: should fail");
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_error_display_includes_field_and_value() {
        let mut config = OrchestratorConfig::default();
        config.security.threshold = 42;
        let errors = validate(&config).expect_err("test: should fail");
        let text = errors[0].to_string();
        assert!(text.contains("security.threshold"));
        assert!(text.contains("42"));
    }
}
