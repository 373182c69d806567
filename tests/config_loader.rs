//! Config files from disk through validation into a running orchestrator.

use std::io::Write;
use std::sync::Arc;

use prompt_guard_orchestrator::analysis::Intent;
use prompt_guard_orchestrator::config::{loader, ConfigError};
use prompt_guard_orchestrator::provider::ScriptedProviderFactory;
use prompt_guard_orchestrator::routing::{Complexity, RequestFeatures};
use prompt_guard_orchestrator::{LogFormat, Orchestrator, OrchestratorConfig, RuleScope};

const FULL_TOML: &str = r#"
[server]
host = "127.0.0.1"
port = 9100
operator_tokens = ["ops-token"]
allowed_origins = ["https://demo.example.org"]

[security]
threshold = 6

[demo]
max_per_session = 3
max_per_origin = 9
window_s = 600
daily_budget_usd = 1.5

[generation]
max_quality_retries = 1
attempt_timeout_s = 20

[analysis]
model = ""

[analysis.presets]
concise = "Answer in two sentences at most."

[router.rule_set]
catchAll = ["claude-sonnet", "gpt-pro"]

[[router.rule_set.rules]]
id = "code"
name = "Code to GPT"
modelPriority = ["gpt-pro"]
reasoning = "Coding requests."

[router.rule_set.rules.conditions]
taskTypes = ["coding"]

[observability]
log_format = "json"
"#;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("test: temp file");
    file.write_all(content.as_bytes()).expect("test: write");
    file.flush().expect("test: flush");
    file
}

#[test]
fn test_full_file_loads_every_section() {
    let file = write_config(FULL_TOML);
    let config = loader::load_from_file(file.path()).expect("test: load");

    assert_eq!(config.server.port, 9100);
    assert_eq!(config.server.operator_tokens, vec!["ops-token".to_string()]);
    assert_eq!(config.security.threshold, 6);
    assert_eq!(config.demo.limits().max_per_session, 3);
    assert_eq!(config.demo.limits().window, chrono::Duration::seconds(600));
    assert_eq!(config.generation.max_quality_retries, 1);
    assert_eq!(config.analysis.model_alias(), None);
    assert_eq!(config.observability.log_format, LogFormat::Json);

    let draft = config.router.rule_set.as_ref().expect("test: rule set");
    assert_eq!(draft.rules.len(), 1);
    assert_eq!(draft.rules[0].conditions.task_types, vec![Intent::Coding]);
    assert_eq!(draft.catch_all, vec!["claude-sonnet", "gpt-pro"]);
}

#[test]
fn test_every_violation_is_reported_together() {
    let file = write_config(
        r#"
[server]
port = 0

[security]
threshold = 11

[demo]
max_per_session = 50
max_per_origin = 5
"#,
    );
    let err = loader::load_from_file(file.path()).expect_err("test: invalid config");
    let ConfigError::Validation(message) = err else {
        panic!("expected a validation error, got {err:?}");
    };
    assert!(message.contains("server.port"));
    assert!(message.contains("security.threshold"));
    assert!(message.contains("demo.max_per_session"));
    assert_eq!(message.lines().count(), 3);
}

#[test]
fn test_rule_set_with_unknown_model_is_rejected() {
    let file = write_config(
        r#"
[router.rule_set]
catchAll = ["no-such-model"]
"#,
    );
    let err = loader::load_from_file(file.path()).expect_err("test: unknown model");
    assert!(err.to_string().contains("no-such-model"));
}

#[test]
fn test_unknown_analysis_model_is_rejected() {
    let file = write_config("[analysis]\nmodel = \"made-up-alias\"\n");
    let err = loader::load_from_file(file.path()).expect_err("test: unknown alias");
    assert!(err.to_string().contains("analysis.model"));
}

#[test]
fn test_malformed_toml_names_the_file() {
    let file = write_config("[security\nthreshold = 8");
    let err = loader::load_from_file(file.path()).expect_err("test: parse error");
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err
        .to_string()
        .contains(&file.path().display().to_string()));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let err = loader::load_from_file(&dir.path().join("absent.toml"))
        .expect_err("test: missing file");
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[tokio::test]
async fn test_loaded_config_drives_orchestrator() {
    let file = write_config(FULL_TOML);
    let config = loader::load_from_file(file.path()).expect("test: load");

    let orch = Orchestrator::builder(Arc::new(ScriptedProviderFactory::new()))
        .with_config(&config)
        .build()
        .expect("test: build");
    orch.apply_config(&config).expect("test: apply");

    assert_eq!(orch.security().threshold(), 6);
    assert_eq!(orch.admission().limits().max_per_session, 3);

    let published = orch
        .router()
        .store()
        .current(&RuleScope::Org)
        .expect("test: org rule set published");
    assert_eq!(published.version, 1);
    assert_eq!(published.author.as_deref(), Some("config"));

    let coding = RequestFeatures {
        task_type: Intent::Coding,
        complexity: Complexity::Moderate,
        security_score: 1,
        prompt: "Write a function that reverses a string",
    };
    let decision = orch
        .router()
        .select_candidates(&coding, None)
        .expect("test: route");
    assert_eq!(decision.rule_id.as_deref(), Some("code"));
    assert_eq!(decision.candidates[0].alias, "gpt-pro");

    let factual = RequestFeatures {
        task_type: Intent::Factual,
        ..coding
    };
    let decision = orch
        .router()
        .select_candidates(&factual, None)
        .expect("test: route");
    assert_eq!(decision.rule_id, None);
    assert_eq!(decision.candidates[0].alias, "claude-sonnet");
}

#[test]
fn test_defaults_survive_a_toml_round_trip() {
    let text = toml::to_string(&OrchestratorConfig::default()).expect("test: serialize");
    let back = loader::load_from_str(&text, "roundtrip").expect("test: reload");
    assert_eq!(back, OrchestratorConfig::default());
}
