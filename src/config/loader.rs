//! Configuration file loading.
//!
//! ## Responsibility
//! Read a TOML file from disk, parse it into an [`OrchestratorConfig`], and
//! run validation before returning. This is the entry point for loading
//! service configuration at startup.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message
//!
//! ## NOT Responsible For
//! - Hot-reloading on file changes (that belongs to `watcher`)
//! - Defining the config schema (that belongs to `mod.rs`)

use std::path::Path;

use super::validation::{self, ConfigError};
use super::OrchestratorConfig;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "PROMPT_GUARD_CONFIG";

/// Load an [`OrchestratorConfig`] from a TOML file.
///
/// # Errors
///
/// - [`ConfigError::Io`] if the file cannot be read.
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - [`ConfigError::Validation`] if semantic constraints are violated.
///
/// # Example
///
/// ```rust,ignore
/// use prompt_guard_orchestrator::config::loader::load_from_file;
/// use std::path::Path;
///
/// let config = load_from_file(Path::new("prompt-guard.toml"))?;
/// println!("listening on port {}", config.server.port);
/// ```
pub fn load_from_file(path: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load an [`OrchestratorConfig`] from a TOML string.
///
/// `source_name` identifies the source in error messages.
///
/// # Errors
///
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - [`ConfigError::Validation`] if semantic constraints are violated.
pub fn load_from_str(content: &str, source_name: &str) -> Result<OrchestratorConfig, ConfigError> {
    let config: OrchestratorConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    validation::validate(&config).map_err(|errors| {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })?;

    Ok(config)
}

/// Load from `$PROMPT_GUARD_CONFIG` when set, otherwise return defaults.
///
/// # Errors
///
/// Any error from [`load_from_file`] for the configured path.
pub fn load_from_env() -> Result<OrchestratorConfig, ConfigError> {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => load_from_file(Path::new(path.trim())),
        _ => Ok(OrchestratorConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID_TOML: &str = r#"
[server]
host = "127.0.0.1"
port = 9100
operator_tokens = ["ops-token"]

[security]
threshold = 7

[demo]
max_per_session = 5
max_per_origin = 20
window_s = 1800
daily_budget_usd = 2.5

[generation]
max_quality_retries = 1
attempt_timeout_s = 30

[analysis]
model = "gemini-flash"

[analysis.presets]
tutor = "Explain like a patient tutor."

[router.rule_set]
catchAll = ["gpt-mini", "claude-haiku"]

[observability]
log_format = "json"
"#;

    #[test]
    fn test_load_from_str_valid_toml_succeeds() {
        let config = load_from_str(VALID_TOML, "test").expect("test: valid config");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.security.threshold, 7);
        assert_eq!(config.demo.max_per_session, 5);
        assert_eq!(config.generation.max_quality_retries, 1);
        assert_eq!(
            config.analysis.presets.get("tutor").map(String::as_str),
            Some("Explain like a patient tutor.")
        );
        assert_eq!(config.observability.log_format, super::super::LogFormat::Json);
    }

    #[test]
    fn test_load_from_str_empty_is_default() {
        let config = load_from_str("", "empty").expect("test: empty config");
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[test]
    fn test_load_from_str_malformed_toml_is_parse_error() {
        let err = load_from_str("[server\nport = ", "broken").expect_err("test: should fail");
        assert!(matches!(err, ConfigError::Parse { ref file, .. } if file == "broken"));
    }

    #[test]
    fn test_load_from_str_wrong_type_is_parse_error() {
        let err =
            load_from_str("[server]\nport = \"eighty\"\n", "typed").expect_err("test: should fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_from_str_invalid_values_joined_in_message() {
        let err = load_from_str("[security]\nthreshold = 0\n[server]\nport = 0\n", "bad")
            .expect_err("test: should fail");
        match err {
            ConfigError::Validation(msg) => {
                assert!(msg.contains("security.threshold"));
                assert!(msg.contains("server.port"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_load_from_file_reads_tempfile() {
        let mut file = tempfile::NamedTempFile::new().expect("test: tempfile");
        file.write_all(VALID_TOML.as_bytes()).expect("test: write");
        let config = load_from_file(file.path()).expect("test: load");
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_load_from_file_missing_is_io_error() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let err = load_from_file(&dir.path().join("absent.toml")).expect_err("test: should fail");
        match err {
            ConfigError::Io { file, .. } => assert!(file.ends_with("absent.toml")),
            other => panic!("expected io error, got {other:?}"),
        }
    }
}
