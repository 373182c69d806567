//! # Stage: Declarative Service Configuration
//!
//! ## Responsibility
//! Parse, validate, and hot-reload the TOML file that configures the
//! orchestrator service:
//! ```text
//! PROMPT_GUARD_CONFIG=prompt-guard.toml prompt-guard
//! ```
//!
//! ## Guarantees
//! - Every field has a documented default; an empty file is a valid config
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Hot-reloadable: file changes are detected and validated before applying
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Wiring the config into running services (that belongs to the binary)
//! - Validating rule-set semantics beyond alias resolution (that belongs to `routing`)

pub mod loader;
pub mod validation;
pub mod watcher;

use crate::admission::DemoLimits;
use crate::analysis::{SystemContextBuilder, DEFAULT_BASE_PROMPT};
use crate::enhanced::ProviderBreakers;
use crate::routing::RuleSetDraft;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use validation::ConfigError;

// ── Default value functions ──────────────────────────────────────────────

/// Default bind address: all interfaces.
fn default_host() -> String {
    "0.0.0.0".to_string()
}

/// Default listen port: 8080.
fn default_port() -> u16 {
    8080
}

/// Default inbound WebSocket message cap: 1 MiB.
fn default_max_message_bytes() -> usize {
    1024 * 1024
}

/// Default WebSocket keep-alive ping: 30 seconds.
fn default_ping_interval_s() -> u64 {
    30
}

/// Default security halt threshold: 8.
fn default_threshold() -> u8 {
    8
}

fn default_max_per_session() -> usize {
    10
}

fn default_max_per_origin() -> usize {
    30
}

/// Default admission window: one hour.
fn default_window_s() -> u64 {
    3600
}

/// Longest admission window accepted: one week.
pub const MAX_WINDOW_S: u64 = 7 * 24 * 3600;

/// Default daily demo budget: $5.
fn default_daily_budget_usd() -> f64 {
    5.0
}

/// Default admission sweep interval: 5 minutes.
fn default_sweep_interval_s() -> u64 {
    300
}

fn default_max_quality_retries() -> usize {
    2
}

/// Default per-attempt generation deadline: 90 seconds.
fn default_attempt_timeout_s() -> u64 {
    90
}

fn default_max_tokens_cap() -> u32 {
    4096
}

fn default_breaker_failure_threshold() -> usize {
    5
}

fn default_breaker_success_rate() -> f64 {
    0.5
}

fn default_breaker_cooldown_s() -> u64 {
    30
}

fn default_analysis_model() -> Option<String> {
    Some(crate::orchestrator::DEFAULT_ANALYSIS_MODEL.to_string())
}

fn default_base_prompt() -> String {
    DEFAULT_BASE_PROMPT.to_string()
}

/// Default discovery interval: once a day.
fn default_discovery_interval_s() -> u64 {
    86_400
}

fn default_true() -> bool {
    true
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for an orchestrator service.
///
/// # Example
///
/// ```toml
/// [server]
/// port = 9000
/// operator_tokens = ["s3cret"]
///
/// [security]
/// threshold = 7
///
/// [router.rule_set]
/// catchAll = ["claude-sonnet", "gpt-pro"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// HTTP and WebSocket listener.
    pub server: ServerConfig,
    /// Security screening.
    pub security: SecurityConfig,
    /// Demo admission limits for unauthenticated callers.
    pub demo: DemoConfig,
    /// Generation, failover and breaker settings.
    pub generation: GenerationConfig,
    /// Analysis model and system-context settings.
    pub analysis: AnalysisConfig,
    /// Organisation rule set published at startup and on reload.
    pub router: RouterConfig,
    /// Background model discovery.
    pub discovery: DiscoveryConfig,
    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

// ── Server ───────────────────────────────────────────────────────────────

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port. Must be non-zero.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer tokens accepted on operator endpoints and marking WebSocket
    /// callers as authenticated. Empty disables operator endpoints.
    #[serde(default)]
    pub operator_tokens: Vec<String>,
    /// Largest inbound WebSocket message accepted, in bytes.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Interval between keep-alive pings.
    #[serde(default = "default_ping_interval_s")]
    pub ping_interval_s: u64,
    /// CORS origins. Empty allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            operator_tokens: Vec::new(),
            max_message_bytes: default_max_message_bytes(),
            ping_interval_s: default_ping_interval_s(),
            allowed_origins: Vec::new(),
        }
    }
}

// ── Security ─────────────────────────────────────────────────────────────

/// Security screening configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct SecurityConfig {
    /// Scores at or above this halt the job. Range 1..=10.
    #[serde(default = "default_threshold")]
    pub threshold: u8,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

// ── Demo admission ───────────────────────────────────────────────────────

/// Demo allowance for unauthenticated callers.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct DemoConfig {
    /// Requests per session per window.
    #[serde(default = "default_max_per_session")]
    pub max_per_session: usize,
    /// Requests per client origin per window.
    #[serde(default = "default_max_per_origin")]
    pub max_per_origin: usize,
    /// Sliding window length in seconds. Must be positive.
    #[serde(default = "default_window_s")]
    pub window_s: u64,
    /// Global spend ceiling per UTC day, in US dollars.
    #[serde(default = "default_daily_budget_usd")]
    pub daily_budget_usd: f64,
    /// How often expired counters are swept.
    #[serde(default = "default_sweep_interval_s")]
    pub sweep_interval_s: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            max_per_session: default_max_per_session(),
            max_per_origin: default_max_per_origin(),
            window_s: default_window_s(),
            daily_budget_usd: default_daily_budget_usd(),
            sweep_interval_s: default_sweep_interval_s(),
        }
    }
}

impl DemoConfig {
    /// Limits for [`crate::admission::DemoBudgetTracker`].
    pub fn limits(&self) -> DemoLimits {
        let window_s = i64::try_from(self.window_s.min(MAX_WINDOW_S)).unwrap_or(0);
        DemoLimits {
            max_per_session: self.max_per_session,
            max_per_origin: self.max_per_origin,
            window: chrono::Duration::seconds(window_s),
            daily_budget_usd: self.daily_budget_usd,
        }
    }

    /// Sweep interval as a [`Duration`], never shorter than one second.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_s.max(1))
    }
}

// ── Generation ───────────────────────────────────────────────────────────

/// Generation, failover and breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct GenerationConfig {
    /// Quality-gated retries allowed per job. Must be at least 1.
    #[serde(default = "default_max_quality_retries")]
    pub max_quality_retries: usize,
    /// Deadline for one generation attempt, in seconds.
    #[serde(default = "default_attempt_timeout_s")]
    pub attempt_timeout_s: u64,
    /// Pause between failover attempts, in milliseconds.
    #[serde(default)]
    pub failover_backoff_ms: u64,
    /// Upper bound on requested output tokens.
    #[serde(default = "default_max_tokens_cap")]
    pub max_tokens_cap: u32,
    /// Consecutive failures before a provider breaker opens.
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: usize,
    /// Success rate (0.0–1.0) required to close a half-open breaker.
    #[serde(default = "default_breaker_success_rate")]
    pub breaker_success_rate: f64,
    /// Seconds an open breaker waits before probing.
    #[serde(default = "default_breaker_cooldown_s")]
    pub breaker_cooldown_s: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_quality_retries: default_max_quality_retries(),
            attempt_timeout_s: default_attempt_timeout_s(),
            failover_backoff_ms: 0,
            max_tokens_cap: default_max_tokens_cap(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_success_rate: default_breaker_success_rate(),
            breaker_cooldown_s: default_breaker_cooldown_s(),
        }
    }
}

impl GenerationConfig {
    /// Per-attempt deadline.
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_s)
    }

    /// Failover pause.
    pub fn failover_backoff(&self) -> Duration {
        Duration::from_millis(self.failover_backoff_ms)
    }

    /// One breaker per provider with these settings.
    pub fn breakers(&self) -> ProviderBreakers {
        ProviderBreakers::new(
            self.breaker_failure_threshold,
            self.breaker_success_rate,
            Duration::from_secs(self.breaker_cooldown_s),
        )
    }
}

// ── Analysis ─────────────────────────────────────────────────────────────

/// Analysis model and system-context configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct AnalysisConfig {
    /// Alias of the model used for screening and classification. An empty
    /// string runs analysis on heuristics only.
    #[serde(default = "default_analysis_model")]
    pub model: Option<String>,
    /// Base behavioural prompt placed first in every system context.
    #[serde(default = "default_base_prompt")]
    pub base_prompt: String,
    /// Persona presets, id to prompt.
    #[serde(default)]
    pub presets: HashMap<String, String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            model: default_analysis_model(),
            base_prompt: default_base_prompt(),
            presets: HashMap::new(),
        }
    }
}

impl AnalysisConfig {
    /// Configured analysis alias, `None` when unset or empty.
    pub fn model_alias(&self) -> Option<String> {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
    }

    /// System-context builder carrying the base prompt and presets.
    pub fn context_builder(&self) -> SystemContextBuilder {
        SystemContextBuilder::new(self.base_prompt.clone(), self.presets.clone())
    }
}

// ── Router ───────────────────────────────────────────────────────────────

/// Organisation rule set loaded from config.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct RouterConfig {
    /// Published as a new org version at startup and whenever it changes
    /// on reload. `None` keeps the built-in rule set.
    #[serde(default)]
    pub rule_set: Option<RuleSetDraft>,
}

// ── Discovery ────────────────────────────────────────────────────────────

/// Background model discovery.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Whether the discovery task runs.
    #[serde(default)]
    pub enabled: bool,
    /// Seconds between provider catalog refreshes.
    #[serde(default = "default_discovery_interval_s")]
    pub interval_s: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_s: default_discovery_interval_s(),
        }
    }
}

impl DiscoveryConfig {
    /// Refresh interval, never shorter than one minute.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_s.max(60))
    }
}

// ── Observability ────────────────────────────────────────────────────────

/// Logging and metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// Log output format. `LOG_FORMAT` in the environment wins.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Whether `/metrics` is served.
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            metrics_enabled: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable log output.
    #[default]
    Pretty,
    /// Structured JSON log output for machine consumption.
    Json,
}

/// Export the JSON Schema for [`OrchestratorConfig`].
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(OrchestratorConfig);
    serde_json::to_string_pretty(&schema)
}
