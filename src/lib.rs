//! # prompt-guard-orchestrator
//!
//! An analyze-then-generate gateway for LLM requests over Tokio.
//!
//! ## Architecture
//!
//! Every inbound message becomes a job that moves through a fixed sequence
//! of phases, streaming progress events back to the client:
//! ```text
//! analyze → DLP scan → admission → security screen → classify → route
//!         → optimize → generate (stream, failover, quality gate) → complete
//! ```
//!
//! Sensitive data is redacted before any model sees the message, jobs that
//! score at or above the security threshold halt before generation, and the
//! generation engine walks an ordered candidate list with bounded failover.

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod admission;
pub mod analysis;
pub mod config;
pub mod dlp;
pub mod engine;
pub mod enhanced;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod routing;
pub mod store;

#[cfg(feature = "web-api")]
pub mod web_api;

// Re-exports for convenience
pub use admission::{AdmissionDecision, AdmissionDenial, DemoBudgetTracker, DemoLimits, DemoStatus};
pub use config::{LogFormat, OrchestratorConfig};
pub use engine::{GenerationEngine, GenerationOutput};
pub use events::{AnalyzePayload, InboundCommand, JobEvent, Phase};
pub use orchestrator::{Connection, ConnectionContext, JobOutcome, Orchestrator};
pub use provider::{ApiKeys, HttpProviderFactory, ModelProvider, ProviderError, ProviderFactory, ProviderKind};
pub use registry::ModelAliasRegistry;
pub use routing::{ModelRouter, RuleScope, RuleSetDraft};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"`: structured JSON output for log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Example
///
/// ```no_run
/// # use prompt_guard_orchestrator::{init_tracing, OrchestratorError};
/// # fn example() -> Result<(), OrchestratorError> {
/// init_tracing()?;
/// # Ok(()) }
/// ```
pub fn init_tracing() -> Result<(), OrchestratorError> {
    init_tracing_with(LogFormat::Pretty)
}

/// Like [`init_tracing`], with `fallback` used when `LOG_FORMAT` is unset.
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if a global subscriber is already set.
pub fn init_tracing_with(fallback: LogFormat) -> Result<(), OrchestratorError> {
    let format = match std::env::var("LOG_FORMAT").ok().as_deref() {
        Some("json") => LogFormat::Json,
        Some(_) => LogFormat::Pretty,
        None => fallback,
    };

    let result = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| OrchestratorError::Other(format!("tracing init failed: {e}")))
}

/// Top-level service errors.
///
/// Startup and wiring failures surface here; per-job failures travel as
/// job events instead.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// A configuration value is missing or invalid.
    ///
    /// Returned at construction time so that misconfiguration surfaces
    /// immediately rather than on the first job.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

impl From<config::ConfigError> for OrchestratorError {
    fn from(e: config::ConfigError) -> Self {
        OrchestratorError::ConfigError(e.to_string())
    }
}
