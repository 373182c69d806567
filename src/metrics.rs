//! Prometheus metrics for the job pipeline.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup before accepting
//! connections. The helper functions (`record_phase_latency`, `inc_job`, …)
//! are no-ops if `init_metrics` was never called, so the pipeline and its
//! tests run fine without a registry.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `orchestrator_jobs_total` | Counter | `outcome` |
//! | `orchestrator_phase_errors_total` | Counter | `phase`, `err_type` |
//! | `orchestrator_provider_failovers_total` | Counter | `provider` |
//! | `orchestrator_quality_retries_total` | Counter | none |
//! | `orchestrator_admission_rejections_total` | Counter | `reason` |
//! | `orchestrator_dlp_findings_total` | Counter | `kind` |
//! | `orchestrator_phase_duration_seconds` | Histogram | `phase` |

use crate::OrchestratorError;
use prometheus::{
    core::Collector, CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All Prometheus metrics, bundled so they live in a single [`OnceLock`].
pub struct Metrics {
    /// Registry owning every descriptor below.
    pub registry: Registry,
    /// Finished jobs by outcome.
    pub jobs_total: CounterVec,
    /// Phase failures by phase and error type.
    pub phase_errors: CounterVec,
    /// Provider faults that triggered failover, by failed provider.
    pub provider_failovers: CounterVec,
    /// Quality-gated retries taken.
    pub quality_retries: IntCounter,
    /// Admission rejections by reason.
    pub admission_rejections: CounterVec,
    /// Redacted spans by DLP kind.
    pub dlp_findings: CounterVec,
    /// Phase latency.
    pub phase_duration: HistogramVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn init_err(e: prometheus::Error) -> OrchestratorError {
    OrchestratorError::Other(format!("metrics init failed: {e}"))
}

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<CounterVec, OrchestratorError> {
    let c = CounterVec::new(Opts::new(name, help), labels).map_err(init_err)?;
    registry.register(Box::new(c.clone())).map_err(init_err)?;
    Ok(c)
}

impl Metrics {
    /// Build every metric and register it with `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Other`] on construction or duplicate
    /// registration failures.
    pub fn new(registry: Registry) -> Result<Self, OrchestratorError> {
        let jobs_total = counter_vec(
            &registry,
            "orchestrator_jobs_total",
            "Finished jobs by outcome",
            &["outcome"],
        )?;
        let phase_errors = counter_vec(
            &registry,
            "orchestrator_phase_errors_total",
            "Phase failures by phase and error type",
            &["phase", "err_type"],
        )?;
        let provider_failovers = counter_vec(
            &registry,
            "orchestrator_provider_failovers_total",
            "Provider faults that moved generation to the next candidate",
            &["provider"],
        )?;
        let quality_retries = IntCounter::new(
            "orchestrator_quality_retries_total",
            "Generations retried after failing validation",
        )
        .map_err(init_err)?;
        registry
            .register(Box::new(quality_retries.clone()))
            .map_err(init_err)?;
        let admission_rejections = counter_vec(
            &registry,
            "orchestrator_admission_rejections_total",
            "Unauthenticated requests refused by admission control",
            &["reason"],
        )?;
        let dlp_findings = counter_vec(
            &registry,
            "orchestrator_dlp_findings_total",
            "Sensitive spans redacted, by kind",
            &["kind"],
        )?;
        let phase_duration = HistogramVec::new(
            HistogramOpts::new(
                "orchestrator_phase_duration_seconds",
                "Processing duration per job phase",
            ),
            &["phase"],
        )
        .map_err(init_err)?;
        registry
            .register(Box::new(phase_duration.clone()))
            .map_err(init_err)?;

        Ok(Self {
            registry,
            jobs_total,
            phase_errors,
            provider_failovers,
            quality_retries,
            admission_rejections,
            dlp_findings,
            phase_duration,
        })
    }
}

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all metrics in a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if metric construction or
/// registration fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), OrchestratorError> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    let metrics = Metrics::new(Registry::new())?;
    // A racing initialiser builds identical descriptors; first one wins.
    let _ = METRICS.set(metrics);
    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Record how long a job phase took.
///
/// No-op if metrics have not been initialised.
pub fn record_phase_latency(phase: &str, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(h) = m.phase_duration.get_metric_with_label_values(&[phase]) {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Count a finished job.
pub fn inc_job(outcome: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.jobs_total.get_metric_with_label_values(&[outcome]) {
            c.inc();
        }
    }
}

/// Count a phase failure.
pub fn inc_phase_error(phase: &str, err_type: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .phase_errors
            .get_metric_with_label_values(&[phase, err_type])
        {
            c.inc();
        }
    }
}

/// Count a failover away from `provider`.
pub fn inc_provider_failover(provider: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.provider_failovers.get_metric_with_label_values(&[provider]) {
            c.inc();
        }
    }
}

/// Count a quality-gated retry.
pub fn inc_quality_retry() {
    if let Some(m) = metrics() {
        m.quality_retries.inc();
    }
}

/// Count an admission rejection.
pub fn inc_admission_rejection(reason: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.admission_rejections.get_metric_with_label_values(&[reason]) {
            c.inc();
        }
    }
}

/// Add `count` redacted spans of `kind`.
pub fn add_dlp_findings(kind: &str, count: usize) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.dlp_findings.get_metric_with_label_values(&[kind]) {
            c.inc_by(count as f64);
        }
    }
}

/// Gather all registered metric families.
///
/// Returns an empty `Vec` if metrics have not been initialised.
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    metrics().map_or_else(Vec::new, |m| m.registry.gather())
}

/// Encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics are not initialised or encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let families = gather();
    if families.is_empty() {
        return String::new();
    }
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Counter snapshot used by the health endpoint.
#[derive(Debug, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    /// Finished jobs keyed by outcome.
    pub jobs_total: HashMap<String, u64>,
    /// Failovers keyed by provider.
    pub provider_failovers: HashMap<String, u64>,
    /// Quality retries.
    pub quality_retries: u64,
    /// Admission rejections keyed by reason.
    pub admission_rejections: HashMap<String, u64>,
}

fn by_label(vec: &CounterVec, label: &str) -> HashMap<String, u64> {
    let mut out = HashMap::new();
    for family in vec.collect() {
        for metric in family.get_metric() {
            let key = metric
                .get_label()
                .iter()
                .find(|l| l.get_name() == label)
                .map_or("unknown", |l| l.get_value());
            out.insert(key.to_string(), metric.get_counter().get_value() as u64);
        }
    }
    out
}

/// Current counter values, zeroed if metrics are not initialised.
pub fn get_metrics_summary() -> MetricsSummary {
    let Some(m) = metrics() else {
        return MetricsSummary::default();
    };
    MetricsSummary {
        jobs_total: by_label(&m.jobs_total, "outcome"),
        provider_failovers: by_label(&m.provider_failovers, "provider"),
        quality_retries: m.quality_retries.get(),
        admission_rejections: by_label(&m.admission_rejections, "reason"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok(), "second call must be a no-op");
    }

    #[test]
    fn test_helpers_before_or_after_init_do_not_panic() {
        record_phase_latency("screening", Duration::from_millis(5));
        inc_quality_retry();
        let _ = init_metrics();
        inc_phase_error("generating", "timeout");
    }

    #[test]
    fn test_isolated_bundle_counts_by_label() {
        let m = Metrics::new(Registry::new()).expect("fresh registry");
        m.jobs_total
            .get_metric_with_label_values(&["halted"])
            .expect("label ok")
            .inc();
        m.jobs_total
            .get_metric_with_label_values(&["halted"])
            .expect("label ok")
            .inc();
        m.dlp_findings
            .get_metric_with_label_values(&["email"])
            .expect("label ok")
            .inc_by(3.0);

        let jobs = by_label(&m.jobs_total, "outcome");
        assert_eq!(jobs.get("halted"), Some(&2));
        let dlp = by_label(&m.dlp_findings, "kind");
        assert_eq!(dlp.get("email"), Some(&3));
    }

    #[test]
    fn test_duplicate_registration_is_an_error() {
        let registry = Registry::new();
        assert!(Metrics::new(registry.clone()).is_ok());
        assert!(Metrics::new(registry).is_err());
    }

    #[test]
    fn test_gather_metrics_text_after_observation() {
        let _ = init_metrics();
        inc_job("complete");
        let text = gather_metrics();
        assert!(text.contains("orchestrator_jobs_total"));
    }
}
