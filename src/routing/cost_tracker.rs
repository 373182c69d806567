//! Generation cost accounting.
//!
//! Estimates the USD cost of each completed generation from the model
//! family's per-million-token prices and keeps process-wide totals per
//! provider.
//!
//! Costs are stored as micro-dollars (1 USD = 1 000 000 micro-dollars) to
//! avoid floating-point drift in long-running aggregations.

use crate::provider::ProviderKind;
use crate::registry::ModelFamily;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Rough characters-per-token ratio used when the provider does not report
/// usage.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of `text`.
///
/// Never returns zero for non-empty input.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count();
    if chars == 0 {
        0
    } else {
        chars.div_ceil(CHARS_PER_TOKEN) as u64
    }
}

#[derive(Debug, Default)]
struct ProviderTotals {
    requests: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    cost_micro: AtomicU64,
}

/// Per-provider cost tracking.
///
/// All operations are lock-free via atomics.
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug, Default)]
pub struct CostTracker {
    openai: ProviderTotals,
    anthropic: ProviderTotals,
    google: ProviderTotals,
}

/// Cost of one recorded generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationCost {
    /// Estimated input tokens.
    pub input_tokens: u64,
    /// Estimated output tokens.
    pub output_tokens: u64,
    /// Estimated cost in USD.
    pub cost_usd: f64,
}

impl CostTracker {
    /// Create a tracker with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    fn totals(&self, kind: ProviderKind) -> &ProviderTotals {
        match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Anthropic => &self.anthropic,
            ProviderKind::Google => &self.google,
        }
    }

    /// Record one generation priced by `family` and return its cost.
    ///
    /// Token counts are estimated from the prompt and response text.
    pub fn record(&self, family: &ModelFamily, prompt: &str, response: &str) -> GenerationCost {
        let input_tokens = estimate_tokens(prompt);
        let output_tokens = estimate_tokens(response);
        let cost_usd = family.cost_usd(input_tokens, output_tokens);
        let cost_micro = f64_to_micro(cost_usd);

        let t = self.totals(family.provider);
        t.requests.fetch_add(1, Ordering::Relaxed);
        t.input_tokens.fetch_add(input_tokens, Ordering::Relaxed);
        t.output_tokens.fetch_add(output_tokens, Ordering::Relaxed);
        t.cost_micro.fetch_add(cost_micro, Ordering::Relaxed);

        GenerationCost {
            input_tokens,
            output_tokens,
            cost_usd: micro_to_f64(cost_micro),
        }
    }

    /// Return a snapshot of current totals.
    pub fn snapshot(&self) -> CostSnapshot {
        let providers = ProviderKind::ALL
            .into_iter()
            .map(|kind| {
                let t = self.totals(kind);
                ProviderCost {
                    provider: kind,
                    requests: t.requests.load(Ordering::Relaxed),
                    input_tokens: t.input_tokens.load(Ordering::Relaxed),
                    output_tokens: t.output_tokens.load(Ordering::Relaxed),
                    cost_usd: micro_to_f64(t.cost_micro.load(Ordering::Relaxed)),
                }
            })
            .collect::<Vec<_>>();
        let total_cost_usd = providers.iter().map(|p| p.cost_usd).sum();
        CostSnapshot {
            providers,
            total_cost_usd,
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        for kind in ProviderKind::ALL {
            let t = self.totals(kind);
            t.requests.store(0, Ordering::Relaxed);
            t.input_tokens.store(0, Ordering::Relaxed);
            t.output_tokens.store(0, Ordering::Relaxed);
            t.cost_micro.store(0, Ordering::Relaxed);
        }
    }
}

/// Totals for one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCost {
    /// Provider.
    pub provider: ProviderKind,
    /// Completed generations.
    pub requests: u64,
    /// Estimated input tokens.
    pub input_tokens: u64,
    /// Estimated output tokens.
    pub output_tokens: u64,
    /// Estimated spend in USD.
    pub cost_usd: f64,
}

/// Point-in-time snapshot of cost tracking.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostSnapshot {
    /// Per-provider totals.
    pub providers: Vec<ProviderCost>,
    /// Sum across providers in USD.
    pub total_cost_usd: f64,
}

// ── Helpers ────────────────────────────────────────────────────────────

fn f64_to_micro(usd: f64) -> u64 {
    if usd.is_finite() && usd > 0.0 {
        (usd * 1_000_000.0).round() as u64
    } else {
        0
    }
}

fn micro_to_f64(micro: u64) -> f64 {
    micro as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sonnet() -> ModelFamily {
        ModelFamily::builtin_families()
            .into_iter()
            .find(|f| f.alias == "claude-sonnet")
            .expect("sonnet family")
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("abcdefghi"), 3);
    }

    #[test]
    fn test_f64_to_micro_rejects_negative_and_nan() {
        assert_eq!(f64_to_micro(-1.0), 0);
        assert_eq!(f64_to_micro(f64::NAN), 0);
        assert_eq!(f64_to_micro(0.015), 15_000);
    }

    #[test]
    fn test_record_accumulates_per_provider() {
        let tracker = CostTracker::new();
        let prompt = "x".repeat(4_000);
        let response = "y".repeat(8_000);
        let cost = tracker.record(&sonnet(), &prompt, &response);
        assert_eq!(cost.input_tokens, 1_000);
        assert_eq!(cost.output_tokens, 2_000);
        // 1k in at $3/M + 2k out at $15/M
        assert!((cost.cost_usd - 0.033).abs() < 1e-9);

        let snap = tracker.snapshot();
        let anthropic = snap
            .providers
            .iter()
            .find(|p| p.provider == ProviderKind::Anthropic)
            .expect("anthropic row");
        assert_eq!(anthropic.requests, 1);
        assert!((snap.total_cost_usd - 0.033).abs() < 1e-9);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let tracker = CostTracker::new();
        let _ = tracker.record(&sonnet(), "hello", "world");
        tracker.reset();
        assert!(tracker.snapshot().total_cost_usd.abs() < f64::EPSILON);
    }
}
