//! # Stage: Request Analysis
//!
//! ## Responsibility
//! Everything the pipeline learns about a message before generation:
//! security screening, intent/sentiment/style classification, prompt
//! quality, prompt rewriting, parameter tuning, and post-generation
//! response validation.
//!
//! ## Guarantees
//! - Every model-assisted step has a heuristic fallback; a provider failure
//!   degrades the analysis, it never fails the job.
//! - Security scores only ever move upward within a job.
//! - Only redacted text is handed to any provider.
//!
//! ## NOT Responsible For
//! - Redaction itself (see [`crate::dlp`])
//! - Choosing the generation model (see [`crate::routing`])

pub mod classify;
pub mod context;
pub mod optimize;
pub mod research;
pub mod security;
pub mod types;
pub mod validate;

pub use classify::{Classification, ClassificationSource, Classifier};
pub use context::{SystemContextBuilder, DEFAULT_BASE_PROMPT};
pub use optimize::{OptimizationStrategy, OptimizedPrompt, ParameterTuner, PromptOptimizer};
pub use research::{ResearchClassification, ResearchClassifier};
pub use security::{SecurityAssessment, SecurityError, SecurityGate, SecurityVerdict};
pub use types::{AnalysisResult, Intent, PromptQuality, Sentiment, Style};
pub use validate::{ResponseValidator, ValidationReport, ValidatorConfig};

use serde_json::Value;

/// Pull the first JSON object out of a model answer.
///
/// Models often wrap JSON in prose or a fenced block; this takes the span
/// from the first `{` to the last `}` and parses it.
pub(crate) fn extract_json(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end])
        .ok()
        .filter(Value::is_object)
}

/// Read a 0–`max` integer that a model may have sent as a number or string.
pub(crate) fn json_score(value: Option<&Value>, max: u8) -> Option<u8> {
    let raw = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    Some(raw.round().clamp(0.0, f64::from(max)) as u8)
}
