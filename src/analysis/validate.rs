//! # Stage: Response Validation
//!
//! Heuristic check of a finished response against the request's intent.
//! Scores coherence, completeness and confidence like a lightweight quality
//! estimator, then turns hard failures into a reason string that drives the
//! engine's quality-gated retry.

use super::types::Intent;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Validator thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Responses shorter than this (trimmed, in chars) fail.
    pub min_response_len: usize,
    /// Weighted score below which a response fails.
    pub min_overall: f64,
    /// Weight of the coherence signal.
    pub coherence_weight: f64,
    /// Weight of the completeness signal.
    pub completeness_weight: f64,
    /// Weight of the confidence signal.
    pub confidence_weight: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_response_len: 10,
            min_overall: 0.35,
            coherence_weight: 0.4,
            completeness_weight: 0.4,
            confidence_weight: 0.2,
        }
    }
}

/// Outcome of validating one response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Whether the response is acceptable.
    pub passed: bool,
    /// First failure reason, if any.
    pub reason: Option<String>,
    /// 0.0–1.0.
    pub coherence: f64,
    /// 0.0–1.0.
    pub completeness: f64,
    /// 0.0–1.0.
    pub confidence: f64,
    /// Weighted combination.
    pub overall: f64,
    /// Soft warnings that did not fail the response.
    pub flags: Vec<String>,
}

/// Response validator.
#[derive(Debug, Clone, Default)]
pub struct ResponseValidator {
    config: ValidatorConfig,
}

const REFUSALS: &[&str] = &[
    "i can't help with",
    "i cannot help with",
    "i can't assist with",
    "i cannot assist with",
    "i'm unable to help",
    "i am unable to help",
    "as an ai language model, i cannot",
];

const CODE_REQUEST_TERMS: &[&str] = &[
    "write", "implement", "function", "code", "script", "snippet", "class", "program", "fix",
];

impl ResponseValidator {
    /// Validator with custom thresholds.
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate `response` for `prompt` under `intent`.
    pub fn validate(&self, prompt: &str, response: &str, intent: Intent) -> ValidationReport {
        let text = response.trim();
        let len = text.chars().count();
        let lower = text.to_lowercase();
        let prompt_lower = prompt.to_lowercase();

        let len_ok = len >= self.config.min_response_len;
        let ends_cleanly = text.ends_with(['.', '!', '?', '`', ')', ']', '}', '*', '"'])
            || text.lines().last().is_some_and(|l| l.trim_start().starts_with(['-', '|', '#']));
        let coherence = if !len_ok {
            0.0
        } else if ends_cleanly {
            0.85
        } else {
            0.5
        };

        let question_words = ["how", "what", "why", "when", "where", "who", "which"];
        let asked = question_words
            .iter()
            .filter(|w| contains_word(&prompt_lower, w))
            .count();
        let addressed = question_words
            .iter()
            .filter(|w| contains_word(&prompt_lower, w) && contains_word(&lower, w))
            .count();
        let completeness = if asked == 0 {
            0.7
        } else {
            // Answers rarely echo every question word; give partial credit.
            (0.4 + 0.6 * addressed as f64 / asked as f64).min(1.0)
        };

        let confidence = 1.0 - (1.0 / (len as f64).sqrt().max(1.0));
        let overall = self.config.coherence_weight * coherence
            + self.config.completeness_weight * completeness
            + self.config.confidence_weight * confidence;

        let mut flags = Vec::new();
        if coherence > 0.0 && coherence < 0.6 {
            flags.push("possibly_truncated".to_string());
        }
        if completeness < 0.5 {
            flags.push("possibly_incomplete".to_string());
        }

        let reason = if text.is_empty() {
            Some("empty response".to_string())
        } else if !len_ok {
            Some(format!(
                "response too short ({len} chars, minimum {})",
                self.config.min_response_len
            ))
        } else if REFUSALS.iter().any(|r| lower.contains(r)) && len < 400 {
            Some("model declined to answer".to_string())
        } else if intent == Intent::Coding && asks_for_code(&prompt_lower) && !looks_like_code(text) {
            Some("coding request answered without code".to_string())
        } else if overall < self.config.min_overall {
            Some(format!("quality score {overall:.2} below {:.2}", self.config.min_overall))
        } else {
            None
        };

        debug!(
            passed = reason.is_none(),
            overall = overall,
            len,
            "validator: response checked"
        );
        ValidationReport {
            passed: reason.is_none(),
            reason,
            coherence,
            completeness,
            confidence,
            overall,
            flags,
        }
    }
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| w == word)
}

fn asks_for_code(prompt_lower: &str) -> bool {
    CODE_REQUEST_TERMS.iter().any(|t| contains_word(prompt_lower, t))
}

fn looks_like_code(text: &str) -> bool {
    if text.contains("```") || text.lines().any(|l| l.starts_with("    ") || l.starts_with('\t')) {
        return true;
    }
    let markers = ["fn ", "def ", "function ", "class ", "=>", "();", "{", "};", "import ", "#include"];
    markers.iter().filter(|m| text.contains(**m)).count() >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> ResponseValidator {
        ResponseValidator::default()
    }

    #[test]
    fn test_short_response_fails() {
        let r = validator().validate("Explain DNS", "ok", Intent::Factual);
        assert!(!r.passed);
        assert!(r.reason.as_deref().is_some_and(|s| s.starts_with("response too short")));
    }

    #[test]
    fn test_empty_response_fails() {
        let r = validator().validate("Explain DNS", "   ", Intent::Factual);
        assert_eq!(r.reason.as_deref(), Some("empty response"));
    }

    #[test]
    fn test_well_formed_answer_passes() {
        let r = validator().validate(
            "What does DNS do?",
            "DNS translates human-readable domain names into IP addresses so that browsers can find servers.",
            Intent::Factual,
        );
        assert!(r.passed, "{:?}", r.reason);
        assert!(r.coherence >= 0.8);
        assert!(r.overall > 0.0 && r.overall <= 1.0);
    }

    #[test]
    fn test_refusal_fails() {
        let r = validator().validate(
            "Write a limerick about cats",
            "I'm sorry, but I can't help with that request.",
            Intent::Creative,
        );
        assert_eq!(r.reason.as_deref(), Some("model declined to answer"));
    }

    #[test]
    fn test_coding_request_needs_code() {
        let prose = "You should loop over the list and add the numbers together, then return the total.";
        let r = validator().validate("Write a function that sums a list", prose, Intent::Coding);
        assert_eq!(r.reason.as_deref(), Some("coding request answered without code"));

        let code = "Here you go:\n```python\ndef total(xs):\n    return sum(xs)\n```";
        assert!(validator().validate("Write a function that sums a list", code, Intent::Coding).passed);
    }

    #[test]
    fn test_conceptual_coding_question_accepts_prose() {
        let r = validator().validate(
            "Why is Rust's borrow checker useful?",
            "It prevents data races and use-after-free bugs at compile time, without a garbage collector.",
            Intent::Coding,
        );
        assert!(r.passed, "{:?}", r.reason);
    }

    #[test]
    fn test_truncated_answer_is_flagged_not_failed() {
        let r = validator().validate(
            "Summarise the plot",
            "The story follows a young sailor who leaves home and eventually",
            Intent::Other,
        );
        assert!(r.passed);
        assert!(r.flags.contains(&"possibly_truncated".to_string()));
    }
}
