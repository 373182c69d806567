//! Prompt complexity scoring.
//!
//! Analyses a prompt string and produces a complexity score in the range
//! `0.0..=1.0`, bucketed into a [`Complexity`] level for routing rules:
//!
//! | Score       | Level                     |
//! |-------------|---------------------------|
//! | `< 0.3`     | [`Complexity::Simple`]    |
//! | `0.3 – 0.6` | [`Complexity::Moderate`]  |
//! | `≥ 0.6`     | [`Complexity::Complex`]   |
//!
//! ## Heuristics
//!
//! 1. **Length**: more than 300 whitespace-delimited words → +0.3
//! 2. **Code**: fenced code block or stack trace → +0.2
//! 3. **Multi-step instructions**: two or more numbered/bulleted items → +0.2
//! 4. **Multiple questions**: two or more `?` → +0.1
//! 5. **Technical vocabulary**: two or more domain terms → +0.15
//! 6. **Constraint language**: "must", "without", "trade-off", … → +0.1
//!
//! The raw sum is clamped to `[0.0, 1.0]`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Coarse prompt complexity used by routing conditions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// Short, single-step request.
    Simple,
    /// Some structure or domain depth.
    Moderate,
    /// Long, multi-part or code-heavy request.
    Complex,
}

impl Complexity {
    /// Bucket a `[0.0, 1.0]` score.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.6 {
            Complexity::Complex
        } else if score >= 0.3 {
            Complexity::Moderate
        } else {
            Complexity::Simple
        }
    }
}

/// A prompt complexity scorer.
///
/// Stateless and cheap to construct.
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug, Clone)]
pub struct ComplexityScorer {
    /// Word count above which the long-prompt signal fires.
    word_threshold: usize,
}

impl ComplexityScorer {
    /// Create a scorer with the default word threshold (300).
    pub fn new() -> Self {
        Self { word_threshold: 300 }
    }

    /// Create a scorer with a custom word threshold.
    pub fn with_word_threshold(word_threshold: usize) -> Self {
        Self { word_threshold }
    }

    /// Score a prompt for complexity.
    ///
    /// # Panics
    ///
    /// This function never panics.
    ///
    /// # Example
    ///
    /// ```rust
    /// use prompt_guard_orchestrator::routing::{Complexity, ComplexityScorer};
    /// let scorer = ComplexityScorer::new();
    /// assert_eq!(scorer.level("Say hello"), Complexity::Simple);
    /// ```
    pub fn score(&self, prompt: &str) -> f64 {
        self.breakdown(prompt).total
    }

    /// Score and bucket a prompt.
    pub fn level(&self, prompt: &str) -> Complexity {
        Complexity::from_score(self.score(prompt))
    }

    /// Per-signal contributions, for logging and debugging.
    pub fn breakdown(&self, prompt: &str) -> ScoreBreakdown {
        let lower = prompt.to_lowercase();
        let length: f64 = if prompt.split_whitespace().count() > self.word_threshold {
            0.3
        } else {
            0.0
        };
        let code = if prompt.contains("```") || looks_like_stack_trace(prompt) {
            0.2
        } else {
            0.0
        };
        let multi_step = if count_list_items(prompt) >= 2 { 0.2 } else { 0.0 };
        let questions = if prompt.matches('?').count() >= 2 { 0.1 } else { 0.0 };
        let technical = if TECHNICAL_TERMS.iter().filter(|t| lower.contains(*t)).count() >= 2 {
            0.15
        } else {
            0.0
        };
        let constraints = if CONSTRAINT_TERMS.iter().any(|t| lower.contains(*t)) {
            0.1
        } else {
            0.0
        };
        let total =
            (length + code + multi_step + questions + technical + constraints).clamp(0.0, 1.0);

        ScoreBreakdown {
            length,
            code,
            multi_step,
            questions,
            technical,
            constraints,
            total,
        }
    }
}

impl Default for ComplexityScorer {
    fn default() -> Self {
        Self::new()
    }
}

/// Breakdown of individual complexity signal contributions.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    /// Long-prompt signal (0.0 or 0.3).
    pub length: f64,
    /// Code signal (0.0 or 0.2).
    pub code: f64,
    /// Multi-step signal (0.0 or 0.2).
    pub multi_step: f64,
    /// Multiple-questions signal (0.0 or 0.1).
    pub questions: f64,
    /// Technical-vocabulary signal (0.0 or 0.15).
    pub technical: f64,
    /// Constraint-language signal (0.0 or 0.1).
    pub constraints: f64,
    /// Final clamped score.
    pub total: f64,
}

const TECHNICAL_TERMS: &[&str] = &[
    "algorithm",
    "architecture",
    "async",
    "concurren",
    "database",
    "distributed",
    "kubernetes",
    "latency",
    "microservice",
    "optimiz",
    "protocol",
    "regression",
    "schema",
    "thread",
    "throughput",
    "lifetime",
    "borrow checker",
    "compiler",
    "statistic",
    "derivative",
    "theorem",
];

const CONSTRAINT_TERMS: &[&str] = &[
    " must ",
    " without ",
    "trade-off",
    "tradeoff",
    "edge case",
    "constraint",
    "at most",
    "at least",
];

fn count_list_items(prompt: &str) -> usize {
    prompt
        .lines()
        .map(str::trim_start)
        .filter(|line| {
            let digits = line.chars().take_while(char::is_ascii_digit).count();
            let numbered = digits > 0
                && matches!(line[digits..].chars().next(), Some('.') | Some(')'));
            numbered || line.starts_with("- ") || line.starts_with("* ")
        })
        .count()
}

fn looks_like_stack_trace(prompt: &str) -> bool {
    prompt.contains("Traceback (most recent call last)")
        || prompt.contains("panicked at")
        || prompt.lines().filter(|l| l.trim_start().starts_with("at ")).count() >= 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_greeting_is_simple() {
        let scorer = ComplexityScorer::new();
        assert_eq!(scorer.level("Say hello"), Complexity::Simple);
        assert!(scorer.score("Say hello") < f64::EPSILON);
    }

    #[test]
    fn test_code_and_steps_is_moderate() {
        let scorer = ComplexityScorer::new();
        let prompt = "Fix this:\n```rust\nfn main() {}\n```\n1. compile it\n2. run it";
        let b = scorer.breakdown(prompt);
        assert!((b.code - 0.2).abs() < f64::EPSILON);
        assert!((b.multi_step - 0.2).abs() < f64::EPSILON);
        assert_eq!(Complexity::from_score(b.total), Complexity::Moderate);
    }

    #[test]
    fn test_long_technical_prompt_is_complex() {
        let scorer = ComplexityScorer::with_word_threshold(10);
        let prompt = "Design a distributed database architecture that must keep latency low \
                      without losing throughput. What are the trade-offs? Which protocol?";
        assert_eq!(scorer.level(prompt), Complexity::Complex);
    }

    #[test]
    fn test_bullets_count_as_steps() {
        assert_eq!(count_list_items("- one\n- two\n* three"), 3);
        assert_eq!(count_list_items("1) a\n2. b\n10. c"), 3);
        assert_eq!(count_list_items("2024 was a year"), 0);
    }

    #[test]
    fn test_score_is_clamped() {
        let scorer = ComplexityScorer::with_word_threshold(0);
        let prompt = "```\nx\n```\n1. a\n2. b\nwhy? how? algorithm thread must";
        assert!(scorer.score(prompt) <= 1.0);
    }

    #[test]
    fn test_from_score_boundaries() {
        assert_eq!(Complexity::from_score(0.29), Complexity::Simple);
        assert_eq!(Complexity::from_score(0.3), Complexity::Moderate);
        assert_eq!(Complexity::from_score(0.6), Complexity::Complex);
    }
}
