//! # Stage: Prompt Optimizer
//!
//! Rewrites the (redacted) user prompt before generation and derives the
//! sampling parameters from the analysis.
//!
//! The optimizer only removes noise and appends guidance; it never drops
//! content the user wrote beyond exact or near-exact repeated sentences.

use super::types::{AnalysisResult, Intent, Style};
use crate::provider::GenerationParams;
use crate::routing::Complexity;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One rewrite applied to a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStrategy {
    /// Collapse runs of blank space.
    WhitespaceNormalization,
    /// Drop sentences that repeat an earlier one.
    RedundancyRemoval,
    /// Append a one-line answer-style directive.
    StyleDirective,
    /// Ask for structured output on complex requests.
    StructureHint,
}

/// Prompt after optimization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizedPrompt {
    /// Text handed to the generation model.
    pub prompt: String,
    /// Strategies that changed the text, in order.
    pub applied: Vec<OptimizationStrategy>,
}

/// Prompt rewriter.
#[derive(Debug, Clone)]
pub struct PromptOptimizer {
    /// Character-overlap ratio at which two sentences count as duplicates.
    redundancy_threshold: f64,
}

impl Default for PromptOptimizer {
    fn default() -> Self {
        Self {
            redundancy_threshold: 0.9,
        }
    }
}

impl PromptOptimizer {
    /// Optimizer with a custom duplicate-sentence threshold (0.0–1.0).
    pub fn new(redundancy_threshold: f64) -> Self {
        Self {
            redundancy_threshold: redundancy_threshold.clamp(0.5, 1.0),
        }
    }

    /// Rewrite `prompt` for the analysed request.
    pub fn optimize(&self, prompt: &str, analysis: &AnalysisResult) -> OptimizedPrompt {
        let mut applied = Vec::new();

        let normalized = normalize_whitespace(prompt);
        if normalized != prompt {
            applied.push(OptimizationStrategy::WhitespaceNormalization);
        }

        let deduped = self.remove_redundancy(&normalized);
        if deduped != normalized {
            applied.push(OptimizationStrategy::RedundancyRemoval);
        }

        let mut out = deduped;
        if let Some(directive) = style_directive(analysis.style) {
            out.push_str("\n\n");
            out.push_str(directive);
            applied.push(OptimizationStrategy::StyleDirective);
        }
        if analysis.complexity == Some(Complexity::Complex) && analysis.intent != Intent::Creative {
            out.push_str("\n\nStructure the answer with short headings and address each part of the request in turn.");
            applied.push(OptimizationStrategy::StructureHint);
        }

        debug!(
            original_len = prompt.len(),
            optimized_len = out.len(),
            strategies = applied.len(),
            "optimizer: prompt prepared"
        );
        OptimizedPrompt {
            prompt: out,
            applied,
        }
    }

    fn remove_redundancy(&self, text: &str) -> String {
        if text.contains("```") {
            return text.to_string();
        }
        // (sentence, trailing whitespace)
        let mut kept: Vec<(&str, &str)> = Vec::new();
        for piece in split_sentences(text) {
            let body = piece.trim_end();
            let gap = &piece[body.len()..];
            let trimmed = body.trim_start();
            let duplicate = !trimmed.is_empty()
                && kept.iter().any(|(prev, _)| {
                    let prev = prev.trim();
                    if prev.is_empty() {
                        return false;
                    }
                    let longer = prev.chars().count().max(trimmed.chars().count()) as f64;
                    let common = prev
                        .chars()
                        .zip(trimmed.chars())
                        .filter(|(a, b)| a.eq_ignore_ascii_case(b))
                        .count() as f64;
                    common / longer >= self.redundancy_threshold
                });
            if !duplicate {
                kept.push((body, gap));
            } else if let Some(last) = kept.last_mut() {
                // A dropped sentence hands its separator to the previous one
                // so paragraph breaks survive.
                last.1 = gap;
            }
        }
        let mut out = String::with_capacity(text.len());
        for (body, gap) in kept {
            out.push_str(body);
            out.push_str(gap);
        }
        out.trim().to_string()
    }
}

/// Split after `.`, `!` or `?`, keeping the terminator and trailing space
/// with the sentence so that `concat` restores the original text.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let mut end = i + c.len_utf8();
            while let Some(&(j, next)) = chars.peek() {
                if next.is_whitespace() {
                    end = j + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            out.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

/// Collapse horizontal whitespace runs and more than one blank line.
/// Fenced code blocks are left exactly as written.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_fence = false;
    let mut blank_run = 0;
    for line in text.trim().lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        if in_fence || line.trim_start().starts_with("```") {
            out.push_str(line.trim_end());
            out.push('\n');
            blank_run = 0;
            continue;
        }
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(&collapsed);
        out.push('\n');
    }
    out.trim_end().to_string()
}

fn style_directive(style: Style) -> Option<&'static str> {
    match style {
        Style::Concise => Some("Answer concisely."),
        Style::Detailed => Some("Give a thorough answer with explanation and examples."),
        Style::Technical => Some("Use precise technical language."),
        Style::Casual => Some("Keep the tone friendly and plain."),
        Style::Formal => Some("Use a formal, professional tone."),
        Style::Balanced => None,
    }
}

/// Derives sampling parameters from the analysis.
#[derive(Debug, Clone, Copy)]
pub struct ParameterTuner {
    /// Upper bound on `max_tokens`.
    max_tokens_cap: u32,
}

impl Default for ParameterTuner {
    fn default() -> Self {
        Self {
            max_tokens_cap: 4096,
        }
    }
}

impl ParameterTuner {
    /// Tuner that never asks for more than `max_tokens_cap` output tokens.
    pub fn new(max_tokens_cap: u32) -> Self {
        Self {
            max_tokens_cap: max_tokens_cap.max(64),
        }
    }

    /// Temperature by intent, length by complexity and style.
    pub fn tune(&self, analysis: &AnalysisResult) -> GenerationParams {
        let temperature = match analysis.intent {
            Intent::Coding => 0.2,
            Intent::Factual => 0.3,
            Intent::Analytical | Intent::Instructional => 0.4,
            Intent::Research => 0.5,
            Intent::Conversational | Intent::Other => 0.7,
            Intent::Creative => 0.9,
        };
        let top_p = if analysis.intent == Intent::Creative {
            0.95
        } else {
            0.9
        };
        let base: u32 = match analysis.complexity.unwrap_or(Complexity::Moderate) {
            Complexity::Simple => 512,
            Complexity::Moderate => 1024,
            Complexity::Complex => 2048,
        };
        let max_tokens = match analysis.style {
            Style::Detailed => base + base / 2,
            Style::Concise => (base / 2).max(256),
            _ => base,
        }
        .min(self.max_tokens_cap);

        GenerationParams {
            temperature,
            max_tokens,
            top_p,
        }
    }
}
