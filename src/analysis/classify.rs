//! Intent, sentiment, style and prompt-quality classification.
//!
//! One model call returns all four as JSON. Every field the model omits or
//! garbles is filled from a keyword heuristic, and the whole result comes
//! from heuristics when no model is available.

use super::types::{AnalysisResult, Intent, PromptQuality, Sentiment, Style};
use super::{extract_json, json_score};
use crate::provider::{GenerationParams, ModelProvider};
use crate::routing::{Complexity, ComplexityScorer};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

const CLASSIFY_PROMPT: &str = "Classify the user's message. Respond with JSON only, shaped as \
{\"intent\": \"coding|creative|analytical|factual|research|instructional|conversational|other\", \
\"sentiment\": \"positive|neutral|negative|frustrated|curious\", \
\"sentimentDetail\": \"<one short sentence>\", \
\"style\": \"concise|detailed|technical|casual|formal|balanced\", \
\"promptQuality\": {\"score\": 0-100, \"clarity\": 0-100, \"specificity\": 0-100, \
\"actionability\": 0-100, \"suggestions\": [\"...\"]}}";

/// Where a classification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationSource {
    /// The model answered with usable JSON.
    Model,
    /// Keyword heuristics only.
    Heuristic,
}

/// Output of the classification stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    /// Task type.
    pub intent: Intent,
    /// Tone.
    pub sentiment: Sentiment,
    /// One-line tone explanation.
    pub sentiment_detail: String,
    /// Preferred answer style.
    pub style: Style,
    /// Heuristic complexity (never model-derived).
    pub complexity: Complexity,
    /// Prompt quality.
    pub prompt_quality: PromptQuality,
    /// Provenance.
    pub source: ClassificationSource,
}

impl Classification {
    /// Copy the classified fields into `analysis`, leaving security alone.
    pub fn apply_to(&self, analysis: &mut AnalysisResult) {
        analysis.intent = self.intent;
        analysis.sentiment = self.sentiment;
        analysis.sentiment_detail = self.sentiment_detail.clone();
        analysis.style = self.style;
        analysis.complexity = Some(self.complexity);
        analysis.prompt_quality = self.prompt_quality.clone();
    }
}

/// Classification stage.
#[derive(Debug, Default)]
pub struct Classifier {
    scorer: ComplexityScorer,
}

impl Classifier {
    /// Classifier with the default complexity scorer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifier with a custom complexity scorer.
    pub fn with_scorer(scorer: ComplexityScorer) -> Self {
        Self { scorer }
    }

    /// Classify `message`, using `model` when one is available.
    pub async fn classify(&self, message: &str, model: Option<&dyn ModelProvider>) -> Classification {
        let mut result = self.heuristic(message);
        let Some(provider) = model else {
            return result;
        };
        let params = GenerationParams {
            temperature: 0.0,
            max_tokens: 400,
            top_p: 1.0,
        };
        match provider.generate(CLASSIFY_PROMPT, message, &params).await {
            Ok(answer) => match extract_json(&answer) {
                Some(json) => merge_model_answer(&mut result, &json),
                None => debug!("classify: model answer had no JSON, keeping heuristics"),
            },
            Err(e) => {
                warn!(provider = %provider.kind(), error = %e, "classify: model call failed, using heuristics")
            }
        }
        result
    }

    /// Keyword-only classification.
    pub fn heuristic(&self, message: &str) -> Classification {
        let lower = message.to_lowercase();
        let words: HashSet<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .collect();
        let text = Text {
            raw: message,
            lower: &lower,
            words: &words,
        };

        let intent = heuristic_intent(&text);
        let (sentiment, sentiment_detail) = heuristic_sentiment(&text);
        Classification {
            intent,
            sentiment,
            sentiment_detail: sentiment_detail.to_string(),
            style: heuristic_style(&text, intent),
            complexity: self.scorer.level(message),
            prompt_quality: heuristic_quality(&text),
            source: ClassificationSource::Heuristic,
        }
    }
}

struct Text<'a> {
    raw: &'a str,
    lower: &'a str,
    words: &'a HashSet<&'a str>,
}

impl Text<'_> {
    /// Single words match whole tokens; phrases match as substrings.
    fn has_any(&self, terms: &[&str]) -> bool {
        terms.iter().any(|t| {
            if t.contains(' ') || t.contains('`') || t.contains(':') {
                self.lower.contains(t)
            } else {
                self.words.contains(t)
            }
        })
    }

    fn word_count(&self) -> usize {
        self.raw.split_whitespace().count()
    }
}

fn heuristic_intent(t: &Text<'_>) -> Intent {
    const CODING: &[&str] = &[
        "```", "code", "function", "bug", "compile", "compiler", "error:", "python", "rust",
        "javascript", "typescript", "sql", "api", "regex", "debug", "implement", "refactor",
        "stack trace", "class", "method", "script", "programming",
    ];
    const RESEARCH: &[&str] = &[
        "research", "literature", "sources", "citations", "state of the art", "survey",
        "in-depth", "peer reviewed", "studies",
    ];
    const ANALYTICAL: &[&str] = &[
        "compare", "analyze", "analyse", "evaluate", "pros and cons", "trade-off", "tradeoff",
        "versus", "vs", "assess",
    ];
    const CREATIVE: &[&str] = &[
        "story", "poem", "song", "lyrics", "fiction", "slogan", "haiku", "screenplay", "creative",
    ];
    const INSTRUCTIONAL: &[&str] = &[
        "how do i", "how to", "step by step", "steps to", "guide", "tutorial", "walk me through",
    ];
    const CONVERSATIONAL: &[&str] = &["hi", "hello", "hey", "thanks", "thank you", "how are you"];

    if t.has_any(CODING) {
        Intent::Coding
    } else if t.has_any(RESEARCH) {
        Intent::Research
    } else if t.has_any(ANALYTICAL) {
        Intent::Analytical
    } else if t.has_any(CREATIVE) {
        Intent::Creative
    } else if t.has_any(INSTRUCTIONAL) {
        Intent::Instructional
    } else if t.word_count() <= 6 && t.has_any(CONVERSATIONAL) {
        Intent::Conversational
    } else if t.word_count() <= 25
        && (t.raw.trim_end().ends_with('?')
            || t.has_any(&["what", "who", "when", "where", "which"]))
    {
        Intent::Factual
    } else {
        Intent::Other
    }
}

fn heuristic_sentiment(t: &Text<'_>) -> (Sentiment, &'static str) {
    if t.has_any(&[
        "frustrated", "frustrating", "annoying", "stuck", "doesn't work", "does not work",
        "still broken", "ugh", "again",
    ]) || t.raw.contains("!!!")
    {
        (Sentiment::Frustrated, "The user sounds stuck or annoyed.")
    } else if t.has_any(&["hate", "terrible", "awful", "worst", "disappointed", "useless"]) {
        (Sentiment::Negative, "The message has a negative tone.")
    } else if t.has_any(&["love", "great", "thanks", "thank you", "awesome", "excellent", "appreciate"]) {
        (Sentiment::Positive, "The message has a positive tone.")
    } else if t.has_any(&["curious", "wonder", "wondering", "excited", "fascinating", "fascinated"]) {
        (Sentiment::Curious, "The user is curious and eager to learn.")
    } else {
        (Sentiment::Neutral, "No strong emotional tone detected.")
    }
}

fn heuristic_style(t: &Text<'_>, intent: Intent) -> Style {
    if t.has_any(&["briefly", "brief", "short answer", "tl;dr", "in one sentence", "concise", "quick"]) {
        Style::Concise
    } else if t.has_any(&["in detail", "detailed", "thorough", "thoroughly", "explain fully", "comprehensive"]) {
        Style::Detailed
    } else if t.has_any(&["formal", "professional", "business"]) {
        Style::Formal
    } else if t.has_any(&["casual", "eli5", "like i'm five", "simple terms", "plain english"]) {
        Style::Casual
    } else if intent == Intent::Coding {
        Style::Technical
    } else {
        Style::Balanced
    }
}

fn heuristic_quality(t: &Text<'_>) -> PromptQuality {
    const ACTION_VERBS: &[&str] = &[
        "write", "explain", "list", "create", "summarize", "summarise", "compare", "fix",
        "implement", "describe", "generate", "translate", "give", "show", "help", "build", "find",
        "how", "what", "why", "can", "could",
    ];
    const OUTPUT_FORMS: &[&str] = &[
        "list", "table", "steps", "json", "example", "examples", "code", "bullet", "summary",
        "paragraph",
    ];
    const CONSTRAINTS: &[&str] = &[
        "must", "should", "at most", "at least", "exactly", "format", "limit", "without", "only",
    ];

    let words = t.word_count();
    let first_word = t.lower.split_whitespace().next().unwrap_or_default();
    let first_word = first_word.trim_matches(|c: char| !c.is_alphanumeric());
    let trimmed = t.raw.trim_end();

    let mut clarity: i32 = 50;
    if trimmed.contains('?') || ACTION_VERBS.contains(&first_word) {
        clarity += 15;
    }
    if (5..=150).contains(&words) {
        clarity += 15;
    }
    if words < 4 {
        clarity -= 20;
    }
    if trimmed.ends_with(['.', '?', '!']) {
        clarity += 10;
    }

    let mut specificity: i32 = 30 + (words.min(60) / 2) as i32;
    if t.raw.chars().any(|c| c.is_ascii_digit()) {
        specificity += 15;
    }
    if t.raw.contains('`') || t.raw.contains('"') {
        specificity += 15;
    }
    if t.has_any(CONSTRAINTS) {
        specificity += 10;
    }

    let mut actionability: i32 = 40;
    if ACTION_VERBS.contains(&first_word) {
        actionability += 30;
    }
    if t.has_any(OUTPUT_FORMS) {
        actionability += 15;
    }

    let clamp = |v: i32| v.clamp(0, 100) as u8;
    let (clarity, specificity, actionability) =
        (clamp(clarity), clamp(specificity), clamp(actionability));

    let mut suggestions = Vec::new();
    if clarity < 60 {
        suggestions.push("State the question or task explicitly.".to_string());
    }
    if specificity < 60 {
        suggestions.push("Add concrete details such as names, numbers, or examples.".to_string());
    }
    if actionability < 60 {
        suggestions.push("Say what form the answer should take, for example a list or code.".to_string());
    }
    if words < 8 {
        suggestions.push("Provide more context about what you are trying to achieve.".to_string());
    }

    let score = ((u32::from(clarity) + u32::from(specificity) + u32::from(actionability)) as f64 / 3.0)
        .round() as u8;
    PromptQuality {
        score,
        clarity,
        specificity,
        actionability,
        suggestions,
    }
}

fn merge_model_answer(result: &mut Classification, json: &Value) {
    let label = |key: &str| json.get(key).and_then(Value::as_str);
    let mut used_model = false;

    if let Some(intent) = label("intent").and_then(Intent::parse_label) {
        result.intent = intent;
        used_model = true;
    }
    if let Some(sentiment) = label("sentiment").and_then(Sentiment::parse_label) {
        result.sentiment = sentiment;
        used_model = true;
    }
    if let Some(detail) = label("sentimentDetail").map(str::trim).filter(|d| !d.is_empty()) {
        result.sentiment_detail = detail.to_string();
    }
    if let Some(style) = label("style").and_then(Style::parse_label) {
        result.style = style;
        used_model = true;
    }
    if let Some(quality) = json.get("promptQuality").filter(|q| q.is_object()) {
        let q = &mut result.prompt_quality;
        let mut field = |key: &str, slot: &mut u8| {
            if let Some(v) = json_score(quality.get(key), 100) {
                *slot = v;
                used_model = true;
            }
        };
        field("clarity", &mut q.clarity);
        field("specificity", &mut q.specificity);
        field("actionability", &mut q.actionability);
        field("score", &mut q.score);
        if let Some(list) = quality.get("suggestions").and_then(Value::as_array) {
            q.suggestions = list
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    if used_model {
        result.source = ClassificationSource::Model;
    }
}
