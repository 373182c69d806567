//! Analysis vocabulary shared by the classifier, router, optimizer and
//! validator.

use crate::routing::Complexity;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// What the user is trying to do. Closed set; also the router's task type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// Write, fix or explain code.
    Coding,
    /// Stories, poems, marketing copy.
    Creative,
    /// Compare, evaluate, reason about data.
    Analytical,
    /// Short factual lookup.
    Factual,
    /// Multi-source investigation with citations.
    Research,
    /// Step-by-step how-to.
    Instructional,
    /// Small talk.
    Conversational,
    /// Anything else.
    #[default]
    Other,
}

impl Intent {
    /// Every intent.
    pub const ALL: [Intent; 8] = [
        Intent::Coding,
        Intent::Creative,
        Intent::Analytical,
        Intent::Factual,
        Intent::Research,
        Intent::Instructional,
        Intent::Conversational,
        Intent::Other,
    ];

    /// Parse a model-supplied label, tolerating case and common synonyms.
    pub fn parse_label(label: &str) -> Option<Self> {
        let l = label.trim().to_ascii_lowercase();
        let intent = match l.as_str() {
            "coding" | "code" | "programming" | "debugging" => Intent::Coding,
            "creative" | "creative_writing" | "writing" => Intent::Creative,
            "analytical" | "analysis" | "comparison" => Intent::Analytical,
            "factual" | "question" | "fact" | "lookup" => Intent::Factual,
            "research" | "deep_research" => Intent::Research,
            "instructional" | "how_to" | "howto" | "tutorial" => Intent::Instructional,
            "conversational" | "chat" | "greeting" | "small_talk" => Intent::Conversational,
            "other" => Intent::Other,
            _ => return None,
        };
        Some(intent)
    }
}

/// Emotional tone of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    /// Positive tone.
    Positive,
    /// No discernible tone.
    #[default]
    Neutral,
    /// Negative tone.
    Negative,
    /// User is stuck or annoyed.
    Frustrated,
    /// User is excited or eager.
    Curious,
}

impl Sentiment {
    /// Parse a model-supplied label.
    pub fn parse_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "positive" => Some(Sentiment::Positive),
            "neutral" => Some(Sentiment::Neutral),
            "negative" => Some(Sentiment::Negative),
            "frustrated" | "angry" | "annoyed" => Some(Sentiment::Frustrated),
            "curious" | "excited" | "eager" => Some(Sentiment::Curious),
            _ => None,
        }
    }
}

/// Preferred answer style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    /// Brief, to the point.
    Concise,
    /// Thorough, with explanation.
    Detailed,
    /// Precise, jargon allowed.
    Technical,
    /// Relaxed and friendly.
    Casual,
    /// Professional register.
    Formal,
    /// No strong preference.
    #[default]
    Balanced,
}

impl Style {
    /// Parse a model-supplied label.
    pub fn parse_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "concise" | "brief" | "short" => Some(Style::Concise),
            "detailed" | "thorough" | "verbose" => Some(Style::Detailed),
            "technical" => Some(Style::Technical),
            "casual" | "informal" => Some(Style::Casual),
            "formal" | "professional" => Some(Style::Formal),
            "balanced" | "neutral" => Some(Style::Balanced),
            _ => None,
        }
    }
}

/// Quality assessment of the user's prompt. Scores are 0–100.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PromptQuality {
    /// Overall score.
    pub score: u8,
    /// How unambiguous the request is.
    pub clarity: u8,
    /// How much concrete detail it gives.
    pub specificity: u8,
    /// Whether it asks for something the model can act on.
    pub actionability: u8,
    /// Ways the user could improve the prompt.
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// The accumulated analysis for one job.
///
/// Built up phase by phase. Security fields may only be raised, never
/// lowered, once set.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Task type.
    pub intent: Intent,
    /// Tone.
    pub sentiment: Sentiment,
    /// One-line explanation of the tone.
    pub sentiment_detail: String,
    /// Preferred answer style.
    pub style: Style,
    /// Heuristic complexity.
    pub complexity: Option<Complexity>,
    /// Effective security score, 0–10.
    pub security_score: u8,
    /// Why the score is what it is.
    pub security_explanation: String,
    /// Prompt quality.
    pub prompt_quality: PromptQuality,
}

impl AnalysisResult {
    /// Raise the security score; lower values are ignored.
    ///
    /// Returns `true` if the stored score changed.
    pub fn raise_security(&mut self, score: u8, explanation: impl Into<String>) -> bool {
        let score = score.min(10);
        let first = score == self.security_score && self.security_explanation.is_empty();
        if score > self.security_score || first {
            self.security_score = score;
            self.security_explanation = explanation.into();
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_score_is_raise_only() {
        let mut a = AnalysisResult::default();
        assert!(a.raise_security(6, "heuristic"));
        assert!(!a.raise_security(3, "lower"));
        assert_eq!(a.security_score, 6);
        assert_eq!(a.security_explanation, "heuristic");
        assert!(a.raise_security(9, "model"));
        assert_eq!(a.security_score, 9);
        assert!(a.raise_security(42, "clamped"));
        assert_eq!(a.security_score, 10);
    }

    #[test]
    fn test_label_parsing_is_forgiving() {
        assert_eq!(Intent::parse_label(" Code "), Some(Intent::Coding));
        assert_eq!(Intent::parse_label("how_to"), Some(Intent::Instructional));
        assert_eq!(Intent::parse_label("astrology"), None);
        assert_eq!(Sentiment::parse_label("ANGRY"), Some(Sentiment::Frustrated));
        assert_eq!(Style::parse_label("brief"), Some(Style::Concise));
    }

    #[test]
    fn test_analysis_serializes_camel_case() {
        let json = serde_json::to_value(AnalysisResult::default()).unwrap_or_default();
        assert!(json.get("securityScore").is_some());
        assert!(json.get("promptQuality").is_some());
        assert_eq!(json["intent"], "other");
    }
}
