//! Deep-research detection.
//!
//! A single yes/no model call decides whether a message needs multi-source
//! research. Answers that are neither yes nor no fall back to a keyword
//! check.

use crate::provider::{GenerationParams, ModelProvider};
use serde::Serialize;
use tracing::{debug, warn};

/// System prompt of the yes/no call.
pub const RESEARCH_PROMPT: &str = "Decide whether the user's request needs in-depth, multi-source \
research (literature review, comparison of many sources, citations, current state of a field) \
rather than a direct answer. Reply with exactly one word: yes or no.";

const RESEARCH_TERMS: &[&str] = &[
    "research",
    "literature",
    "sources",
    "citations",
    "cite",
    "peer-reviewed",
    "peer reviewed",
    "state of the art",
    "state-of-the-art",
    "systematic review",
    "meta-analysis",
    "comprehensive overview",
    "in-depth analysis",
    "survey of",
    "latest studies",
];

/// Result of a research classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchClassification {
    /// Whether the message calls for deep research.
    pub is_research: bool,
    /// Whether the model answered (false means the keyword fallback ran).
    pub model_decided: bool,
    /// Raw model reply, kept for cost accounting even when unparseable.
    #[serde(skip)]
    pub answer: Option<String>,
}

/// Yes/no research classifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResearchClassifier;

impl ResearchClassifier {
    /// Classifier instance.
    pub fn new() -> Self {
        Self
    }

    /// Classify `message`.
    pub async fn classify(
        &self,
        message: &str,
        model: Option<&dyn ModelProvider>,
    ) -> ResearchClassification {
        if let Some(provider) = model {
            let params = GenerationParams {
                temperature: 0.0,
                max_tokens: 5,
                top_p: 1.0,
            };
            match provider.generate(RESEARCH_PROMPT, message, &params).await {
                Ok(answer) => {
                    if let Some(is_research) = parse_yes_no(&answer) {
                        return ResearchClassification {
                            is_research,
                            model_decided: true,
                            answer: Some(answer),
                        };
                    }
                    debug!("research: unparseable answer, using keywords");
                    return ResearchClassification {
                        is_research: Self::keyword_heuristic(message),
                        model_decided: false,
                        answer: Some(answer),
                    };
                }
                Err(e) => {
                    warn!(provider = %provider.kind(), error = %e, "research: model call failed, using keywords")
                }
            }
        }
        ResearchClassification {
            is_research: Self::keyword_heuristic(message),
            model_decided: false,
            answer: None,
        }
    }

    /// Keyword fallback.
    pub fn keyword_heuristic(message: &str) -> bool {
        let lower = message.to_lowercase();
        RESEARCH_TERMS.iter().any(|t| lower.contains(t))
    }
}

fn parse_yes_no(answer: &str) -> Option<bool> {
    let first = answer
        .split(|c: char| !c.is_alphabetic())
        .find(|w| !w.is_empty())?
        .to_ascii_lowercase();
    match first.as_str() {
        "yes" | "true" => Some(true),
        "no" | "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderKind, ScriptStep, ScriptedProvider};

    fn model(answer: &str) -> ScriptedProvider {
        ScriptedProvider::new(ProviderKind::OpenAi, "gpt-5-mini").with_steps([ScriptStep::reply(answer)])
    }

    #[test]
    fn test_parse_yes_no() {
        assert_eq!(parse_yes_no("Yes."), Some(true));
        assert_eq!(parse_yes_no("  no"), Some(false));
        assert_eq!(parse_yes_no("**YES**"), Some(true));
        assert_eq!(parse_yes_no("maybe"), None);
        assert_eq!(parse_yes_no(""), None);
    }

    #[tokio::test]
    async fn test_model_answer_wins() {
        let m = model("No");
        let r = ResearchClassifier::new()
            .classify("Write a literature review on sleep", Some(&m))
            .await;
        assert!(!r.is_research);
        assert!(r.model_decided);
    }

    #[tokio::test]
    async fn test_unparseable_answer_uses_keywords() {
        let m = model("It depends on what you mean");
        let r = ResearchClassifier::new()
            .classify("Give me a systematic review of intermittent fasting", Some(&m))
            .await;
        assert!(r.is_research);
        assert!(!r.model_decided);
        assert_eq!(r.answer.as_deref(), Some("It depends on what you mean"));
    }

    #[tokio::test]
    async fn test_no_model_uses_keywords() {
        let r = ResearchClassifier::new().classify("what's 2 + 2", None).await;
        assert!(!r.is_research);
        assert!(r.answer.is_none());
    }
}
