//! # Stage: Model Routing
//!
//! ## Responsibility
//! Turn the analysis of a request into an ordered list of candidate models.
//! Operators maintain versioned rule sets (organisation-wide, optionally
//! overridden per user); the first matching rule's priority list is resolved
//! through the alias registry.
//!
//! ## Guarantees
//! - Deterministic: the same features against the same rule-set version and
//!   registry state always produce the same candidate list.
//! - Every published rule set has been validated: each priority entry
//!   resolves to a known model family.
//! - Rule-set history is append-only; revert publishes a new version.
//!
//! ## NOT Responsible For
//! - Calling the models (see [`crate::engine`])
//! - Classifying the request (see [`crate::analysis`])

pub mod cost_tracker;
pub mod router;
pub mod rules;
pub mod scorer;
pub mod store;

// Re-exports for convenience
pub use cost_tracker::{estimate_tokens, CostSnapshot, CostTracker, GenerationCost};
pub use router::{Candidate, ModelRouter, RoutingDecision};
pub use rules::{
    RequestFeatures, RouterError, RouterRule, RuleConditions, RuleSet, RuleSetDraft,
};
pub use scorer::{Complexity, ComplexityScorer, ScoreBreakdown};
pub use store::{RuleScope, RuleSetDiff, RuleSetStore, RuleSetVersion};
