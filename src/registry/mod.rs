//! # Model Alias Registry
//!
//! Maps stable aliases (`"gemini-pro"`, `"claude-sonnet"`, …) to the
//! concrete, versioned model identifiers that providers accept.
//!
//! ## Responsibility
//! - Resolve an alias to its currently active model id.
//! - Identify the family (and therefore provider and pricing) of any
//!   concrete id, including versions released after startup.
//! - Swap an alias to a newer model id at runtime, and back to defaults.
//!
//! ## Guarantees
//! - The family list is fixed at construction; only the active id of each
//!   family changes afterwards.
//! - Resolving a string that is not a known alias returns it unchanged.
//! - Updates are visible to every reader as soon as `update` returns.
//!
//! ## NOT Responsible For
//! - Deciding which alias to use for a request (see [`crate::routing`])
//! - Fetching provider catalogs (see [`discovery`])

pub mod discovery;

use crate::provider::ProviderKind;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

pub use discovery::{spawn_discovery, HttpModelCatalog, ModelCatalog};

/// Errors raised by [`ModelAliasRegistry`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The alias is not one of the registered families.
    #[error("unknown model alias '{0}'")]
    UnknownAlias(String),

    /// The proposed model id does not belong to the alias's family.
    #[error("model '{model}' does not match the '{alias}' family pattern")]
    PatternMismatch {
        /// Alias being updated.
        alias: String,
        /// Rejected model id.
        model: String,
    },

    /// A family pattern is not a valid regular expression.
    #[error("invalid pattern for family '{alias}': {reason}")]
    InvalidPattern {
        /// Family alias.
        alias: String,
        /// Compiler message.
        reason: String,
    },

    /// Two families share an alias.
    #[error("duplicate model alias '{0}'")]
    DuplicateAlias(String),
}

/// Static description of one provider × capability-tier family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelFamily {
    /// Stable alias, e.g. `"gemini-pro"`.
    pub alias: String,
    /// Provider serving this family.
    pub provider: ProviderKind,
    /// Regular expression recognising every version of this family.
    pub pattern: String,
    /// Model id used until discovery or an operator picks another.
    pub default_model: String,
    /// USD per million input tokens.
    pub input_price_per_mtok: f64,
    /// USD per million output tokens.
    pub output_price_per_mtok: f64,
    /// Maximum context window in tokens.
    pub context_window: u32,
    /// Short phrases describing what the family is good at.
    pub strengths: Vec<String>,
}

impl ModelFamily {
    #[allow(clippy::too_many_arguments)]
    fn builtin(
        alias: &str,
        provider: ProviderKind,
        pattern: &str,
        default_model: &str,
        prices: (f64, f64),
        context_window: u32,
        strengths: &[&str],
    ) -> Self {
        Self {
            alias: alias.to_string(),
            provider,
            pattern: pattern.to_string(),
            default_model: default_model.to_string(),
            input_price_per_mtok: prices.0,
            output_price_per_mtok: prices.1,
            context_window,
            strengths: strengths.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// The seven built-in families (three Anthropic, two OpenAI, two Google).
    pub fn builtin_families() -> Vec<ModelFamily> {
        use ProviderKind::{Anthropic, Google, OpenAi};
        vec![
            Self::builtin(
                "claude-opus",
                Anthropic,
                r"^claude-(?:\d+(?:[.-]\d+)*-)?opus(?:-\d+(?:[.-]\d+)*)?(?:-latest)?$",
                "claude-opus-4-1-20250805",
                (15.0, 75.0),
                200_000,
                &["deep reasoning", "complex code", "long-form analysis"],
            ),
            Self::builtin(
                "claude-sonnet",
                Anthropic,
                r"^claude-(?:\d+(?:[.-]\d+)*-)?sonnet(?:-\d+(?:[.-]\d+)*)?(?:-latest)?$",
                "claude-sonnet-4-5-20250929",
                (3.0, 15.0),
                200_000,
                &["coding", "careful writing", "instruction following"],
            ),
            Self::builtin(
                "claude-haiku",
                Anthropic,
                r"^claude-(?:\d+(?:[.-]\d+)*-)?haiku(?:-\d+(?:[.-]\d+)*)?(?:-latest)?$",
                "claude-haiku-4-5-20251001",
                (1.0, 5.0),
                200_000,
                &["fast answers", "low cost"],
            ),
            Self::builtin(
                "gpt-pro",
                OpenAi,
                r"^gpt-\d+(?:\.\d+)?o?(?:-\d{4}-\d{2}-\d{2})?$",
                "gpt-5",
                (1.25, 10.0),
                400_000,
                &["general knowledge", "tool-style reasoning", "coding"],
            ),
            Self::builtin(
                "gpt-mini",
                OpenAi,
                r"^gpt-\d+(?:\.\d+)?o?-mini(?:-\d{4}-\d{2}-\d{2})?$",
                "gpt-5-mini",
                (0.25, 2.0),
                400_000,
                &["fast answers", "low cost"],
            ),
            Self::builtin(
                "gemini-pro",
                Google,
                r"^gemini-\d+(?:\.\d+)?-pro(?:-[a-z0-9-]+)?$",
                "gemini-2.5-pro",
                (1.25, 10.0),
                1_048_576,
                &["research synthesis", "very long context", "multimodal reasoning"],
            ),
            Self::builtin(
                "gemini-flash",
                Google,
                r"^gemini-\d+(?:\.\d+)?-flash(?:-[a-z0-9-]+)?$",
                "gemini-2.5-flash",
                (0.30, 2.50),
                1_048_576,
                &["fast answers", "classification", "low cost"],
            ),
        ]
    }

    /// Estimated USD cost for the given token counts.
    pub fn cost_usd(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_price_per_mtok
            + output_tokens as f64 * self.output_price_per_mtok)
            / 1_000_000.0
    }
}

/// Public view of one alias, served by the alias API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasEntry {
    /// The alias.
    pub alias: String,
    /// Provider serving the family.
    pub provider: ProviderKind,
    /// Currently active model id.
    pub active_model: String,
    /// Model id restored by a reset.
    pub default_model: String,
    /// Whether the active id differs from the default.
    pub overridden: bool,
}

struct CompiledFamily {
    family: ModelFamily,
    matcher: Regex,
}

/// Thread-safe alias → model id registry.
pub struct ModelAliasRegistry {
    families: Vec<CompiledFamily>,
    active: RwLock<HashMap<String, String>>,
}

impl ModelAliasRegistry {
    /// Build a registry from an explicit family list.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidPattern`] if a pattern does not
    /// compile, or [`RegistryError::DuplicateAlias`] on a repeated alias.
    pub fn new(families: Vec<ModelFamily>) -> Result<Self, RegistryError> {
        let mut compiled: Vec<CompiledFamily> = Vec::with_capacity(families.len());
        let mut active = HashMap::new();
        for family in families {
            if compiled.iter().any(|c| c.family.alias == family.alias) {
                return Err(RegistryError::DuplicateAlias(family.alias));
            }
            let matcher = Regex::new(&family.pattern).map_err(|e| RegistryError::InvalidPattern {
                alias: family.alias.clone(),
                reason: e.to_string(),
            })?;
            active.insert(family.alias.clone(), family.default_model.clone());
            compiled.push(CompiledFamily { family, matcher });
        }
        Ok(Self {
            families: compiled,
            active: RwLock::new(active),
        })
    }

    /// Build a registry with [`ModelFamily::builtin_families`].
    ///
    /// # Errors
    ///
    /// Only fails if a built-in pattern is malformed.
    pub fn with_builtin_families() -> Result<Self, RegistryError> {
        Self::new(ModelFamily::builtin_families())
    }

    /// Active model id for `alias`, or `alias` itself if it is not an alias.
    pub fn resolve(&self, alias: &str) -> String {
        self.active
            .read()
            .get(alias)
            .cloned()
            .unwrap_or_else(|| alias.to_string())
    }

    /// Whether `alias` names a registered family.
    pub fn is_alias(&self, alias: &str) -> bool {
        self.families.iter().any(|c| c.family.alias == alias)
    }

    /// Whether `name` is usable in a routing priority list: either an alias
    /// or a concrete id that belongs to a known family.
    pub fn is_routable(&self, name: &str) -> bool {
        self.is_alias(name) || self.reverse_lookup(name).is_some()
    }

    /// Family of a concrete model id.
    ///
    /// Exact matches against active and default ids win; otherwise the
    /// first family whose pattern matches is returned, which covers
    /// versions that did not exist when the registry was built.
    pub fn reverse_lookup(&self, model_id: &str) -> Option<&ModelFamily> {
        {
            let active = self.active.read();
            if let Some(c) = self.families.iter().find(|c| {
                c.family.default_model == model_id
                    || active.get(&c.family.alias).map(String::as_str) == Some(model_id)
            }) {
                return Some(&c.family);
            }
        }
        self.families
            .iter()
            .find(|c| c.matcher.is_match(model_id))
            .map(|c| &c.family)
    }

    /// Family for an alias or concrete id.
    pub fn family_of(&self, name: &str) -> Option<&ModelFamily> {
        self.family(name).or_else(|| self.reverse_lookup(name))
    }

    /// Family registered under `alias`.
    pub fn family(&self, alias: &str) -> Option<&ModelFamily> {
        self.families
            .iter()
            .find(|c| c.family.alias == alias)
            .map(|c| &c.family)
    }

    /// Every family, in registration order.
    pub fn families(&self) -> impl Iterator<Item = &ModelFamily> {
        self.families.iter().map(|c| &c.family)
    }

    /// Whether `model_id` belongs to the family registered as `alias`.
    pub fn matches_family(&self, alias: &str, model_id: &str) -> bool {
        self.families
            .iter()
            .any(|c| c.family.alias == alias && c.matcher.is_match(model_id))
    }

    /// Point `alias` at `model_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownAlias`] for an unregistered alias and
    /// [`RegistryError::PatternMismatch`] if `model_id` is not a member of
    /// the alias's family.
    pub fn update(&self, alias: &str, model_id: &str) -> Result<(), RegistryError> {
        let family = self
            .families
            .iter()
            .find(|c| c.family.alias == alias)
            .ok_or_else(|| RegistryError::UnknownAlias(alias.to_string()))?;
        if !family.matcher.is_match(model_id) {
            return Err(RegistryError::PatternMismatch {
                alias: alias.to_string(),
                model: model_id.to_string(),
            });
        }
        let previous = self
            .active
            .write()
            .insert(alias.to_string(), model_id.to_string());
        info!(
            alias = alias,
            previous = previous.as_deref().unwrap_or(""),
            model = model_id,
            "registry: alias updated"
        );
        Ok(())
    }

    /// Restore every alias to its family default.
    pub fn reset_to_defaults(&self) {
        let mut active = self.active.write();
        for c in &self.families {
            active.insert(c.family.alias.clone(), c.family.default_model.clone());
        }
        info!("registry: all aliases reset to defaults");
    }

    /// Snapshot of every alias and its active id.
    pub fn snapshot(&self) -> Vec<AliasEntry> {
        let active = self.active.read();
        self.families
            .iter()
            .map(|c| {
                let current = active
                    .get(&c.family.alias)
                    .cloned()
                    .unwrap_or_else(|| c.family.default_model.clone());
                AliasEntry {
                    alias: c.family.alias.clone(),
                    provider: c.family.provider,
                    overridden: current != c.family.default_model,
                    active_model: current,
                    default_model: c.family.default_model.clone(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ModelAliasRegistry {
        ModelAliasRegistry::with_builtin_families().expect("built-in families must compile")
    }

    #[test]
    fn test_builtin_defaults_match_their_own_pattern() {
        let reg = registry();
        for family in reg.families() {
            assert!(
                reg.matches_family(&family.alias, &family.default_model),
                "{} default {} must match its pattern",
                family.alias,
                family.default_model
            );
        }
    }

    #[test]
    fn test_resolve_alias_and_passthrough() {
        let reg = registry();
        assert_eq!(reg.resolve("gemini-pro"), "gemini-2.5-pro");
        assert_eq!(reg.resolve("some-custom-model"), "some-custom-model");
    }

    #[test]
    fn test_update_then_reset() {
        let reg = registry();
        assert!(reg.update("gemini-pro", "gemini-3-pro-preview").is_ok());
        assert_eq!(reg.resolve("gemini-pro"), "gemini-3-pro-preview");

        reg.reset_to_defaults();
        assert_eq!(reg.resolve("gemini-pro"), "gemini-2.5-pro");
    }

    #[test]
    fn test_update_rejects_unknown_alias_and_foreign_model() {
        let reg = registry();
        assert_eq!(
            reg.update("nope", "gpt-5"),
            Err(RegistryError::UnknownAlias("nope".into()))
        );
        assert!(matches!(
            reg.update("gemini-pro", "gpt-5"),
            Err(RegistryError::PatternMismatch { .. })
        ));
    }

    #[test]
    fn test_reverse_lookup_recognises_future_versions() {
        let reg = registry();
        let cases = [
            ("claude-opus-5", "claude-opus"),
            ("claude-3-opus-20240229", "claude-opus"),
            ("claude-sonnet-4-20250514", "claude-sonnet"),
            ("gpt-6", "gpt-pro"),
            ("gpt-4o-mini", "gpt-mini"),
            ("gemini-3.0-flash", "gemini-flash"),
        ];
        for (model, alias) in cases {
            assert_eq!(
                reg.reverse_lookup(model).map(|f| f.alias.as_str()),
                Some(alias),
                "{model}"
            );
        }
        assert!(reg.reverse_lookup("llama-3-70b").is_none());
    }

    #[test]
    fn test_mini_is_not_claimed_by_pro_family() {
        let reg = registry();
        assert!(!reg.matches_family("gpt-pro", "gpt-5-mini"));
    }

    #[test]
    fn test_snapshot_flags_overrides() {
        let reg = registry();
        let _ = reg.update("claude-haiku", "claude-haiku-5");
        let snap = reg.snapshot();
        let haiku = snap.iter().find(|e| e.alias == "claude-haiku");
        assert!(haiku.map(|e| e.overridden).unwrap_or(false));
        assert!(snap.iter().filter(|e| e.overridden).count() == 1);
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let mut families = ModelFamily::builtin_families();
        families.push(families[0].clone());
        assert!(matches!(
            ModelAliasRegistry::new(families),
            Err(RegistryError::DuplicateAlias(_))
        ));
    }

    #[test]
    fn test_cost_usd_uses_per_million_prices() {
        let reg = registry();
        let fam = reg.family("claude-sonnet").cloned();
        let cost = fam.map(|f| f.cost_usd(1_000_000, 100_000)).unwrap_or(0.0);
        assert!((cost - 4.5).abs() < 1e-9);
    }
}
