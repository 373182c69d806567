//! Versioned rule-set storage.
//!
//! Each scope (the organisation, or one user's override) keeps an
//! append-only history of published rule sets. Reverting republishes an
//! old version's content as a new version, so history is never rewritten.

use super::rules::{RouterError, RouterRule, RuleSet, RuleSetDraft};
use crate::registry::ModelAliasRegistry;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Which rule-set history an operation targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleScope {
    /// Organisation-wide rules.
    Org,
    /// A single user's override.
    User(String),
}

impl RuleScope {
    /// `User(id)` for `Some(id)`, otherwise `Org`.
    pub fn for_user(user_id: Option<&str>) -> Self {
        match user_id {
            Some(id) if !id.trim().is_empty() => RuleScope::User(id.to_string()),
            _ => RuleScope::Org,
        }
    }
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleScope::Org => f.write_str("org"),
            RuleScope::User(id) => write!(f, "user:{id}"),
        }
    }
}

impl Serialize for RuleScope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One published rule set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSetVersion {
    /// Scope it was published to.
    pub scope: RuleScope,
    /// Monotonic per scope, starting at 1.
    pub version: u32,
    /// Publication time.
    pub created_at: DateTime<Utc>,
    /// Who published it, if known.
    pub author: Option<String>,
    /// Free-text note ("reverted to v3", …).
    pub note: Option<String>,
    /// The rules.
    pub rule_set: RuleSet,
}

/// Difference between two versions of one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSetDiff {
    /// Rule ids present only in the newer version.
    pub added: Vec<String>,
    /// Rule ids present only in the older version.
    pub removed: Vec<String>,
    /// Rule ids present in both but with different content or position.
    pub changed: Vec<String>,
    /// Whether the catch-all list changed.
    pub catch_all_changed: bool,
}

impl RuleSetDiff {
    /// Whether the two versions are identical.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && !self.catch_all_changed
    }
}

/// Thread-safe, append-only store of rule-set versions.
#[derive(Default)]
pub struct RuleSetStore {
    histories: RwLock<HashMap<RuleScope, Vec<Arc<RuleSetVersion>>>>,
}

impl RuleSetStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and append a new version to `scope`.
    ///
    /// # Errors
    ///
    /// Returns the validation error from [`RuleSet::compile`]; nothing is
    /// stored in that case.
    pub fn publish(
        &self,
        scope: RuleScope,
        draft: RuleSetDraft,
        author: Option<String>,
        registry: &ModelAliasRegistry,
    ) -> Result<Arc<RuleSetVersion>, RouterError> {
        let rule_set = RuleSet::compile(draft, registry)?;
        Ok(self.append(scope, rule_set, author, None))
    }

    fn append(
        &self,
        scope: RuleScope,
        rule_set: RuleSet,
        author: Option<String>,
        note: Option<String>,
    ) -> Arc<RuleSetVersion> {
        let mut histories = self.histories.write();
        let history = histories.entry(scope.clone()).or_default();
        let version = history.last().map_or(1, |v| v.version + 1);
        let entry = Arc::new(RuleSetVersion {
            scope: scope.clone(),
            version,
            created_at: Utc::now(),
            author,
            note,
            rule_set,
        });
        history.push(Arc::clone(&entry));
        info!(
            scope = %scope,
            version = version,
            rules = entry.rule_set.rules().len(),
            "router: rule set published"
        );
        entry
    }

    /// Latest version in `scope`.
    pub fn current(&self, scope: &RuleScope) -> Option<Arc<RuleSetVersion>> {
        self.histories
            .read()
            .get(scope)
            .and_then(|h| h.last().cloned())
    }

    /// Every version in `scope`, oldest first.
    pub fn history(&self, scope: &RuleScope) -> Vec<Arc<RuleSetVersion>> {
        self.histories
            .read()
            .get(scope)
            .cloned()
            .unwrap_or_default()
    }

    /// A specific version.
    pub fn get(&self, scope: &RuleScope, version: u32) -> Option<Arc<RuleSetVersion>> {
        self.histories
            .read()
            .get(scope)
            .and_then(|h| h.iter().find(|v| v.version == version).cloned())
    }

    /// Republish `version` as the newest version of `scope`.
    ///
    /// The old content is re-validated against the current registry.
    ///
    /// # Errors
    ///
    /// [`RouterError::UnknownVersion`] if `version` does not exist, or the
    /// validation error if the old rules no longer resolve.
    pub fn revert(
        &self,
        scope: &RuleScope,
        version: u32,
        author: Option<String>,
        registry: &ModelAliasRegistry,
    ) -> Result<Arc<RuleSetVersion>, RouterError> {
        let target = self
            .get(scope, version)
            .ok_or_else(|| RouterError::UnknownVersion {
                scope: scope.to_string(),
                version,
            })?;
        let rule_set = RuleSet::compile(target.rule_set.to_draft(), registry)?;
        Ok(self.append(
            scope.clone(),
            rule_set,
            author,
            Some(format!("reverted to v{version}")),
        ))
    }

    /// Compare version `from` with version `to` within `scope`.
    ///
    /// # Errors
    ///
    /// [`RouterError::UnknownVersion`] if either version is missing.
    pub fn diff(&self, scope: &RuleScope, from: u32, to: u32) -> Result<RuleSetDiff, RouterError> {
        let missing = |version| RouterError::UnknownVersion {
            scope: scope.to_string(),
            version,
        };
        let old = self.get(scope, from).ok_or_else(|| missing(from))?;
        let new = self.get(scope, to).ok_or_else(|| missing(to))?;
        Ok(diff_rules(
            old.rule_set.rules(),
            new.rule_set.rules(),
            old.rule_set.catch_all() != new.rule_set.catch_all(),
        ))
    }
}

fn diff_rules(old: &[RouterRule], new: &[RouterRule], catch_all_changed: bool) -> RuleSetDiff {
    let position = |rules: &[RouterRule], id: &str| rules.iter().position(|r| r.id == id);
    let mut diff = RuleSetDiff {
        catch_all_changed,
        ..RuleSetDiff::default()
    };
    for (i, rule) in new.iter().enumerate() {
        match position(old, &rule.id) {
            None => diff.added.push(rule.id.clone()),
            Some(j) if j != i || old[j] != *rule => diff.changed.push(rule.id.clone()),
            Some(_) => {}
        }
    }
    for rule in old {
        if position(new, &rule.id).is_none() {
            diff.removed.push(rule.id.clone());
        }
    }
    diff
}
