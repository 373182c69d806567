//! Periodic model discovery.
//!
//! Lists each provider's model catalog and promotes an alias to the newest
//! stable id that belongs to its family. Preview, experimental and
//! `-latest` ids are never promoted automatically.

use super::ModelAliasRegistry;
use crate::provider::{check_status, map_transport_error, ProviderError, ProviderKind};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Source of the model ids a provider currently offers.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    /// Every model id `provider` lists.
    async fn list_models(&self, provider: ProviderKind) -> Result<Vec<String>, ProviderError>;
}

/// One alias promotion made by [`refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasChange {
    /// Alias that moved.
    pub alias: String,
    /// Previous active id.
    pub from: String,
    /// New active id.
    pub to: String,
}

/// Check every provider's catalog and promote aliases to newer versions.
///
/// Providers whose catalog call fails are skipped; the error is logged.
pub async fn refresh(registry: &ModelAliasRegistry, catalog: &dyn ModelCatalog) -> Vec<AliasChange> {
    let mut listings: HashMap<ProviderKind, Vec<String>> = HashMap::new();
    for kind in ProviderKind::ALL {
        if !registry.families().any(|f| f.provider == kind) {
            continue;
        }
        match catalog.list_models(kind).await {
            Ok(models) => {
                debug!(provider = %kind, count = models.len(), "discovery: catalog listed");
                listings.insert(kind, models);
            }
            Err(e) => warn!(provider = %kind, error = %e, "discovery: catalog unavailable"),
        }
    }

    let mut changes = Vec::new();
    let families: Vec<(String, ProviderKind)> = registry
        .families()
        .map(|f| (f.alias.clone(), f.provider))
        .collect();
    for (alias, provider) in families {
        let Some(models) = listings.get(&provider) else {
            continue;
        };
        let current = registry.resolve(&alias);
        let newest = models
            .iter()
            .filter(|m| is_stable(m) && registry.matches_family(&alias, m))
            .max_by(|a, b| version_key(a).cmp(&version_key(b)));
        let Some(newest) = newest else {
            continue;
        };
        if version_key(newest) > version_key(&current) && registry.update(&alias, newest).is_ok() {
            info!(alias = %alias, from = %current, to = %newest, "discovery: alias promoted");
            changes.push(AliasChange {
                alias,
                from: current,
                to: newest.clone(),
            });
        }
    }
    changes
}

/// Run [`refresh`] every `interval` until `cancel` fires.
pub fn spawn_discovery(
    registry: Arc<ModelAliasRegistry>,
    catalog: Arc<dyn ModelCatalog>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let changes = refresh(&registry, catalog.as_ref()).await;
                    info!(promoted = changes.len(), "discovery: refresh complete");
                }
            }
        }
        info!("discovery task stopped");
    })
}

fn is_stable(model: &str) -> bool {
    let lower = model.to_ascii_lowercase();
    !["preview", "exp", "latest", "beta", "alpha"]
        .iter()
        .any(|tag| lower.contains(tag))
}

/// Numeric components of a model id, compared lexicographically, with
/// snapshot dates (eight or more digits) ranked after the version numbers.
///
/// `gemini-2.5-pro` → `([2, 5], [])`, `claude-sonnet-4-5-20250929` →
/// `([4, 5], [20250929])`.
fn version_key(model: &str) -> (Vec<u64>, Vec<u64>) {
    let (dates, versions): (Vec<&str>, Vec<&str>) = model
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .partition(|s| s.len() >= 8);
    let parse = |parts: Vec<&str>| -> Vec<u64> {
        parts.into_iter().filter_map(|s| s.parse().ok()).collect()
    };
    (parse(versions), parse(dates))
}

// ── HTTP catalog ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DataList {
    #[serde(default)]
    data: Vec<IdEntry>,
}

#[derive(Debug, Deserialize)]
struct IdEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GeminiList {
    #[serde(default)]
    models: Vec<GeminiEntry>,
}

#[derive(Debug, Deserialize)]
struct GeminiEntry {
    name: String,
}

/// [`ModelCatalog`] backed by the providers' list-models endpoints, using
/// the server keys.
pub struct HttpModelCatalog {
    client: reqwest::Client,
    keys: HashMap<ProviderKind, String>,
    base_urls: HashMap<ProviderKind, String>,
}

impl HttpModelCatalog {
    /// Catalog using keys from the provider environment variables.
    pub fn from_env() -> Self {
        let keys = ProviderKind::ALL
            .into_iter()
            .filter_map(|k| std::env::var(k.env_var()).ok().map(|v| (k, v)))
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();
        Self {
            client: reqwest::Client::new(),
            keys,
            base_urls: HashMap::new(),
        }
    }

    /// Catalog with explicit keys.
    pub fn new(keys: HashMap<ProviderKind, String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            keys,
            base_urls: HashMap::new(),
        }
    }

    /// Override a provider's API base URL.
    pub fn with_base_url(mut self, kind: ProviderKind, url: impl Into<String>) -> Self {
        self.base_urls
            .insert(kind, url.into().trim_end_matches('/').to_string());
        self
    }

    fn base(&self, kind: ProviderKind) -> &str {
        self.base_urls
            .get(&kind)
            .map(String::as_str)
            .unwrap_or(match kind {
                ProviderKind::OpenAi => "https://api.openai.com/v1",
                ProviderKind::Anthropic => "https://api.anthropic.com",
                ProviderKind::Google => "https://generativelanguage.googleapis.com",
            })
    }
}

#[async_trait]
impl ModelCatalog for HttpModelCatalog {
    async fn list_models(&self, provider: ProviderKind) -> Result<Vec<String>, ProviderError> {
        let key = self
            .keys
            .get(&provider)
            .ok_or(ProviderError::MissingCredentials(provider))?;
        let base = self.base(provider);
        let request = match provider {
            ProviderKind::OpenAi => self.client.get(format!("{base}/models")).bearer_auth(key),
            ProviderKind::Anthropic => self
                .client
                .get(format!("{base}/v1/models"))
                .header("x-api-key", key)
                .header("anthropic-version", "2023-06-01"),
            ProviderKind::Google => self
                .client
                .get(format!("{base}/v1beta/models"))
                .header("x-goog-api-key", key),
        };
        let response = request
            .timeout(Duration::from_secs(20))
            .send()
            .await
            .map_err(|e| map_transport_error(provider, e))?;
        let response = check_status(provider, response).await?;

        let ids = match provider {
            ProviderKind::OpenAi | ProviderKind::Anthropic => response
                .json::<DataList>()
                .await
                .map_err(|e| map_transport_error(provider, e))?
                .data
                .into_iter()
                .map(|e| e.id)
                .collect(),
            ProviderKind::Google => response
                .json::<GeminiList>()
                .await
                .map_err(|e| map_transport_error(provider, e))?
                .models
                .into_iter()
                .map(|e| e.name.trim_start_matches("models/").to_string())
                .collect(),
        };
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedCatalog(HashMap<ProviderKind, Result<Vec<String>, ProviderError>>);

    #[async_trait]
    impl ModelCatalog for FixedCatalog {
        async fn list_models(&self, provider: ProviderKind) -> Result<Vec<String>, ProviderError> {
            self.0
                .get(&provider)
                .cloned()
                .unwrap_or(Ok(Vec::new()))
        }
    }

    fn registry() -> ModelAliasRegistry {
        ModelAliasRegistry::with_builtin_families().expect("built-ins compile")
    }

    #[test]
    fn test_version_key_orders_numerically() {
        assert!(version_key("gemini-3-pro") > version_key("gemini-2.5-pro"));
        assert!(version_key("gpt-10") > version_key("gpt-9"));
        assert!(
            version_key("claude-sonnet-4-5-20250929") > version_key("claude-sonnet-4-20250514")
        );
    }

    #[tokio::test]
    async fn test_refresh_promotes_newest_stable_member() {
        let reg = registry();
        let catalog = FixedCatalog(HashMap::from([(
            ProviderKind::Google,
            Ok(vec![
                "gemini-2.5-pro".to_string(),
                "gemini-3.0-pro".to_string(),
                "gemini-3.5-pro-preview".to_string(),
                "text-embedding-004".to_string(),
            ]),
        )]));

        let changes = refresh(&reg, &catalog).await;
        assert_eq!(reg.resolve("gemini-pro"), "gemini-3.0-pro");
        assert!(changes.iter().any(|c| c.alias == "gemini-pro" && c.to == "gemini-3.0-pro"));
        // Nothing newer for flash in the listing.
        assert_eq!(reg.resolve("gemini-flash"), "gemini-2.5-flash");
    }

    #[tokio::test]
    async fn test_refresh_never_downgrades() {
        let reg = registry();
        let catalog = FixedCatalog(HashMap::from([(
            ProviderKind::OpenAi,
            Ok(vec!["gpt-4o".to_string(), "gpt-4.1".to_string()]),
        )]));
        let changes = refresh(&reg, &catalog).await;
        assert!(changes.is_empty());
        assert_eq!(reg.resolve("gpt-pro"), "gpt-5");
    }

    #[tokio::test]
    async fn test_refresh_skips_failing_catalog() {
        let reg = registry();
        let catalog = FixedCatalog(HashMap::from([(
            ProviderKind::Anthropic,
            Err(ProviderError::Timeout {
                provider: ProviderKind::Anthropic,
            }),
        )]));
        assert!(refresh(&reg, &catalog).await.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_discovery_stops_on_cancel() {
        let reg = Arc::new(registry());
        let catalog: Arc<dyn ModelCatalog> = Arc::new(FixedCatalog(HashMap::new()));
        let cancel = CancellationToken::new();
        let handle = spawn_discovery(reg, catalog, Duration::from_secs(3600), cancel.clone());
        cancel.cancel();
        let joined = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(joined.is_ok());
    }
}
