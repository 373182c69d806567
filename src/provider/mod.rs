//! Model provider abstraction and implementations
//!
//! Provides the [`ModelProvider`] trait and the HTTP clients behind it:
//! - [`OpenAiProvider`]: OpenAI chat completions (streaming)
//! - [`AnthropicProvider`]: Anthropic messages API (streaming)
//! - [`GeminiProvider`]: Google Gemini `generateContent`
//! - [`ScriptedProvider`]: deterministic, offline provider for tests and demos
//!
//! Providers are bound to one concrete model id at construction. The
//! [`ProviderFactory`] builds them per request so that caller-supplied API
//! keys take precedence over the server's own keys.
//!
//! ## Environment Variables
//!
//! - `OPENAI_API_KEY`: server key for OpenAI
//! - `ANTHROPIC_API_KEY`: server key for Anthropic
//! - `GEMINI_API_KEY`: server key for Google Gemini

mod anthropic;
mod gemini;
mod openai;
mod scripted;
mod sse;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use scripted::{ScriptStep, ScriptedProvider, ScriptedProviderFactory};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Stream of generated text fragments, in order.
pub type TokenStream = BoxStream<'static, Result<String, ProviderError>>;

/// Upstream LLM vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProviderKind {
    /// OpenAI.
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic.
    #[serde(rename = "anthropic")]
    Anthropic,
    /// Google Gemini.
    #[serde(rename = "google", alias = "gemini")]
    Google,
}

impl ProviderKind {
    /// Every supported provider.
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Google,
    ];

    /// Stable lowercase name, also used as a metrics label.
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
        }
    }

    /// Keys under which a client may supply its own credential.
    fn key_names(self) -> &'static [&'static str] {
        match self {
            ProviderKind::OpenAi => &["openai"],
            ProviderKind::Anthropic => &["anthropic"],
            ProviderKind::Google => &["google", "gemini"],
        }
    }

    /// Environment variable holding the server credential.
    pub fn env_var(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Google => "GEMINI_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    /// Sampling temperature.
    pub temperature: f32,
    /// Output token ceiling.
    pub max_tokens: u32,
    /// Nucleus sampling mass.
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
            top_p: 0.9,
        }
    }
}

/// Failure of a single provider call.
///
/// Every variant except [`ProviderError::Cancelled`] is a provider fault:
/// the caller should move on to the next candidate model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The call exceeded its deadline.
    #[error("{provider} request timed out")]
    Timeout {
        /// Provider that timed out.
        provider: ProviderKind,
    },

    /// The provider answered with a client-side error status.
    #[error("{provider} rejected the request with status {status}: {message}")]
    Rejected {
        /// Provider that rejected the call.
        provider: ProviderKind,
        /// HTTP status code.
        status: u16,
        /// Truncated error body.
        message: String,
    },

    /// The provider could not be reached or returned a server error.
    #[error("{provider} unavailable: {message}")]
    Unavailable {
        /// Provider that failed.
        provider: ProviderKind,
        /// Cause.
        message: String,
    },

    /// The response could not be decoded.
    #[error("{provider} returned a malformed response: {message}")]
    Malformed {
        /// Provider that answered.
        provider: ProviderKind,
        /// Decoding failure.
        message: String,
    },

    /// Neither the request nor the server carries a key for this provider.
    #[error("no API key configured for {0}")]
    MissingCredentials(ProviderKind),

    /// The provider's circuit breaker is open.
    #[error("{0} circuit breaker is open")]
    CircuitOpen(ProviderKind),

    /// The caller cancelled the job while the call was in flight.
    #[error("generation cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether this failure should advance to the next candidate.
    pub fn is_provider_fault(&self) -> bool {
        !matches!(self, ProviderError::Cancelled)
    }

    /// Short label for metrics and logs.
    pub fn err_type(&self) -> &'static str {
        match self {
            ProviderError::Timeout { .. } => "timeout",
            ProviderError::Rejected { .. } => "rejected",
            ProviderError::Unavailable { .. } => "unavailable",
            ProviderError::Malformed { .. } => "malformed",
            ProviderError::MissingCredentials(_) => "missing_credentials",
            ProviderError::CircuitOpen(_) => "circuit_open",
            ProviderError::Cancelled => "cancelled",
        }
    }
}

/// Caller-supplied provider credentials.
///
/// `Debug` prints only which providers have keys, never the keys.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApiKeys(HashMap<String, String>);

impl ApiKeys {
    /// Build from `(provider name, key)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Non-blank key for `kind`, if the caller supplied one.
    pub fn get(&self, kind: ProviderKind) -> Option<&str> {
        kind.key_names()
            .iter()
            .filter_map(|name| self.0.get(*name))
            .map(|k| k.trim())
            .find(|k| !k.is_empty())
    }

    /// Whether no usable key was supplied.
    pub fn is_empty(&self) -> bool {
        ProviderKind::ALL.iter().all(|k| self.get(*k).is_none())
    }
}

impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present: Vec<&str> = ProviderKind::ALL
            .iter()
            .filter(|k| self.get(**k).is_some())
            .map(|k| k.as_str())
            .collect();
        f.debug_tuple("ApiKeys").field(&present).finish()
    }
}

/// Trait for LLM providers bound to one model id.
///
/// Implementations must be thread-safe (Send + Sync) for use across tasks.
/// The trait is object-safe to allow dynamic dispatch via
/// `Arc<dyn ModelProvider>`.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Vendor behind this provider.
    fn kind(&self) -> ProviderKind;

    /// Concrete model id this provider calls.
    fn model(&self) -> &str;

    /// Generate a complete response.
    async fn generate(
        &self,
        system: &str,
        user: &str,
        params: &GenerationParams,
    ) -> Result<String, ProviderError>;

    /// Generate a response as an ordered stream of text fragments.
    ///
    /// The default implementation yields the whole [`Self::generate`]
    /// result as a single fragment.
    async fn generate_stream(
        &self,
        system: &str,
        user: &str,
        params: &GenerationParams,
    ) -> Result<TokenStream, ProviderError> {
        let text = self.generate(system, user, params).await?;
        Ok(stream::once(async move { Ok(text) }).boxed())
    }
}

/// Builds providers for a given model and credential set.
pub trait ProviderFactory: Send + Sync {
    /// Create a provider for `model` on `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::MissingCredentials`] when no key is available.
    fn create(
        &self,
        kind: ProviderKind,
        model: &str,
        keys: &ApiKeys,
    ) -> Result<Arc<dyn ModelProvider>, ProviderError>;
}

/// [`ProviderFactory`] producing the real HTTP providers.
///
/// Request keys win over server keys.
#[derive(Clone)]
pub struct HttpProviderFactory {
    client: reqwest::Client,
    server_keys: HashMap<ProviderKind, String>,
    base_urls: HashMap<ProviderKind, String>,
    timeout: Duration,
}

impl fmt::Debug for HttpProviderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProviderFactory")
            .field("server_keys", &self.server_keys.keys().collect::<Vec<_>>())
            .field("base_urls", &self.base_urls)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpProviderFactory {
    /// Factory with no server keys.
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            server_keys: HashMap::new(),
            base_urls: HashMap::new(),
            timeout,
        }
    }

    /// Factory with server keys read from the provider environment variables.
    pub fn from_env(timeout: Duration) -> Self {
        let mut factory = Self::new(timeout);
        for kind in ProviderKind::ALL {
            if let Ok(key) = std::env::var(kind.env_var()) {
                if !key.trim().is_empty() {
                    factory.server_keys.insert(kind, key);
                }
            }
        }
        tracing::info!(
            configured = ?factory.server_keys.keys().map(|k| k.as_str()).collect::<Vec<_>>(),
            "provider server keys loaded"
        );
        factory
    }

    /// Set the server key for `kind`.
    pub fn with_server_key(mut self, kind: ProviderKind, key: impl Into<String>) -> Self {
        self.server_keys.insert(kind, key.into());
        self
    }

    /// Override the API base URL for `kind` (tests, proxies).
    pub fn with_base_url(mut self, kind: ProviderKind, url: impl Into<String>) -> Self {
        self.base_urls.insert(kind, url.into());
        self
    }

    /// Whether the server has its own key for `kind`.
    pub fn has_server_key(&self, kind: ProviderKind) -> bool {
        self.server_keys.contains_key(&kind)
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn create(
        &self,
        kind: ProviderKind,
        model: &str,
        keys: &ApiKeys,
    ) -> Result<Arc<dyn ModelProvider>, ProviderError> {
        let key = keys
            .get(kind)
            .map(str::to_string)
            .or_else(|| self.server_keys.get(&kind).cloned())
            .ok_or(ProviderError::MissingCredentials(kind))?;
        let base = self.base_urls.get(&kind);

        let provider: Arc<dyn ModelProvider> = match kind {
            ProviderKind::OpenAi => {
                let mut p = OpenAiProvider::new(self.client.clone(), key, model)
                    .with_timeout(self.timeout);
                if let Some(url) = base {
                    p = p.with_base_url(url.clone());
                }
                Arc::new(p)
            }
            ProviderKind::Anthropic => {
                let mut p = AnthropicProvider::new(self.client.clone(), key, model)
                    .with_timeout(self.timeout);
                if let Some(url) = base {
                    p = p.with_base_url(url.clone());
                }
                Arc::new(p)
            }
            ProviderKind::Google => {
                let mut p = GeminiProvider::new(self.client.clone(), key, model)
                    .with_timeout(self.timeout);
                if let Some(url) = base {
                    p = p.with_base_url(url.clone());
                }
                Arc::new(p)
            }
        };
        Ok(provider)
    }
}

// ── Shared HTTP helpers ────────────────────────────────────────────────────

const MAX_ERROR_BODY: usize = 200;

pub(crate) fn map_transport_error(provider: ProviderKind, e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout { provider }
    } else if e.is_decode() || e.is_body() {
        ProviderError::Malformed {
            provider,
            message: e.to_string(),
        }
    } else {
        ProviderError::Unavailable {
            provider,
            message: e.to_string(),
        }
    }
}

/// Turn a non-success HTTP status into the matching [`ProviderError`].
pub(crate) async fn check_status(
    provider: ProviderKind,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    if status.is_server_error() {
        Err(ProviderError::Unavailable {
            provider,
            message: format!("status {}: {body}", status.as_u16()),
        })
    } else {
        Err(ProviderError::Rejected {
            provider,
            status: status.as_u16(),
            message: body,
        })
    }
}

pub(crate) fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
