use super::{
    check_status, map_transport_error, sse, trim_base, GenerationParams, ModelProvider,
    ProviderError, ProviderKind, TokenStream,
};
use async_trait::async_trait;
use futures::{future, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: [UserMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}

/// Anthropic messages-API provider.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl AnthropicProvider {
    /// Create a provider for `model` authenticated with `api_key`.
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Override the API base URL (without the `/v1` segment).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = trim_base(&url.into());
        self
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn send(
        &self,
        system: &str,
        user: &str,
        params: &GenerationParams,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let request = MessagesRequest {
            model: &self.model,
            system,
            messages: [UserMessage {
                role: "user",
                content: user,
            }],
            max_tokens: params.max_tokens,
            temperature: params.temperature.clamp(0.0, 1.0),
            stream,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_transport_error(ProviderKind::Anthropic, e))?;
        check_status(ProviderKind::Anthropic, response).await
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        system: &str,
        user: &str,
        params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        let response = self.send(system, user, params, false).await?;
        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| map_transport_error(ProviderKind::Anthropic, e))?;
        let text: String = body
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect();
        if text.is_empty() {
            return Err(ProviderError::Malformed {
                provider: ProviderKind::Anthropic,
                message: "no text content in response".to_string(),
            });
        }
        Ok(text)
    }

    async fn generate_stream(
        &self,
        system: &str,
        user: &str,
        params: &GenerationParams,
    ) -> Result<TokenStream, ProviderError> {
        let response = self.send(system, user, params, true).await?;
        let tokens = sse::data_lines(ProviderKind::Anthropic, Box::pin(response.bytes_stream()))
            .filter_map(|line| {
                future::ready(match line {
                    Err(e) => Some(Err(e)),
                    Ok(data) => match serde_json::from_str::<StreamEvent>(&data) {
                        Ok(ev) if ev.kind == "content_block_delta" => ev
                            .delta
                            .and_then(|d| d.text)
                            .filter(|t| !t.is_empty())
                            .map(Ok),
                        Ok(ev) if ev.kind == "error" => Some(Err(ProviderError::Unavailable {
                            provider: ProviderKind::Anthropic,
                            message: ev.error.map(|e| e.message).unwrap_or_default(),
                        })),
                        Ok(_) => None,
                        Err(e) => Some(Err(ProviderError::Malformed {
                            provider: ProviderKind::Anthropic,
                            message: e.to_string(),
                        })),
                    },
                })
            });
        Ok(tokens.boxed())
    }
}
