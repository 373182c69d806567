use super::{
    check_status, map_transport_error, sse, trim_base, GenerationParams, ModelProvider,
    ProviderError, ProviderKind, TokenStream,
};
use async_trait::async_trait;
use futures::{future, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    top_p: f32,
    max_completion_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI chat-completions provider.
///
/// ## Example
///
/// ```no_run
/// use prompt_guard_orchestrator::provider::OpenAiProvider;
/// use std::time::Duration;
///
/// let provider = OpenAiProvider::new(reqwest::Client::new(), "sk-...", "gpt-5")
///     .with_timeout(Duration::from_secs(30));
/// ```
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiProvider {
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

    /// Override the API base URL (must include the `/v1` segment).
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
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: params.temperature,
            top_p: params.top_p,
            max_completion_tokens: params.max_tokens,
            stream,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_transport_error(ProviderKind::OpenAi, e))?;
        check_status(ProviderKind::OpenAi, response).await
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
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
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| map_transport_error(ProviderKind::OpenAi, e))?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Malformed {
                provider: ProviderKind::OpenAi,
                message: "no choices in response".to_string(),
            })
    }

    async fn generate_stream(
        &self,
        system: &str,
        user: &str,
        params: &GenerationParams,
    ) -> Result<TokenStream, ProviderError> {
        let response = self.send(system, user, params, true).await?;
        let tokens = sse::data_lines(ProviderKind::OpenAi, Box::pin(response.bytes_stream()))
            .take_while(|line| future::ready(!matches!(line, Ok(l) if l == "[DONE]")))
            .filter_map(|line| {
                future::ready(match line {
                    Err(e) => Some(Err(e)),
                    Ok(data) => match serde_json::from_str::<StreamChunk>(&data) {
                        Ok(chunk) => chunk
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|c| c.delta.content)
                            .filter(|t| !t.is_empty())
                            .map(Ok),
                        Err(e) => Some(Err(ProviderError::Malformed {
                            provider: ProviderKind::OpenAi,
                            message: e.to_string(),
                        })),
                    },
                })
            });
        Ok(tokens.boxed())
    }
}
