//! Deterministic offline provider.
//!
//! Plays back a queue of [`ScriptStep`]s, one per call. Once the queue is
//! empty every call echoes a short canned reply. Records the prompts it
//! received so tests can assert what reached the model.

use super::{
    ApiKeys, GenerationParams, ModelProvider, ProviderError, ProviderFactory, ProviderKind,
    TokenStream,
};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One scripted reaction to a provider call.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Answer with this text in one fragment.
    Reply(String),
    /// Stream these fragments with `delay` between them.
    Stream {
        /// Fragments, in order.
        tokens: Vec<String>,
        /// Pause before each fragment.
        delay: Duration,
    },
    /// Fail the call.
    Fail(ProviderError),
    /// Stream these fragments, then fail.
    FailAfter(Vec<String>, ProviderError),
}

impl ScriptStep {
    /// Shorthand for [`ScriptStep::Reply`].
    pub fn reply(text: impl Into<String>) -> Self {
        ScriptStep::Reply(text.into())
    }

    /// Shorthand for [`ScriptStep::Stream`] with the given per-token delay.
    pub fn stream<I, S>(tokens: I, delay: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScriptStep::Stream {
            tokens: tokens.into_iter().map(Into::into).collect(),
            delay,
        }
    }
}

/// Captured call arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// System prompt.
    pub system: String,
    /// User prompt.
    pub user: String,
    /// Parameters.
    pub params: GenerationParams,
}

/// Provider that replays a script instead of calling a vendor.
pub struct ScriptedProvider {
    kind: ProviderKind,
    model: String,
    script: Mutex<VecDeque<ScriptStep>>,
    calls: AtomicUsize,
    recorded: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    /// Empty script: every call gets the canned reply.
    pub fn new(kind: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            kind,
            model: model.into(),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
        }
    }

    /// Append steps to the script.
    pub fn with_steps(self, steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        self.script.lock().extend(steps);
        self
    }

    /// Append one step to the script.
    pub fn push(&self, step: ScriptStep) {
        self.script.lock().push_back(step);
    }

    /// Number of calls received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Arguments of every call received so far.
    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.recorded.lock().clone()
    }

    fn next_step(&self, system: &str, user: &str, params: &GenerationParams) -> ScriptStep {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.recorded.lock().push(RecordedCall {
            system: system.to_string(),
            user: user.to_string(),
            params: *params,
        });
        self.script.lock().pop_front().unwrap_or_else(|| {
            ScriptStep::Reply(format!(
                "Here is a scripted answer from {} with enough detail to be useful.",
                self.model
            ))
        })
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
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
        match self.next_step(system, user, params) {
            ScriptStep::Reply(text) => Ok(text),
            ScriptStep::Stream { tokens, delay } => {
                tokio::time::sleep(delay * tokens.len() as u32).await;
                Ok(tokens.concat())
            }
            ScriptStep::Fail(e) | ScriptStep::FailAfter(_, e) => Err(e),
        }
    }

    async fn generate_stream(
        &self,
        system: &str,
        user: &str,
        params: &GenerationParams,
    ) -> Result<TokenStream, ProviderError> {
        match self.next_step(system, user, params) {
            ScriptStep::Reply(text) => Ok(stream::once(async move { Ok(text) }).boxed()),
            ScriptStep::Stream { tokens, delay } => Ok(stream::iter(tokens)
                .then(move |t| async move {
                    tokio::time::sleep(delay).await;
                    Ok(t)
                })
                .boxed()),
            ScriptStep::Fail(e) => Err(e),
            ScriptStep::FailAfter(tokens, e) => Ok(stream::iter(
                tokens
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(e))),
            )
            .boxed()),
        }
    }
}

/// [`ProviderFactory`] handing out pre-built [`ScriptedProvider`]s.
///
/// Providers are looked up by exact model id first, then by provider kind.
/// A lookup miss behaves like a missing credential.
#[derive(Default)]
pub struct ScriptedProviderFactory {
    by_model: HashMap<String, Arc<ScriptedProvider>>,
    by_kind: HashMap<ProviderKind, Arc<ScriptedProvider>>,
}

impl ScriptedProviderFactory {
    /// Empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `provider` for calls to its own model id.
    pub fn with_model(mut self, provider: Arc<ScriptedProvider>) -> Self {
        self.by_model.insert(provider.model().to_string(), provider);
        self
    }

    /// Serve `provider` for any model on its provider kind.
    pub fn with_kind(mut self, provider: Arc<ScriptedProvider>) -> Self {
        self.by_kind.insert(provider.kind(), provider);
        self
    }
}

impl ProviderFactory for ScriptedProviderFactory {
    fn create(
        &self,
        kind: ProviderKind,
        model: &str,
        _keys: &ApiKeys,
    ) -> Result<Arc<dyn ModelProvider>, ProviderError> {
        let provider = self
            .by_model
            .get(model)
            .or_else(|| self.by_kind.get(&kind))
            .cloned()
            .ok_or(ProviderError::MissingCredentials(kind))?;
        Ok(provider)
    }
}
