//! Job event protocol.
//!
//! Outbound: every phase transition is a [`JobEvent`], serialised as
//! `{ "jobId", "phase", "status", "payload"?, "error"? }`. The phase name is
//! a closed set ([`Phase`]); payload-bearing events are built from a
//! [`PhaseEvent`], whose variant fixes the phase, so a payload can never be
//! attached to the wrong phase.
//!
//! Inbound: [`InboundCommand`] is tagged by `"type"`.

use crate::analysis::{
    AnalysisResult, Intent, OptimizationStrategy, PromptQuality, Sentiment, Style,
};
use crate::dlp::FindingKind;
use crate::provider::{ApiKeys, GenerationParams, ProviderKind};
use crate::routing::{Candidate, Complexity, RuleScope};
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Phase names ────────────────────────────────────────────────────────────

/// Wire phase names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Job accepted.
    Started,
    /// A new conversation was created for the job.
    ConversationCreated,
    /// Sensitive data was redacted.
    DlpWarning,
    /// Intent classification.
    Intent,
    /// Sentiment classification.
    Sentiment,
    /// Style classification.
    Style,
    /// Security screening.
    Security,
    /// Generation withheld for risk.
    SecurityHalt,
    /// Prompt-quality scoring.
    #[serde(rename = "promptQuality")]
    PromptQuality,
    /// Model selection.
    Model,
    /// Prompt optimization.
    Prompt,
    /// Parameter tuning.
    Parameters,
    /// A generation attempt.
    Generating,
    /// One streamed fragment.
    ResponseChunk,
    /// A full response.
    Response,
    /// A provider failed; failing over.
    ProviderError,
    /// Response failed validation; escalating.
    Retrying,
    /// Discard streamed text so far.
    ResponseClear,
    /// Job cancelled.
    Cancelled,
    /// Response validation.
    Validating,
    /// Job finished.
    Complete,
}

impl Phase {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Started => "started",
            Phase::ConversationCreated => "conversation_created",
            Phase::DlpWarning => "dlp_warning",
            Phase::Intent => "intent",
            Phase::Sentiment => "sentiment",
            Phase::Style => "style",
            Phase::Security => "security",
            Phase::SecurityHalt => "security_halt",
            Phase::PromptQuality => "promptQuality",
            Phase::Model => "model",
            Phase::Prompt => "prompt",
            Phase::Parameters => "parameters",
            Phase::Generating => "generating",
            Phase::ResponseChunk => "response_chunk",
            Phase::Response => "response",
            Phase::ProviderError => "provider_error",
            Phase::Retrying => "retrying",
            Phase::ResponseClear => "response_clear",
            Phase::Cancelled => "cancelled",
            Phase::Validating => "validating",
            Phase::Complete => "complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// Queued, not started.
    Pending,
    /// Work in progress.
    Processing,
    /// Work finished; payload attached.
    Completed,
    /// Work failed; error attached.
    Error,
}

// ── Payloads ───────────────────────────────────────────────────────────────

/// `conversation_created` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationCreated {
    /// New conversation id.
    pub conversation_id: String,
}

/// `dlp_warning` payload. Carries kinds and placeholders, never matched text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DlpWarning {
    /// Distinct kinds found.
    pub types: Vec<FindingKind>,
    /// Placeholders used, one per kind.
    pub placeholders: Vec<&'static str>,
    /// Number of redacted spans.
    pub count: usize,
    /// Human-readable summary.
    pub summary: String,
}

/// `intent` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentUpdate {
    /// Task type.
    pub intent: Intent,
    /// Heuristic complexity.
    pub complexity: Complexity,
}

/// `sentiment` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentUpdate {
    /// Tone.
    pub sentiment: Sentiment,
    /// Explanation.
    pub detail: String,
}

/// `style` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleUpdate {
    /// Preferred answer style.
    pub style: Style,
}

/// `security` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityUpdate {
    /// Effective score.
    pub score: u8,
    /// Why.
    pub explanation: String,
    /// Threshold in force.
    pub threshold: u8,
    /// Heuristic floor.
    pub heuristic_floor: u8,
    /// Model score, if any.
    pub model_score: Option<u8>,
}

/// `security_halt` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityHalt {
    /// Always `true`.
    pub security_halted: bool,
    /// Effective score.
    pub score: u8,
    /// Threshold that was met.
    pub threshold: u8,
    /// Why.
    pub explanation: String,
    /// User-visible terminal message.
    pub message: String,
}

/// `model` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSelected {
    /// First candidate's concrete id.
    pub model: String,
    /// First candidate's alias.
    pub alias: String,
    /// First candidate's provider.
    pub provider: ProviderKind,
    /// Matched rule id (absent for the catch-all).
    pub rule_id: Option<String>,
    /// Matched rule name.
    pub rule_name: String,
    /// Routing explanation.
    pub reasoning: String,
    /// Full ordered candidate list.
    pub candidates: Vec<Candidate>,
    /// Rule-set scope used.
    pub scope: RuleScope,
    /// Rule-set version used.
    pub version: Option<u32>,
}

/// `prompt` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptPrepared {
    /// Prompt sent to the model.
    pub optimized_prompt: String,
    /// Strategies applied.
    pub strategies: Vec<OptimizationStrategy>,
}

/// `generating` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationAttempt {
    /// Model being called.
    pub model: String,
    /// Provider being called.
    pub provider: ProviderKind,
    /// 1-based attempt number.
    pub attempt: usize,
}

/// `response_chunk` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseChunk {
    /// Incremental text, concatenated in arrival order.
    pub token: String,
}

/// `response` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseText {
    /// Full response of the attempt.
    pub text: String,
    /// Model that produced it.
    pub model: String,
}

/// `provider_error` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFailover {
    /// Model that failed.
    pub failed_model: String,
    /// Provider that failed.
    pub failed_provider: ProviderKind,
    /// Short failure label.
    pub error_type: &'static str,
    /// Candidate tried next, if any.
    pub next_model: Option<String>,
    /// Provider tried next, if any.
    pub next_provider: Option<ProviderKind>,
}

/// `retrying` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityRetry {
    /// Validation failure that triggered the retry.
    pub reason: String,
    /// Model that will be tried.
    pub next_model: String,
    /// 1-based number of this retry.
    pub retry: usize,
}

/// `validating` payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    /// Whether the response passed.
    pub passed: bool,
    /// Failure reason.
    pub reason: Option<String>,
    /// Weighted quality score.
    pub overall: f64,
}

/// `cancelled` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancelled {
    /// Text kept, including the cancellation marker.
    pub text: String,
}

/// `complete` payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completed {
    /// Final response (empty for a halted job).
    pub response: String,
    /// Model that produced it.
    pub model: Option<String>,
    /// Full analysis.
    pub analysis: AnalysisResult,
    /// Whether the final response passed validation.
    pub validation_passed: bool,
    /// Whether generation was withheld.
    pub security_halted: bool,
    /// Conversation the exchange was stored in.
    pub conversation_id: String,
    /// Estimated generation cost.
    pub cost_usd: f64,
    /// Wall-clock job duration.
    pub duration_ms: u64,
}

/// A payload together with its phase.
///
/// Serialises as the bare payload object; the phase is emitted separately
/// by [`JobEvent`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PhaseEvent {
    /// `conversation_created`
    ConversationCreated(ConversationCreated),
    /// `dlp_warning`
    DlpWarning(DlpWarning),
    /// `intent`
    Intent(IntentUpdate),
    /// `sentiment`
    Sentiment(SentimentUpdate),
    /// `style`
    Style(StyleUpdate),
    /// `security`
    Security(SecurityUpdate),
    /// `security_halt`
    SecurityHalt(SecurityHalt),
    /// `promptQuality`
    PromptQuality(PromptQuality),
    /// `model`
    Model(ModelSelected),
    /// `prompt`
    Prompt(PromptPrepared),
    /// `parameters`
    Parameters(GenerationParams),
    /// `generating`
    Generating(GenerationAttempt),
    /// `response_chunk`
    ResponseChunk(ResponseChunk),
    /// `response`
    Response(ResponseText),
    /// `provider_error`
    ProviderError(ProviderFailover),
    /// `retrying`
    Retrying(QualityRetry),
    /// `validating`
    Validating(ValidationOutcome),
    /// `cancelled`
    Cancelled(Cancelled),
    /// `complete`
    Complete(Box<Completed>),
}

impl PhaseEvent {
    /// Phase this payload belongs to.
    pub fn phase(&self) -> Phase {
        match self {
            PhaseEvent::ConversationCreated(_) => Phase::ConversationCreated,
            PhaseEvent::DlpWarning(_) => Phase::DlpWarning,
            PhaseEvent::Intent(_) => Phase::Intent,
            PhaseEvent::Sentiment(_) => Phase::Sentiment,
            PhaseEvent::Style(_) => Phase::Style,
            PhaseEvent::Security(_) => Phase::Security,
            PhaseEvent::SecurityHalt(_) => Phase::SecurityHalt,
            PhaseEvent::PromptQuality(_) => Phase::PromptQuality,
            PhaseEvent::Model(_) => Phase::Model,
            PhaseEvent::Prompt(_) => Phase::Prompt,
            PhaseEvent::Parameters(_) => Phase::Parameters,
            PhaseEvent::Generating(_) => Phase::Generating,
            PhaseEvent::ResponseChunk(_) => Phase::ResponseChunk,
            PhaseEvent::Response(_) => Phase::Response,
            PhaseEvent::ProviderError(_) => Phase::ProviderError,
            PhaseEvent::Retrying(_) => Phase::Retrying,
            PhaseEvent::Validating(_) => Phase::Validating,
            PhaseEvent::Cancelled(_) => Phase::Cancelled,
            PhaseEvent::Complete(_) => Phase::Complete,
        }
    }
}

// ── Envelope ───────────────────────────────────────────────────────────────

/// One outbound event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    job_id: String,
    phase: Phase,
    status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<PhaseEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl JobEvent {
    /// Payload-free status update (`pending` / `processing`, or a bare
    /// `completed` for phases such as `started` and `response_clear`).
    pub fn status(job_id: impl Into<String>, phase: Phase, status: EventStatus) -> Self {
        Self {
            job_id: job_id.into(),
            phase,
            status,
            payload: None,
            error: None,
        }
    }

    /// Event carrying a payload; the phase follows from the payload.
    pub fn with_payload(job_id: impl Into<String>, status: EventStatus, event: PhaseEvent) -> Self {
        Self {
            job_id: job_id.into(),
            phase: event.phase(),
            status,
            payload: Some(event),
            error: None,
        }
    }

    /// `completed` event carrying a payload.
    pub fn completed(job_id: impl Into<String>, event: PhaseEvent) -> Self {
        Self::with_payload(job_id, EventStatus::Completed, event)
    }

    /// `error` event for `phase`.
    pub fn error(job_id: impl Into<String>, phase: Phase, error: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            phase,
            status: EventStatus::Error,
            payload: None,
            error: Some(error.into()),
        }
    }

    /// Attach an error message; `provider_error` events carry both a
    /// payload and the failure text.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Job id.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Status (named `event_status` to avoid clashing with the constructor).
    pub fn event_status(&self) -> EventStatus {
        self.status
    }

    /// Payload, if any.
    pub fn payload(&self) -> Option<&PhaseEvent> {
        self.payload.as_ref()
    }

    /// Error text, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

// ── Inbound ────────────────────────────────────────────────────────────────

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// The human.
    User,
    /// The model.
    Assistant,
    /// Instructions.
    System,
}

/// One earlier turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker.
    pub role: ChatRole,
    /// Text.
    pub content: String,
}

impl ChatMessage {
    /// Convenience constructor.
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Body of an `analyze` command.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzePayload {
    /// The user's message.
    pub message: String,
    /// Earlier turns, oldest first.
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
    /// Existing conversation, if continuing one.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Whether the user asked for deep research.
    #[serde(default)]
    pub use_deep_research: bool,
    /// Per-request provider keys.
    #[serde(default)]
    pub api_keys: ApiKeys,
    /// Persona preset id.
    #[serde(default)]
    pub preset_id: Option<String>,
    /// Inline persona prompt; wins over `preset_id`.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl AnalyzePayload {
    /// Payload with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_history: Vec::new(),
            conversation_id: None,
            use_deep_research: false,
            api_keys: ApiKeys::default(),
            preset_id: None,
            system_prompt: None,
        }
    }
}

impl fmt::Debug for AnalyzePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyzePayload")
            .field("message_len", &self.message.len())
            .field("history", &self.conversation_history.len())
            .field("conversation_id", &self.conversation_id)
            .field("use_deep_research", &self.use_deep_research)
            .field("api_keys", &self.api_keys)
            .field("preset_id", &self.preset_id)
            .field("has_system_prompt", &self.system_prompt.is_some())
            .finish()
    }
}

/// A command from the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundCommand {
    /// Start a job.
    Analyze {
        /// Job input.
        payload: AnalyzePayload,
    },
    /// Cancel a job.
    Cancel {
        /// Job to cancel.
        #[serde(rename = "jobId")]
        job_id: String,
    },
}
