//! Conversation persistence seam.
//!
//! The pipeline records conversations, finalized messages and analysis
//! logs through [`ConversationStore`]. Durable backends live outside this
//! crate; [`InMemoryConversationStore`] backs the server and the tests.

use crate::analysis::AnalysisResult;
use crate::events::ChatRole;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Store failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No conversation with this id.
    #[error("unknown conversation '{0}'")]
    UnknownConversation(String),
    /// Backend failure.
    #[error("conversation store failure: {0}")]
    Backend(String),
}

/// One stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    /// Speaker.
    pub role: ChatRole,
    /// Text as shown to the user (redacted for user turns).
    pub content: String,
    /// Model that produced an assistant turn.
    pub model: Option<String>,
    /// Whether generation was cancelled part-way.
    pub cancelled: bool,
    /// Storage time.
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// A user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            model: None,
            cancelled: false,
            created_at: Utc::now(),
        }
    }

    /// An assistant turn.
    pub fn assistant(content: impl Into<String>, model: Option<String>, cancelled: bool) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            model,
            cancelled,
            created_at: Utc::now(),
        }
    }
}

/// One analysis log entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisLog {
    /// Job that produced it.
    pub job_id: String,
    /// The analysis.
    pub analysis: AnalysisResult,
    /// Whether the job was halted.
    pub halted: bool,
    /// Log time.
    pub logged_at: DateTime<Utc>,
}

/// Conversation persistence.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a conversation owned by `owner` and return its id.
    async fn create_conversation(&self, owner: &str) -> Result<String, StoreError>;

    /// Append a message. Unknown ids supplied by a client are created on
    /// first write.
    async fn append_message(
        &self,
        conversation_id: &str,
        message: StoredMessage,
    ) -> Result<(), StoreError>;

    /// Record the analysis of one job.
    async fn log_analysis(&self, conversation_id: &str, log: AnalysisLog) -> Result<(), StoreError>;

    /// Messages of a conversation, oldest first.
    async fn messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError>;

    /// Analysis logs of a conversation, oldest first.
    async fn analyses(&self, conversation_id: &str) -> Result<Vec<AnalysisLog>, StoreError>;
}

#[derive(Debug, Default)]
struct Conversation {
    owner: String,
    messages: Vec<StoredMessage>,
    analyses: Vec<AnalysisLog>,
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: DashMap<String, Conversation>,
}

impl InMemoryConversationStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of conversations.
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Owner of a conversation.
    pub fn owner(&self, conversation_id: &str) -> Option<String> {
        self.conversations
            .get(conversation_id)
            .map(|c| c.owner.clone())
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create_conversation(&self, owner: &str) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.conversations.insert(
            id.clone(),
            Conversation {
                owner: owner.to_string(),
                ..Conversation::default()
            },
        );
        Ok(id)
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        message: StoredMessage,
    ) -> Result<(), StoreError> {
        self.conversations
            .entry(conversation_id.to_string())
            .or_default()
            .messages
            .push(message);
        Ok(())
    }

    async fn log_analysis(&self, conversation_id: &str, log: AnalysisLog) -> Result<(), StoreError> {
        self.conversations
            .entry(conversation_id.to_string())
            .or_default()
            .analyses
            .push(log);
        Ok(())
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        self.conversations
            .get(conversation_id)
            .map(|c| c.messages.clone())
            .ok_or_else(|| StoreError::UnknownConversation(conversation_id.to_string()))
    }

    async fn analyses(&self, conversation_id: &str) -> Result<Vec<AnalysisLog>, StoreError> {
        self.conversations
            .get(conversation_id)
            .map(|c| c.analyses.clone())
            .ok_or_else(|| StoreError::UnknownConversation(conversation_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_append() {
        let store = InMemoryConversationStore::new();
        let id = store.create_conversation("session-1").await.expect("created");
        store
            .append_message(&id, StoredMessage::user("hello"))
            .await
            .expect("appended");
        store
            .append_message(&id, StoredMessage::assistant("hi", Some("gpt-5".into()), false))
            .await
            .expect("appended");
        let messages = store.messages(&id).await.expect("exists");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, ChatRole::Assistant);
        assert_eq!(store.owner(&id).as_deref(), Some("session-1"));
    }

    #[tokio::test]
    async fn test_unknown_conversation_created_on_write() {
        let store = InMemoryConversationStore::new();
        assert!(matches!(
            store.messages("client-id").await,
            Err(StoreError::UnknownConversation(_))
        ));
        store
            .append_message("client-id", StoredMessage::user("x"))
            .await
            .expect("appended");
        assert_eq!(store.messages("client-id").await.map(|m| m.len()), Ok(1));
    }

    #[tokio::test]
    async fn test_analysis_log() {
        let store = InMemoryConversationStore::new();
        let id = store.create_conversation("s").await.expect("created");
        store
            .log_analysis(
                &id,
                AnalysisLog {
                    job_id: "j".into(),
                    analysis: AnalysisResult::default(),
                    halted: true,
                    logged_at: Utc::now(),
                },
            )
            .await
            .expect("logged");
        let logs = store.analyses(&id).await.expect("exists");
        assert!(logs[0].halted);
    }
}
