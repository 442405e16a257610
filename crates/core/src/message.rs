//! Chat message and session domain types.
//!
//! These are the core value objects that flow through the engine:
//! a user sends a message, the assembler builds a prompt around it, the
//! streamer grows a bot message in place, and both are persisted and
//! broadcast to clients as JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for a chat session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorRole {
    /// The end user who owns the turn
    User,
    /// The assistant
    Bot,
    /// Another human participant in a shared chat
    Participant,
}

/// What a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Ordinary conversational text
    Message,
    /// A serialized plan awaiting approval or reporting execution state
    Plan,
    /// An ingested document reference; excluded from chat-history replay
    Document,
}

/// A source citation attached to a bot message when document memories
/// contributed to the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Human-readable source label (filename, URL title, etc.)
    pub source_name: String,

    /// Link the client can follow
    pub link: String,

    /// The passage that matched
    pub excerpt: String,

    /// Similarity score from the memory search
    pub relevance: f64,
}

/// A single message in a chat session.
///
/// Mutated in place while streaming (content grows incrementally);
/// immutable once the turn completes except for corrective edits such as
/// updating a previously emitted plan message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message ID
    pub id: String,

    /// Owning chat session
    pub chat_id: ChatId,

    /// Author identifier (user ID or the bot's well-known ID)
    pub author_id: String,

    /// Display name of the author
    pub author_name: String,

    /// Who authored this message
    pub role: AuthorRole,

    /// What this message carries
    pub kind: MessageKind,

    /// The text content
    pub content: String,

    /// The full prompt that produced this message, kept for debugging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_prompt: Option<String>,

    /// Document citations that contributed to this message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,

    /// Token usage per pipeline stage, keyed by stage name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub token_usage: BTreeMap<String, u32>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a new user message.
    pub fn user(
        chat_id: &ChatId,
        author_id: impl Into<String>,
        author_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.clone(),
            author_id: author_id.into(),
            author_name: author_name.into(),
            role: AuthorRole::User,
            kind: MessageKind::Message,
            content: content.into(),
            rendered_prompt: None,
            citations: Vec::new(),
            token_usage: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a new bot message. Starts empty when streaming.
    pub fn bot(chat_id: &ChatId, bot_name: impl Into<String>, content: impl Into<String>) -> Self {
        let bot_name = bot_name.into();
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.clone(),
            author_id: "bot".into(),
            author_name: bot_name,
            role: AuthorRole::Bot,
            kind: MessageKind::Message,
            content: content.into(),
            rendered_prompt: None,
            citations: Vec::new(),
            token_usage: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a plan message carrying a serialized plan payload.
    pub fn plan(chat_id: &ChatId, bot_name: impl Into<String>, payload: impl Into<String>) -> Self {
        let mut msg = Self::bot(chat_id, bot_name, payload);
        msg.kind = MessageKind::Plan;
        msg
    }

    /// Append streamed content in place.
    pub fn append_content(&mut self, delta: &str) {
        self.content.push_str(delta);
    }

    /// Record token usage for a named pipeline stage.
    pub fn record_usage(&mut self, stage: impl Into<String>, tokens: u32) {
        self.token_usage.insert(stage.into(), tokens);
    }
}

/// A chat session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    /// Unique session ID
    pub id: ChatId,

    /// Display title
    pub title: String,

    /// Chat-specific system description substituted into the persona
    pub system_description: String,

    /// Scalar in [0, 1] trading long-term recall against working-memory
    /// recall. Validated on every mutation.
    memory_balance: f64,

    /// Tools the planner may draw on for this session
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled_tools: Vec<String>,
}

impl ChatSession {
    /// Create a session with a balanced memory setting.
    pub fn new(title: impl Into<String>, system_description: impl Into<String>) -> Self {
        Self {
            id: ChatId::new(),
            title: title.into(),
            system_description: system_description.into(),
            memory_balance: 0.5,
            enabled_tools: Vec::new(),
        }
    }

    pub fn memory_balance(&self) -> f64 {
        self.memory_balance
    }

    /// Set the memory balance. Values outside [0, 1] are rejected before
    /// any I/O happens downstream.
    pub fn set_memory_balance(&mut self, balance: f64) -> Result<()> {
        validate_memory_balance(balance)?;
        self.memory_balance = balance;
        Ok(())
    }
}

/// Reject memory balances outside [0, 1] (NaN included).
pub fn validate_memory_balance(balance: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&balance) {
        return Err(Error::InvalidMemoryBalance(balance));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let chat_id = ChatId::new();
        let msg = ChatMessage::user(&chat_id, "u1", "Alice", "Hello there");
        assert_eq!(msg.role, AuthorRole::User);
        assert_eq!(msg.kind, MessageKind::Message);
        assert_eq!(msg.content, "Hello there");
        assert_eq!(msg.chat_id, chat_id);
    }

    #[test]
    fn bot_message_starts_with_given_content() {
        let msg = ChatMessage::bot(&ChatId::new(), "Assistant", "");
        assert_eq!(msg.role, AuthorRole::Bot);
        assert!(msg.content.is_empty());
        assert_eq!(msg.author_id, "bot");
    }

    #[test]
    fn append_grows_content_in_place() {
        let mut msg = ChatMessage::bot(&ChatId::new(), "Assistant", "");
        msg.append_content("Hel");
        msg.append_content("lo");
        assert_eq!(msg.content, "Hello");
    }

    #[test]
    fn plan_message_has_plan_kind() {
        let msg = ChatMessage::plan(&ChatId::new(), "Assistant", "{}");
        assert_eq!(msg.kind, MessageKind::Plan);
        assert_eq!(msg.role, AuthorRole::Bot);
    }

    #[test]
    fn token_usage_keyed_by_stage() {
        let mut msg = ChatMessage::bot(&ChatId::new(), "Assistant", "done");
        msg.record_usage("intent", 42);
        msg.record_usage("response", 128);
        assert_eq!(msg.token_usage.get("intent"), Some(&42));
        assert_eq!(msg.token_usage.get("response"), Some(&128));
    }

    #[test]
    fn message_serialization_roundtrip() {
        let mut msg = ChatMessage::user(&ChatId::from("c1"), "u1", "Alice", "Test message");
        msg.citations.push(Citation {
            source_name: "notes.pdf".into(),
            link: "docs/notes.pdf".into(),
            excerpt: "relevant passage".into(),
            relevance: 0.91,
        });
        let json = serde_json::to_string(&msg).unwrap();
        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content, "Test message");
        assert_eq!(back.role, AuthorRole::User);
        assert_eq!(back.citations.len(), 1);
        assert_eq!(back.citations[0].link, "docs/notes.pdf");
    }

    #[test]
    fn session_balance_validation() {
        let mut session = ChatSession::new("Test", "You are helpful.");
        assert!(session.set_memory_balance(0.0).is_ok());
        assert!(session.set_memory_balance(1.0).is_ok());
        assert!(session.set_memory_balance(-0.1).is_err());
        assert!(session.set_memory_balance(1.1).is_err());
        assert!(session.set_memory_balance(f64::NAN).is_err());
        // Last valid value sticks
        assert!((session.memory_balance() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn default_balance_is_centered() {
        let session = ChatSession::new("Test", "");
        assert!((session.memory_balance() - 0.5).abs() < f64::EPSILON);
    }
}
