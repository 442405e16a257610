//! Memory provider trait and memory domain types.
//!
//! The memory provider owns embedding and vector indexing; the core only
//! speaks in queries, tag filters, and ranked results. Memories are stored
//! as documents tagged with their chat and kind so retrieval can scope a
//! search to one session and one kind at a time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MemoryError;
use crate::message::ChatId;

/// Well-known memory kind tags.
pub const LONG_TERM_TAG: &str = "long-term";
pub const WORKING_TAG: &str = "working";
pub const DOCUMENT_TAG: &str = "document";

/// A named category of stored memory with its own storage tag and
/// retrieval policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// Durable facts that should survive the conversation
    LongTerm,
    /// Recent, task-local context
    Working,
    /// Snippets from ingested documents
    Document,
    /// Operator-defined kind from the configured memory map
    Custom(String),
}

impl MemoryKind {
    /// The storage tag for this kind.
    pub fn tag(&self) -> &str {
        match self {
            Self::LongTerm => LONG_TERM_TAG,
            Self::Working => WORKING_TAG,
            Self::Document => DOCUMENT_TAG,
            Self::Custom(name) => name,
        }
    }

    /// Parse a tag back into a kind.
    pub fn parse(tag: &str) -> Self {
        match tag {
            LONG_TERM_TAG => Self::LongTerm,
            WORKING_TAG => Self::Working,
            DOCUMENT_TAG => Self::Document,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

// Kinds serialize as their storage tag so records and filters round-trip
// through JSON as plain strings.
impl Serialize for MemoryKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

impl<'de> Deserialize<'de> for MemoryKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::parse(&tag))
    }
}

/// Scope for a memory search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFilter {
    /// Only memories belonging to this chat
    pub chat_id: ChatId,

    /// Only memories of this kind
    pub kind: MemoryKind,

    /// Minimum similarity score a result must meet
    pub min_relevance: f64,
}

/// One ranked result from a memory search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedMatch {
    /// Document ID in the memory index
    pub id: String,

    /// The matched passage
    pub text: String,

    /// Similarity score
    pub relevance: f64,

    /// Human-readable source label
    pub source_name: String,

    /// Link for document-kind memories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// A stored memory document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique ID; generated when empty
    pub id: String,

    /// The memory text
    pub text: String,

    /// Owning chat tag
    pub chat_id: ChatId,

    /// Kind tag
    pub kind: MemoryKind,

    /// Human-readable source label
    pub source_name: String,

    /// Link for document-kind memories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,

    /// Embedding vector, when the provider stores one
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,

    /// When this memory was created
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// Create a record for an extracted memory item.
    pub fn new(chat_id: &ChatId, kind: MemoryKind, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            chat_id: chat_id.clone(),
            kind,
            source_name: "chat".into(),
            link: None,
            embedding: None,
            created_at: Utc::now(),
        }
    }
}

/// An import request: one or more records destined for an index.
#[derive(Debug, Clone)]
pub struct DocumentImport {
    /// Target index name
    pub index: String,

    /// Records to store; tags travel on the records themselves
    pub records: Vec<MemoryRecord>,
}

/// The memory provider trait.
///
/// Implementations own embedding, indexing, and their own concurrency
/// safety. The core is always the caller.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    /// The provider name (e.g., "in_process", "qdrant").
    fn name(&self) -> &str;

    /// Similarity-search an index, scoped by the filter.
    async fn search(
        &self,
        index: &str,
        query: &str,
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<RankedMatch>, MemoryError>;

    /// Store new memory documents.
    async fn import_document(&self, request: DocumentImport) -> Result<(), MemoryError>;

    /// Delete a document by ID.
    async fn delete_document(&self, id: &str, index: &str) -> Result<(), MemoryError>;
}
