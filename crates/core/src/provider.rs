//! Completion provider trait, the abstraction over LLM backends.
//!
//! A provider takes an ordered list of role-tagged prompt blocks and
//! returns either a complete response or a finite stream of chunks.
//! Streams are not restartable; the caller consumes each receiver once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// The role tag on a prompt block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl PromptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One role-tagged block of prompt text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptBlock {
    pub role: PromptRole,
    pub content: String,
}

impl PromptBlock {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

/// Settings for one completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionSettings {
    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: default_temperature(),
            stop: Vec::new(),
        }
    }
}

/// A completion request: ordered blocks plus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub blocks: Vec<PromptBlock>,
    pub settings: CompletionSettings,
}

impl CompletionRequest {
    pub fn new(blocks: Vec<PromptBlock>, settings: CompletionSettings) -> Self {
        Self { blocks, settings }
    }
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A complete (non-streaming) response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// The generated text
    pub content: String,

    /// Usage statistics, when the provider reports them
    pub usage: Option<Usage>,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info, typically only on the final chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The receiver half of a streaming completion.
pub type ChunkReceiver = tokio::sync::mpsc::Receiver<Result<CompletionChunk, ProviderError>>;

/// The completion provider trait.
///
/// Every LLM backend implements this. The engine calls `complete` for
/// bounded helper calls (audience, intent, extraction) and
/// `complete_streaming` for the response itself.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Send a request and get a finite stream of chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a
    /// single terminal chunk.
    async fn complete_streaming(
        &self,
        request: CompletionRequest,
    ) -> Result<ChunkReceiver, ProviderError> {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(CompletionChunk {
                content: Some(response.content),
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }
}
