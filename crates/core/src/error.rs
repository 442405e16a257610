//! Error types for the Engram domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator boundary has its own error variant; failures that are
//! tolerated per-stage are folded into defaults by the engine's safe-invoke
//! wrapper rather than propagated here.

use thiserror::Error;

use crate::message::ChatId;

/// The top-level error type for all Engram operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The chat session does not exist. Fatal to the turn: there is no
    /// session to attach messages to.
    #[error("Chat session not found: {0}")]
    SessionNotFound(ChatId),

    /// A memory balance outside [0, 1] was supplied. Rejected before any I/O.
    #[error("Memory balance {0} is outside [0, 1]")]
    InvalidMemoryBalance(f64),

    /// The turn exceeded its configured wall-clock limit. Surfaced distinctly
    /// from other failures so callers can present a retry-appropriate message.
    #[error("Operation timed out after {elapsed_secs}s")]
    Timeout { elapsed_secs: u64 },

    /// The turn's cancellation token fired before the turn finished.
    #[error("Turn cancelled")]
    Cancelled,

    /// A pipeline stage failed. Carries the stage name for diagnostics.
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// The persona template could not be rendered. Fatal: no prompt is
    /// possible without a persona.
    #[error("Persona render failed: {0}")]
    Persona(String),

    // --- Collaborator errors ---
    #[error("Completion provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Memory provider error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Planner error: {0}")]
    Planner(#[from] PlannerError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Attach a stage name to an error for diagnostics.
    pub fn in_stage(self, stage: &'static str) -> Self {
        Error::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// Whether this error is a timeout at any nesting depth.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::Stage { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

// --- Collaborator boundary errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    /// The memory provider could not be reached. Non-fatal per memory kind:
    /// logged and treated as zero results.
    #[error("Memory provider unavailable: {0}")]
    Unavailable(String),

    #[error("Memory query failed: {0}")]
    QueryFailed(String),

    #[error("Memory import failed: {0}")]
    ImportFailed(String),

    #[error("Memory index missing: {0}")]
    IndexMissing(String),
}

#[derive(Debug, Clone, Error)]
pub enum PlannerError {
    #[error("Plan creation failed: {0}")]
    CreationFailed(String),

    #[error("Plan execution failed: {reason}")]
    ExecutionFailed { reason: String },

    #[error("No planner configured")]
    NotConfigured,
}

/// Extraction failures are per-memory-kind and never abort the turn; the
/// extractor logs them and moves on. The model is not guaranteed to emit
/// valid JSON every time, so a parse failure is expected, not exceptional.
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    #[error("Malformed extraction payload for '{kind}': {reason}")]
    Parse { kind: String, reason: String },
}
