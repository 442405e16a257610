//! # Engram Core
//!
//! Domain types, collaborator traits, and error definitions for the Engram
//! chat memory engine. This crate has **zero framework dependencies**; it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (completion provider, memory provider,
//! planner, repositories, real-time transport) is defined as a trait here.
//! Implementations live in their respective crates or in the host
//! application. This keeps the dependency graph pointing inward on core
//! and lets a host swap or mock any collaborator without touching the
//! engine.

pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod persona;
pub mod planner;
pub mod provider;
pub mod repository;
pub mod transport;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ExtractionError, MemoryError, PlannerError, ProviderError, Result};
pub use event::{BroadcastHub, Envelope};
pub use memory::{
    DocumentImport, MemoryFilter, MemoryKind, MemoryProvider, MemoryRecord, RankedMatch,
};
pub use message::{
    AuthorRole, ChatId, ChatMessage, ChatSession, Citation, MessageKind, validate_memory_balance,
};
pub use persona::PersonaTemplate;
pub use planner::{Plan, PlanDisposition, PlanState, PlanStep, Planner};
pub use provider::{
    ChunkReceiver, CompletionChunk, CompletionProvider, CompletionRequest, CompletionResponse,
    CompletionSettings, PromptBlock, PromptRole, Usage,
};
pub use repository::{
    InProcessMessageStore, InProcessSessionStore, MessageRepository, SessionRepository,
};
pub use transport::{ClientEvent, Transport};
