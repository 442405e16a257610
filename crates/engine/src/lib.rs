//! # Engram Engine
//!
//! The orchestration core of the Engram chat memory engine: it turns one
//! inbound user message into a token-budget-constrained prompt, streams
//! the model's response to subscribers, and harvests deduplicated
//! semantic memories from the finished exchange.
//!
//! ## Pipeline
//!
//! ```text
//! inbound message
//!   └─ ContextAssembler        persona → audience → intent → memories
//!      ├─ BudgetLedger           → external info → history, in budget
//!      ├─ MemoryRetriever      ranked recall under a relevance policy
//!      └─ RelevanceThresholdPolicy
//!   └─ ResponseStreamer       incremental broadcast of the reply
//!   └─ SemanticMemoryExtractor  post-turn, non-fatal, deduplicated
//! ```
//!
//! Every collaborator (storage, memory index, completion provider,
//! planner, transport) is a trait from `engram-core`; this crate contains
//! the algorithms and the failure policy, not the I/O.

pub mod context;
pub mod extractor;
pub mod safe;
pub mod streamer;
pub mod turn;

pub use context::assembler::{
    AssembledPrompt, AssemblyOutcome, ContextAssembler, TurnContext,
};
pub use context::budget::BudgetLedger;
pub use context::relevance::RelevanceThresholdPolicy;
pub use context::retriever::{MemoryRetriever, RetrievedMemories};
pub use context::token::{MESSAGE_FRAMING_OVERHEAD, TokenCounter};
pub use extractor::SemanticMemoryExtractor;
pub use safe::stage_scope;
pub use streamer::ResponseStreamer;
pub use turn::ChatTurnEngine;
