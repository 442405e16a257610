//! Prompt assembly: token counting, relevance policy, budget bookkeeping,
//! memory retrieval, and the staged assembler itself.

pub mod assembler;
pub mod budget;
pub mod relevance;
pub mod retriever;
pub mod token;
