//! Memory retrieval under a token budget.
//!
//! Searches every configured memory kind, ranks the candidates globally by
//! relevance, and accepts them greedily until the first one that would not
//! fit. Acceptance is precedence-by-relevance, not bin-packing: once a
//! candidate is rejected, no later candidate is considered even if it is
//! shorter. Accepted candidates are then formatted per kind, and document
//! snippets produce citations the response can carry.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use engram_config::{BalanceBias, EngineConfig};
use engram_core::{
    ChatId, Citation, MemoryFilter, MemoryKind, MemoryProvider, RankedMatch, Result,
    SessionRepository,
};

use crate::context::relevance::RelevanceThresholdPolicy;
use crate::context::token::TokenCounter;

/// How many candidates to pull per kind before global ranking.
const PER_KIND_SEARCH_LIMIT: usize = 10;

const PAST_MEMORIES_HEADER: &str = "Past memories:\n";
const DOCUMENT_HEADER: &str = "\nSnippets from shared documents. Cite a snippet's link in \
                               square brackets when it informs your answer:\n";

/// The outcome of one retrieval pass.
#[derive(Debug, Clone, Default)]
pub struct RetrievedMemories {
    /// Formatted memory text, ready to place in the assembly.
    pub text: String,

    /// Citations for document-kind matches, keyed by link. Non-document
    /// memories are not citable.
    pub citations: BTreeMap<String, Citation>,

    /// Token count of `text`.
    pub token_count: usize,
}

/// Retrieves and formats semantic memories for one chat turn.
pub struct MemoryRetriever {
    sessions: Arc<dyn SessionRepository>,
    memory: Arc<dyn MemoryProvider>,
    policy: RelevanceThresholdPolicy,
    counter: TokenCounter,
    index: String,
    /// Configured kinds in declaration order, with the document kind
    /// appended when the operator did not list it explicitly.
    kinds: Vec<(MemoryKind, BalanceBias)>,
}

impl MemoryRetriever {
    pub fn new(
        config: &EngineConfig,
        sessions: Arc<dyn SessionRepository>,
        memory: Arc<dyn MemoryProvider>,
    ) -> Self {
        let policy = RelevanceThresholdPolicy::from_config(config);
        let mut kinds: Vec<(MemoryKind, BalanceBias)> = config
            .memory_map
            .iter()
            .map(|entry| (entry.kind(), entry.bias.clone()))
            .collect();
        if !kinds.iter().any(|(kind, _)| *kind == MemoryKind::Document) {
            kinds.push((
                MemoryKind::Document,
                BalanceBias::Fixed {
                    min: policy.document_threshold(),
                },
            ));
        }
        Self {
            sessions,
            memory,
            policy,
            counter: TokenCounter::new(),
            index: config.memory_index.clone(),
            kinds,
        }
    }

    /// Retrieve memories relevant to `query`, formatted to fit
    /// `token_budget`.
    ///
    /// Fails with `Error::SessionNotFound` when the chat does not exist.
    /// A search failure against one kind is logged and treated as zero
    /// results for that kind; the other kinds still contribute.
    pub async fn retrieve(
        &self,
        query: &str,
        chat_id: &ChatId,
        token_budget: usize,
    ) -> Result<RetrievedMemories> {
        let session = self.sessions.find_by_id(chat_id).await?;
        let balance = session.memory_balance();

        // Gather candidates across every kind.
        let mut candidates: Vec<(usize, RankedMatch)> = Vec::new();
        for (idx, (kind, bias)) in self.kinds.iter().enumerate() {
            let min_relevance = self.policy.threshold(bias, balance)?;
            let filter = MemoryFilter {
                chat_id: chat_id.clone(),
                kind: kind.clone(),
                min_relevance,
            };
            match self
                .memory
                .search(&self.index, query, &filter, PER_KIND_SEARCH_LIMIT)
                .await
            {
                Ok(matches) => candidates.extend(matches.into_iter().map(|m| (idx, m))),
                Err(err) => {
                    warn!(kind = %kind, error = %err, "Memory search failed, continuing without this kind");
                }
            }
        }

        // Rank globally, most relevant first.
        candidates.sort_by(|a, b| {
            b.1.relevance
                .partial_cmp(&a.1.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // Greedy acceptance. Each candidate is costed as its rendered line,
        // plus its section header the first time that section opens, so the
        // formatted text can never exceed the budget.
        let mut remaining = token_budget;
        let mut past_open = false;
        let mut doc_open = false;
        let mut accepted: Vec<Vec<RankedMatch>> = vec![Vec::new(); self.kinds.len()];
        let total_candidates = candidates.len();
        for (idx, candidate) in candidates {
            let is_document = self.kinds[idx].0 == MemoryKind::Document;
            let line = if is_document {
                Self::document_line(&candidate)
            } else {
                Self::memory_line(&self.kinds[idx].0, &candidate)
            };
            let mut cost = self.counter.count(&line);
            if is_document && !doc_open {
                cost += self.counter.count(DOCUMENT_HEADER);
            } else if !is_document && !past_open {
                cost += self.counter.count(PAST_MEMORIES_HEADER);
            }
            if cost >= remaining {
                break;
            }
            remaining -= cost;
            if is_document {
                doc_open = true;
            } else {
                past_open = true;
            }
            accepted[idx].push(candidate);
        }

        // Format accepted candidates, partitioned back into their kinds in
        // declaration order.
        let mut text = String::new();
        if past_open {
            text.push_str(PAST_MEMORIES_HEADER);
            for (idx, (kind, _)) in self.kinds.iter().enumerate() {
                if *kind == MemoryKind::Document {
                    continue;
                }
                for m in &accepted[idx] {
                    text.push_str(&Self::memory_line(kind, m));
                }
            }
        }
        let mut citations = BTreeMap::new();
        if doc_open {
            text.push_str(DOCUMENT_HEADER);
            for (idx, (kind, _)) in self.kinds.iter().enumerate() {
                if *kind != MemoryKind::Document {
                    continue;
                }
                for m in &accepted[idx] {
                    text.push_str(&Self::document_line(m));
                    let link = m.link.clone().unwrap_or_else(|| m.id.clone());
                    citations.insert(
                        link.clone(),
                        Citation {
                            source_name: m.source_name.clone(),
                            link,
                            excerpt: m.text.clone(),
                            relevance: m.relevance,
                        },
                    );
                }
            }
        }
        let text = text.trim_start_matches('\n').to_string();

        let included: usize = accepted.iter().map(|v| v.len()).sum();
        debug!(
            chat_id = %chat_id,
            included,
            considered = total_candidates,
            budget = token_budget,
            "Memory retrieval complete"
        );

        let token_count = self.counter.count(&text);
        Ok(RetrievedMemories {
            text,
            citations,
            token_count,
        })
    }

    fn memory_line(kind: &MemoryKind, m: &RankedMatch) -> String {
        format!("[{}] {}\n", kind, m.text)
    }

    fn document_line(m: &RankedMatch) -> String {
        match &m.link {
            Some(link) => format!("\"{}\" (source: {}) [{}]\n", m.text, m.source_name, link),
            None => format!("\"{}\" (source: {})\n", m.text, m.source_name),
        }
    }
}
