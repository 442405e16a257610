//! Post-turn semantic memory extraction.
//!
//! After a turn completes, each configured memory kind gets one bounded
//! completion call asking the model to summarize the exchange into
//! structured memory items. The model is not guaranteed to emit valid
//! JSON every time, so a parse failure is logged and the kind is skipped,
//! not surfaced. Novelty is checked with a top-1 near-duplicate search at
//! the relevance policy's near-duplicate bound before an item is stored;
//! the check is
//! best-effort and race-tolerant, so two concurrent turns may both store
//! near-duplicates. Nothing in here can fail the turn.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use engram_config::EngineConfig;
use engram_core::error::{ExtractionError, MemoryError};
use engram_core::{
    ChatId, CompletionProvider, CompletionRequest, CompletionSettings, DocumentImport,
    MemoryFilter, MemoryKind, MemoryProvider, MemoryRecord, PersonaTemplate, PromptBlock,
};

use crate::context::relevance::RelevanceThresholdPolicy;
use crate::context::token::TokenCounter;

/// One extracted memory item, as the model emits it.
#[derive(Debug, Deserialize)]
struct ExtractedItem {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ExtractionPayload {
    #[serde(default)]
    items: Vec<ExtractedItem>,
}

/// Harvests durable memories from finished exchanges.
pub struct SemanticMemoryExtractor {
    config: Arc<EngineConfig>,
    provider: Arc<dyn CompletionProvider>,
    memory: Arc<dyn MemoryProvider>,
    policy: RelevanceThresholdPolicy,
    counter: TokenCounter,
}

impl SemanticMemoryExtractor {
    pub fn new(
        config: Arc<EngineConfig>,
        provider: Arc<dyn CompletionProvider>,
        memory: Arc<dyn MemoryProvider>,
    ) -> Self {
        let policy = RelevanceThresholdPolicy::from_config(&config);
        Self {
            config,
            provider,
            memory,
            policy,
            counter: TokenCounter::new(),
        }
    }

    /// Extract and persist memories from one exchange. Fire-and-log:
    /// failures never propagate to the turn.
    pub async fn extract(&self, chat_id: &ChatId, exchange: &str) {
        for entry in &self.config.memory_map {
            let kind = entry.kind();
            // Document memories come from ingestion, not from chat turns.
            if kind == MemoryKind::Document {
                continue;
            }
            self.extract_kind(chat_id, &kind, exchange).await;
        }
    }

    async fn extract_kind(&self, chat_id: &ChatId, kind: &MemoryKind, exchange: &str) {
        let template = &self.config.extraction_prompt;
        let budget = self
            .config
            .completion_token_limit
            .saturating_sub(self.config.extraction.response_token_limit)
            .saturating_sub(self.counter.count(template));
        let vars = BTreeMap::from([
            ("kind".to_string(), kind.tag().to_string()),
            (
                "exchange".to_string(),
                self.counter.truncate_to_fit(exchange, budget),
            ),
        ]);
        let prompt = match PersonaTemplate::new(template).render(&vars) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(kind = %kind, error = %err, "Extraction prompt render failed, skipping kind");
                return;
            }
        };

        let request = CompletionRequest::new(
            vec![PromptBlock::system(prompt)],
            CompletionSettings {
                max_tokens: self.config.extraction.response_token_limit as u32,
                ..Default::default()
            },
        );
        let response = match self.provider.complete(request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(kind = %kind, error = %err, "Extraction completion failed, skipping kind");
                return;
            }
        };

        let items = match Self::parse_items(kind, &response.content) {
            Ok(items) => items,
            Err(err) => {
                warn!(kind = %kind, error = %err, "Skipping kind");
                return;
            }
        };
        debug!(kind = %kind, count = items.len(), "Extracted memory items");

        for item in items {
            let text = item.text.trim();
            if text.is_empty() {
                continue;
            }
            if let Err(err) = self.store_if_novel(chat_id, kind, text).await {
                warn!(kind = %kind, error = %err, "Failed to store extracted memory, continuing");
            }
        }
    }

    /// Parse the model's reply into memory items. Models sometimes wrap
    /// the JSON in prose or code fences, so the outermost object is taken.
    fn parse_items(
        kind: &MemoryKind,
        raw: &str,
    ) -> Result<Vec<ExtractedItem>, ExtractionError> {
        let trimmed = raw.trim();
        let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
            (Some(start), Some(end)) if start < end => &trimmed[start..=end],
            _ => trimmed,
        };
        serde_json::from_str::<ExtractionPayload>(candidate)
            .map(|payload| payload.items)
            .map_err(|err| ExtractionError::Parse {
                kind: kind.tag().to_string(),
                reason: err.to_string(),
            })
    }

    /// Store an item unless a near-duplicate already exists for this chat
    /// and kind.
    async fn store_if_novel(
        &self,
        chat_id: &ChatId,
        kind: &MemoryKind,
        text: &str,
    ) -> Result<(), MemoryError> {
        let filter = MemoryFilter {
            chat_id: chat_id.clone(),
            kind: kind.clone(),
            min_relevance: self.policy.near_duplicate_threshold(),
        };
        let existing = self
            .memory
            .search(&self.config.memory_index, text, &filter, 1)
            .await?;
        if let Some(duplicate) = existing.first() {
            debug!(kind = %kind, id = %duplicate.id, "Near-duplicate exists, skipping");
            return Ok(());
        }

        self.memory
            .import_document(DocumentImport {
                index: self.config.memory_index.clone(),
                records: vec![MemoryRecord::new(chat_id, kind.clone(), text)],
            })
            .await
    }
}
