//! In-process memory provider, useful for testing and ephemeral sessions.
//!
//! Stores records per index behind an `RwLock`, with an [`IndexStatusCache`]
//! gating access: a search first probes the index and treats an unreachable
//! one as empty rather than an error, and the first import marks the index
//! ready. Ranking goes through [`rank_by_embedding`] when an embedder is
//! attached, and a keyword heuristic otherwise.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use engram_core::error::MemoryError;
use engram_core::memory::{
    DocumentImport, MemoryFilter, MemoryProvider, MemoryRecord, RankedMatch,
};

use crate::status::IndexStatusCache;
use crate::vector::rank_by_embedding;

/// An embedding function injected by the host. Embedding itself is the
/// provider's business; the engine never sees vectors.
pub type EmbedFn = dyn Fn(&str) -> Vec<f32> + Send + Sync;

/// An in-process memory provider over per-index record lists.
pub struct InProcessMemory {
    indexes: RwLock<HashMap<String, Vec<MemoryRecord>>>,
    status: IndexStatusCache,
    embedder: Option<Arc<EmbedFn>>,
}

impl InProcessMemory {
    pub fn new() -> Self {
        Self {
            indexes: RwLock::new(HashMap::new()),
            status: IndexStatusCache::new(),
            embedder: None,
        }
    }

    /// Attach an embedding function. Imported records without embeddings
    /// are embedded on write; queries are embedded on search.
    pub fn with_embedder(mut self, embedder: Arc<EmbedFn>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Number of records in an index.
    pub async fn count(&self, index: &str) -> usize {
        self.indexes
            .read()
            .await
            .get(index)
            .map(|records| records.len())
            .unwrap_or(0)
    }

    /// Whether the index has passed its reachability probe.
    pub async fn index_ready(&self, index: &str) -> bool {
        self.status.is_ready(index).await
    }

    /// Reachability probe for one index: it must exist in the store.
    async fn probe_index(&self, index: &str) -> Result<(), MemoryError> {
        if self.indexes.read().await.contains_key(index) {
            Ok(())
        } else {
            Err(MemoryError::IndexMissing(index.to_string()))
        }
    }

    fn keyword_score(text: &str, query: &str) -> f64 {
        let text_lower = text.to_lowercase();
        let query_lower = query.to_lowercase();
        if query_lower.is_empty() || text_lower.is_empty() {
            return 0.0;
        }
        if text_lower == query_lower {
            return 1.0;
        }
        if text_lower.contains(&query_lower) {
            return query_lower.len() as f64 / text_lower.len() as f64;
        }
        if query_lower.contains(&text_lower) {
            return text_lower.len() as f64 / query_lower.len() as f64;
        }

        // Fraction of distinct query words that appear in the text.
        let words: Vec<&str> = query_lower.split_whitespace().collect();
        if words.is_empty() {
            return 0.0;
        }
        let matched = words
            .iter()
            .filter(|w| text_lower.contains(*w))
            .count();
        matched as f64 / words.len() as f64 * 0.5
    }
}

impl Default for InProcessMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryProvider for InProcessMemory {
    fn name(&self) -> &str {
        "in_process"
    }

    async fn search(
        &self,
        index: &str,
        query: &str,
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<RankedMatch>, MemoryError> {
        // An index that has never been written is not an error, just empty.
        if self
            .status
            .ensure_ready(index, || self.probe_index(index))
            .await
            .is_err()
        {
            return Ok(Vec::new());
        }

        let indexes = self.indexes.read().await;
        let Some(records) = indexes.get(index) else {
            return Ok(Vec::new());
        };

        let scoped: Vec<MemoryRecord> = records
            .iter()
            .filter(|r| r.chat_id == filter.chat_id && r.kind == filter.kind)
            .cloned()
            .collect();

        if let Some(embed) = &self.embedder {
            let query_embedding = embed(query);
            return Ok(rank_by_embedding(
                &scoped,
                &query_embedding,
                limit,
                filter.min_relevance,
            ));
        }

        let mut results: Vec<RankedMatch> = scoped
            .iter()
            .map(|r| RankedMatch {
                id: r.id.clone(),
                text: r.text.clone(),
                relevance: Self::keyword_score(&r.text, query),
                source_name: r.source_name.clone(),
                link: r.link.clone(),
            })
            .filter(|m| m.relevance >= filter.min_relevance)
            .collect();

        results.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }

    async fn import_document(&self, request: DocumentImport) -> Result<(), MemoryError> {
        {
            let mut indexes = self.indexes.write().await;
            let records = indexes.entry(request.index.clone()).or_default();
            for mut record in request.records {
                if record.id.is_empty() {
                    record.id = Uuid::new_v4().to_string();
                }
                if record.embedding.is_none() {
                    if let Some(embed) = &self.embedder {
                        record.embedding = Some(embed(&record.text));
                    }
                }
                records.push(record);
            }
        }
        // The index exists once the first import lands.
        self.status
            .ensure_ready(&request.index, || self.probe_index(&request.index))
            .await
    }

    async fn delete_document(&self, id: &str, index: &str) -> Result<(), MemoryError> {
        let mut indexes = self.indexes.write().await;
        let Some(records) = indexes.get_mut(index) else {
            return Err(MemoryError::IndexMissing(index.to_string()));
        };
        records.retain(|r| r.id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::memory::MemoryKind;
    use engram_core::message::ChatId;

    fn import(records: Vec<MemoryRecord>) -> DocumentImport {
        DocumentImport {
            index: "test".into(),
            records,
        }
    }

    fn filter(chat: &str, kind: MemoryKind, min: f64) -> MemoryFilter {
        MemoryFilter {
            chat_id: ChatId::from(chat),
            kind,
            min_relevance: min,
        }
    }

    /// A toy embedder: counts occurrences of a few marker words.
    fn toy_embedder() -> Arc<EmbedFn> {
        Arc::new(|text: &str| {
            let lower = text.to_lowercase();
            ["rust", "travel", "music"]
                .iter()
                .map(|w| lower.matches(w).count() as f32)
                .collect()
        })
    }

    #[tokio::test]
    async fn search_scopes_by_chat_and_kind() {
        let memory = InProcessMemory::new();
        let chat_a = ChatId::from("a");
        let chat_b = ChatId::from("b");
        memory
            .import_document(import(vec![
                MemoryRecord::new(&chat_a, MemoryKind::Working, "likes rust"),
                MemoryRecord::new(&chat_a, MemoryKind::LongTerm, "likes rust a lot"),
                MemoryRecord::new(&chat_b, MemoryKind::Working, "likes rust too"),
            ]))
            .await
            .unwrap();

        let results = memory
            .search("test", "likes rust", &filter("a", MemoryKind::Working, 0.0), 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "likes rust");
    }

    #[tokio::test]
    async fn exact_text_scores_one() {
        let memory = InProcessMemory::new();
        let chat = ChatId::from("a");
        memory
            .import_document(import(vec![MemoryRecord::new(
                &chat,
                MemoryKind::LongTerm,
                "The user prefers window seats on long flights",
            )]))
            .await
            .unwrap();

        let results = memory
            .search(
                "test",
                "The user prefers window seats on long flights",
                &filter("a", MemoryKind::LongTerm, 0.9),
                1,
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].relevance - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn min_relevance_filters_results() {
        let memory = InProcessMemory::new();
        let chat = ChatId::from("a");
        memory
            .import_document(import(vec![MemoryRecord::new(
                &chat,
                MemoryKind::Working,
                "an unrelated note about gardening",
            )]))
            .await
            .unwrap();

        let results = memory
            .search("test", "quantum computing", &filter("a", MemoryKind::Working, 0.5), 10)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn embedder_drives_scoring_when_attached() {
        let memory = InProcessMemory::new().with_embedder(toy_embedder());
        let chat = ChatId::from("a");
        memory
            .import_document(import(vec![
                MemoryRecord::new(&chat, MemoryKind::Working, "rust rust rust"),
                MemoryRecord::new(&chat, MemoryKind::Working, "travel plans"),
            ]))
            .await
            .unwrap();

        let results = memory
            .search("test", "all about rust", &filter("a", MemoryKind::Working, 0.5), 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].text.contains("rust"));
    }

    #[tokio::test]
    async fn search_on_unknown_index_is_empty() {
        let memory = InProcessMemory::new();
        let results = memory
            .search("nope", "anything", &filter("a", MemoryKind::Working, 0.0), 10)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn first_import_marks_the_index_ready() {
        let memory = InProcessMemory::new();
        let chat = ChatId::from("a");

        // A failed probe is not cached: the index stays unready until it
        // actually exists.
        assert!(!memory.index_ready("test").await);
        memory
            .search("test", "anything", &filter("a", MemoryKind::Working, 0.0), 10)
            .await
            .unwrap();
        assert!(!memory.index_ready("test").await);

        memory
            .import_document(import(vec![MemoryRecord::new(
                &chat,
                MemoryKind::Working,
                "now reachable",
            )]))
            .await
            .unwrap();
        assert!(memory.index_ready("test").await);

        let results = memory
            .search("test", "now reachable", &filter("a", MemoryKind::Working, 0.9), 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let memory = InProcessMemory::new();
        let chat = ChatId::from("a");
        let record = MemoryRecord::new(&chat, MemoryKind::Working, "delete me");
        let id = record.id.clone();
        memory.import_document(import(vec![record])).await.unwrap();
        assert_eq!(memory.count("test").await, 1);

        memory.delete_document(&id, "test").await.unwrap();
        assert_eq!(memory.count("test").await, 0);

        let err = memory.delete_document(&id, "missing").await.unwrap_err();
        assert!(matches!(err, MemoryError::IndexMissing(_)));
    }

    #[tokio::test]
    async fn import_generates_ids_and_embeddings() {
        let memory = InProcessMemory::new().with_embedder(toy_embedder());
        let chat = ChatId::from("a");
        let mut record = MemoryRecord::new(&chat, MemoryKind::Working, "music and travel");
        record.id = String::new();
        memory.import_document(import(vec![record])).await.unwrap();

        let indexes = memory.indexes.read().await;
        let stored = &indexes.get("test").unwrap()[0];
        assert!(!stored.id.is_empty());
        assert_eq!(stored.embedding.as_deref(), Some(&[0.0, 1.0, 1.0][..]));
    }
}
