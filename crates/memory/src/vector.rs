//! Vector similarity utilities.
//!
//! Pure-Rust cosine similarity and embedding-based ranking used by the
//! in-process provider. Real vector databases replace all of this.

use engram_core::memory::{MemoryRecord, RankedMatch};

/// Cosine similarity between two vectors, in [-1, 1].
///
/// 1 means identical direction, 0 orthogonal, -1 opposite. Mismatched
/// lengths, empty inputs, and zero vectors all score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }

    let denom = (norm_a * norm_b).sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    (dot / denom) as f32
}

/// Rank records by cosine similarity to a query embedding.
///
/// Only records that carry embeddings and meet the minimum relevance are
/// included; results are sorted by descending similarity.
pub fn rank_by_embedding(
    records: &[MemoryRecord],
    query_embedding: &[f32],
    limit: usize,
    min_relevance: f64,
) -> Vec<RankedMatch> {
    let mut scored: Vec<RankedMatch> = records
        .iter()
        .filter_map(|record| {
            let embedding = record.embedding.as_ref()?;
            let relevance = cosine_similarity(embedding, query_embedding) as f64;
            if relevance >= min_relevance {
                Some(RankedMatch {
                    id: record.id.clone(),
                    text: record.text.clone(),
                    relevance,
                    source_name: record.source_name.clone(),
                    link: record.link.clone(),
                })
            } else {
                None
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}
