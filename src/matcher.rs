//! Best-match selection over a cached embedding matrix.
//!
//! 1. Empty corpus or matrix → no match, nothing is embedded.
//! 2. Embed the query (batch of one). A query vector whose length differs
//!    from the matrix width is an error, not a miss.
//! 3. Cosine similarity against every row.
//! 4. Argmax; on ties the lowest index wins.
//! 5. Accept if `score >= threshold`.

use anyhow::{bail, Result};

use crate::cache::EmbeddingMatrix;
use crate::embedding::{cosine_similarity, embed_query, Embedder};
use crate::models::{FaqEntry, MatchResult};

pub const DEFAULT_THRESHOLD: f32 = 0.8;

/// Index and score of the row most similar to `query_vec`.
///
/// Returns `None` for an empty matrix. Only a strictly greater score replaces
/// the current best, so the first of several equal maxima is kept.
pub fn rank(query_vec: &[f32], matrix: &EmbeddingMatrix) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (index, row) in matrix.rows().iter().enumerate() {
        let score = cosine_similarity(query_vec, row);
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((index, score));
        }
    }
    best
}

/// Apply the threshold to a ranked candidate.
pub fn accept(entries: &[FaqEntry], ranked: (usize, f32), threshold: f32) -> Option<MatchResult> {
    let (index, score) = ranked;
    if score < threshold {
        tracing::debug!(index, score, threshold, "best match below threshold");
        return None;
    }
    entries.get(index).map(|entry| MatchResult {
        question: entry.question.clone(),
        answer: entry.answer.clone(),
        score,
    })
}

/// Embed `query` and return the best entry at or above `threshold`.
pub async fn best_match(
    embedder: &dyn Embedder,
    query: &str,
    entries: &[FaqEntry],
    matrix: &EmbeddingMatrix,
    threshold: f32,
) -> Result<Option<MatchResult>> {
    if entries.is_empty() || matrix.is_empty() {
        return Ok(None);
    }

    let query_vec = embed_query(embedder, query).await?;
    if query_vec.len() != matrix.dims() {
        bail!(
            "query embedding has {} dimensions but cached embeddings have {} (model changed? clear the cache)",
            query_vec.len(),
            matrix.dims()
        );
    }

    let Some(ranked) = rank(&query_vec, matrix) else {
        return Ok(None);
    };
    tracing::debug!(index = ranked.0, score = ranked.1, "best match found");

    Ok(accept(entries, ranked, threshold))
}
