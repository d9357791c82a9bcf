//! Embedding similarity and ranking shared by both tiers
//!
//! Scores are cosine similarity. Equal scores are ordered by recency (the
//! larger recency key wins), then by id so that results are always
//! deterministic.

use std::cmp::Ordering;

use crate::item::{MemoryItem, SearchHit};

/// Cosine similarity between two vectors
///
/// Returns a value between -1.0 and 1.0. Vectors of different lengths and
/// zero-norm vectors score 0.0. Sums are taken in `f64` so very large or very
/// small components neither overflow nor underflow; a non-finite result
/// scores 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot_product = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let score = (dot_product / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32;
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

/// Score every candidate against `query` and keep the best `k`
///
/// Each candidate carries a recency key used to break score ties.
pub fn rank<'a, I>(query: &[f32], candidates: I, k: usize) -> Vec<SearchHit>
where
    I: IntoIterator<Item = (&'a MemoryItem, u64)>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(&MemoryItem, u64, f32)> = candidates
        .into_iter()
        .map(|(item, recency)| (item, recency, cosine_similarity(query, &item.embedding)))
        .collect();

    scored.sort_by(|a, b| compare(b, a));
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(item, _, score)| SearchHit {
            item: item.clone(),
            score,
        })
        .collect()
}

// Ascending order: lower score, then older, then larger id.
fn compare(a: &(&MemoryItem, u64, f32), b: &(&MemoryItem, u64, f32)) -> Ordering {
    a.2.total_cmp(&b.2)
        .then(a.1.cmp(&b.1))
        .then_with(|| b.0.id.cmp(&a.0.id))
}
