//! Maximal Marginal Relevance selection and recency reranking.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::types::{MmrCandidate, RankedChunk};

/// Half-life of the recency boost, in hours.
const DECAY_HALF_LIFE_HOURS: f64 = 24.0;

#[derive(Debug, Clone, Copy)]
pub struct MmrOptions {
    /// Relevance weight. 1.0 ranks by relevance alone, 0.0 by novelty alone.
    pub lambda: f32,
    pub max_results: usize,
}

/// Selected candidates in pick order, plus the MMR score each was picked with.
#[derive(Debug, Clone, Default)]
pub struct MmrSelection {
    pub selected: Vec<MmrCandidate>,
    pub scores: HashMap<String, f32>,
}

/// Cosine similarity clamped to `[-1, 1]`.
///
/// `None` for empty or mismatched vectors and for zero-norm inputs.
pub fn cosine_similarity(lhs: &[f32], rhs: &[f32]) -> Option<f32> {
    if lhs.is_empty() || lhs.len() != rhs.len() {
        return None;
    }

    let mut dot = 0.0_f32;
    let mut lhs_norm = 0.0_f32;
    let mut rhs_norm = 0.0_f32;

    for (l, r) in lhs.iter().zip(rhs) {
        dot += l * r;
        lhs_norm += l * l;
        rhs_norm += r * r;
    }

    if lhs_norm <= f32::EPSILON || rhs_norm <= f32::EPSILON {
        return None;
    }

    Some((dot / (lhs_norm.sqrt() * rhs_norm.sqrt())).clamp(-1.0, 1.0))
}

struct Pooled<'a> {
    candidate: &'a MmrCandidate,
    vector: &'a [f32],
    relevance: f32,
    /// Highest similarity to anything selected so far; `None` until the
    /// first pick, which scores as 0.
    penalty: Option<f32>,
}

/// Greedily pick up to `max_results` candidates maximizing
/// `λ·relevance − (1−λ)·max_similarity_to_selected`.
///
/// Candidates whose vector is missing or incomparable with the query are
/// skipped. Ties go to the candidate that appears first in `candidates`.
pub fn select(
    query: &[f32],
    candidates: &[MmrCandidate],
    vectors_by_id: &HashMap<&str, &[f32]>,
    options: &MmrOptions,
) -> MmrSelection {
    let lambda = options.lambda.clamp(0.0, 1.0);

    let mut pool: Vec<Pooled<'_>> = candidates
        .iter()
        .filter_map(|candidate| {
            let vector = *vectors_by_id.get(candidate.id.as_str())?;
            let relevance = cosine_similarity(query, vector)?;
            Some(Pooled {
                candidate,
                vector,
                relevance,
                penalty: None,
            })
        })
        .collect();

    let skipped = candidates.len() - pool.len();
    if skipped > 0 {
        tracing::debug!(skipped, "candidates without usable vectors skipped");
    }

    let mut selection = MmrSelection::default();
    while selection.selected.len() < options.max_results && !pool.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (pos, item) in pool.iter().enumerate() {
            let score = lambda * item.relevance - (1.0 - lambda) * item.penalty.unwrap_or(0.0);
            if score > best_score {
                best_pos = pos;
                best_score = score;
            }
        }

        let picked = pool.remove(best_pos);
        for item in &mut pool {
            if let Some(similarity) = cosine_similarity(item.vector, picked.vector) {
                item.penalty = Some(item.penalty.map_or(similarity, |p| p.max(similarity)));
            }
        }

        let mut chosen = picked.candidate.clone();
        chosen.relevance = picked.relevance;
        selection.scores.insert(chosen.id.clone(), best_score);
        selection.selected.push(chosen);
    }

    selection
}

/// Blend each item's score with an exponential recency boost and re-sort.
///
/// `score = (1 − w)·score + w·2^(−age_hours / 24)`. Future timestamps count
/// as age zero. The sort is stable, so equal scores keep their order.
pub fn time_decay_rerank(items: &mut [RankedChunk], now: DateTime<Utc>, weight: f32) {
    let weight = weight.clamp(0.0, 1.0);
    if weight == 0.0 {
        return;
    }
    for item in items.iter_mut() {
        let age_hours = (now - item.occurred_at).num_seconds().max(0) as f64 / 3600.0;
        let decay = (-std::f64::consts::LN_2 * age_hours / DECAY_HALF_LIFE_HOURS).exp() as f32;
        item.score = (1.0 - weight) * item.score + weight * decay;
    }
    items.sort_by(|a, b| b.score.total_cmp(&a.score));
}
