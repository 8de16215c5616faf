use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::chunking::TokenEstimator;
use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{CairnError, Result};

use super::budget::{pack_to_budget, PackOptions, PackedSnippet};
use super::filter::apply_filters;
use super::mmr::{self, MmrOptions};
use super::prompt::{self, NOT_ENOUGH_CONTEXT, SYSTEM_PROMPT};
use super::types::{
    Answer, CandidateChunk, Citation, ContextBlock, RankedChunk, RetrievalOutcome, RetrievalRequest,
};

/// The language model on the far side of retrieval.
///
/// Receives the system and user prompts and returns its raw reply, which is
/// expected to be the JSON object described in [`SYSTEM_PROMPT`].
pub trait AnswerSynthesizer: Send + Sync {
    fn synthesize(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

/// Stateless query pipeline: embed, filter, select, pack, cite.
pub struct Orchestrator {
    provider: Arc<dyn EmbeddingProvider>,
    estimator: Arc<dyn TokenEstimator>,
    config: RetrievalConfig,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        estimator: Arc<dyn TokenEstimator>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            provider,
            estimator,
            config,
        }
    }

    /// Run a query against `candidates`.
    ///
    /// An empty or fully filtered candidate set yields an empty outcome with
    /// confidence 0, not an error.
    ///
    /// # Errors
    ///
    /// [`CairnError::Validation`] for a blank query; embedding failures as
    /// [`CairnError::Processing`].
    pub async fn query(
        &self,
        request: &RetrievalRequest,
        candidates: Vec<CandidateChunk>,
    ) -> Result<RetrievalOutcome> {
        if request.query.trim().is_empty() {
            return Err(CairnError::Validation("query must not be empty".into()));
        }

        let provider = Arc::clone(&self.provider);
        let text = request.query.clone();
        let query_vector = tokio::task::spawn_blocking(move || provider.embed(&text))
            .await
            .map_err(|e| CairnError::Processing(format!("query embedding task failed: {e}")))??;

        Ok(self.query_with_vector(&query_vector, request, candidates, Utc::now()))
    }

    /// The synchronous part of [`query`](Self::query), given the query's embedding.
    pub fn query_with_vector(
        &self,
        query_vector: &[f32],
        request: &RetrievalRequest,
        candidates: Vec<CandidateChunk>,
        now: DateTime<Utc>,
    ) -> RetrievalOutcome {
        let offered = candidates.len();
        let survivors = apply_filters(candidates, &request.filters);

        let options = MmrOptions {
            lambda: request.lambda.unwrap_or(self.config.lambda),
            max_results: request.max_results.unwrap_or(self.config.max_results),
        };
        let mut ranked = select_ranked(query_vector, survivors, &options);
        mmr::time_decay_rerank(&mut ranked, now, self.config.time_decay_weight);

        let packed = pack_to_budget(
            ranked,
            &PackOptions {
                max_tokens: self.config.token_budget,
                min_snippet_tokens: self.config.min_snippet_tokens,
            },
            self.estimator.as_ref(),
        );

        let blocks = context_blocks(&packed);
        let citations = citations(&blocks);
        let confidence = confidence(&blocks, self.config.max_citations);

        tracing::info!(
            offered,
            packed = blocks.len(),
            tokens = packed.iter().map(|p| p.tokens).sum::<usize>(),
            confidence,
            "retrieval complete"
        );

        RetrievalOutcome {
            question: request.query.clone(),
            user_prompt: prompt::build_user_prompt(&request.query, &blocks),
            system_prompt: SYSTEM_PROMPT.to_string(),
            blocks,
            citations,
            confidence,
        }
    }
}

/// Run MMR over the candidates and pair each pick with its source chunk.
fn select_ranked(
    query_vector: &[f32],
    candidates: Vec<CandidateChunk>,
    options: &MmrOptions,
) -> Vec<RankedChunk> {
    let mmr_candidates: Vec<_> = candidates.iter().map(CandidateChunk::to_mmr_candidate).collect();
    let vectors: HashMap<&str, &[f32]> = candidates
        .iter()
        .filter_map(|c| Some((c.chunk.id.as_str(), c.vector.as_deref()?)))
        .collect();

    let selection = mmr::select(query_vector, &mmr_candidates, &vectors, options);

    let mut by_id: HashMap<String, CandidateChunk> = candidates
        .into_iter()
        .map(|c| (c.chunk.id.clone(), c))
        .collect();
    selection
        .selected
        .into_iter()
        .filter_map(|picked| {
            let source = by_id.remove(&picked.id)?;
            Some(RankedChunk {
                chunk: source.chunk,
                occurred_at: source.occurred_at,
                relevance: picked.relevance,
                score: picked.relevance,
            })
        })
        .collect()
}

fn context_blocks(packed: &[PackedSnippet]) -> Vec<ContextBlock> {
    packed
        .iter()
        .enumerate()
        .map(|(i, snippet)| ContextBlock {
            index: i + 1,
            chunk_id: snippet.item.chunk.id.clone(),
            entry_id: snippet.item.chunk.entry_id.clone(),
            start: snippet.start,
            end: snippet.end,
            text: snippet.text.clone(),
            // recency only reorders; blocks report plain relevance
            score: snippet.item.relevance.clamp(0.0, 1.0),
            truncated: snippet.truncated,
        })
        .collect()
}

fn citations(blocks: &[ContextBlock]) -> Vec<Citation> {
    blocks
        .iter()
        .map(|block| Citation {
            chunk_id: block.chunk_id.clone(),
            entry_id: block.entry_id.clone(),
            start: block.start,
            end: block.end,
            score: block.score,
        })
        .collect()
}

/// Mean block relevance scaled by how many of `max_citations` slots are filled.
fn confidence(blocks: &[ContextBlock], max_citations: usize) -> f32 {
    if blocks.is_empty() {
        return 0.0;
    }
    let mean = blocks.iter().map(|b| b.score).sum::<f32>() / blocks.len() as f32;
    let coverage = (blocks.len() as f32 / max_citations.max(1) as f32).min(1.0);
    mean * coverage
}

/// Produce the final answer for a retrieval outcome.
///
/// With no context the fixed "not enough context" answer is returned and the
/// synthesizer is never called.
pub fn answer(outcome: &RetrievalOutcome, synthesizer: &dyn AnswerSynthesizer) -> Result<Answer> {
    if outcome.is_empty() {
        return Ok(Answer {
            answer: NOT_ENOUGH_CONTEXT.to_string(),
            citations: Vec::new(),
            confidence: 0.0,
        });
    }
    let raw = synthesizer.synthesize(&outcome.system_prompt, &outcome.user_prompt)?;
    prompt::parse_reply(&raw, &outcome.blocks)
}
