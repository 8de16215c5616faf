//! Offset-preserving chunker.
//!
//! Entry text is split into overlapping chunks whose character offsets point
//! back into the source, so every chunk (and every citation built from one)
//! can be verified against the decrypted entry.

pub mod splitter;
pub mod tokens;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{CairnConfig, ChunkingConfig};
use crate::error::{CairnError, Result};

pub use splitter::{chunk_text_with, Chunk};
pub use tokens::{HeuristicEstimator, TokenEstimator, TokenizerEstimator};

/// A chunk of one entry, ready to be embedded and stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub id: String,
    pub entry_id: String,
    pub start_off: usize,
    pub end_off: usize,
    pub text: String,
    pub tags: Vec<String>,
    pub importance: f32,
}

/// [`chunk_text_with`] using the `ceil(chars / 4)` heuristic.
pub fn chunk_text(text: &str, target_tokens: usize, overlap_tokens: usize) -> Vec<Chunk> {
    chunk_text_with(text, target_tokens, overlap_tokens, &HeuristicEstimator::default())
}

/// Slice `text` by character offsets. `None` if the range is out of bounds.
pub fn char_slice(text: &str, start: usize, end: usize) -> Option<&str> {
    if start > end {
        return None;
    }
    let mut indices = text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len()));
    let start_byte = indices.nth(start)?;
    let end_byte = if end == start {
        start_byte
    } else {
        indices.nth(end - start - 1)?
    };
    Some(&text[start_byte..end_byte])
}

/// Check that every chunk's offsets reproduce its text.
///
/// # Errors
///
/// [`CairnError::Validation`] naming the first chunk whose
/// `source[start..end].trim()` differs from its text.
pub fn validate_chunks(source: &str, chunks: &[Chunk]) -> Result<()> {
    for (i, chunk) in chunks.iter().enumerate() {
        let matches = char_slice(source, chunk.start, chunk.end)
            .is_some_and(|slice| slice.trim() == chunk.text);
        if !matches {
            return Err(CairnError::Validation(format!(
                "chunk {i} at [{}, {}) does not match its source text",
                chunk.start, chunk.end
            )));
        }
    }
    Ok(())
}

/// Chunk an entry and attach ids and metadata.
///
/// Importance is clamped to `[0, 1]`. Offsets are verified before anything
/// is returned; a mismatch is reported as [`CairnError::Processing`].
pub fn chunk_entry(
    entry_id: &str,
    text: &str,
    tags: &[String],
    importance: f32,
    config: &ChunkingConfig,
    estimator: &dyn TokenEstimator,
) -> Result<Vec<TextChunk>> {
    let chunks = chunk_text_with(text, config.target_tokens, config.overlap_tokens, estimator);
    validate_chunks(text, &chunks).map_err(|e| {
        CairnError::Processing(format!("chunker produced inconsistent offsets for entry {entry_id}: {e}"))
    })?;

    let importance = if importance.is_nan() {
        0.0
    } else {
        importance.clamp(0.0, 1.0)
    };

    tracing::debug!(entry_id, chunks = chunks.len(), "entry chunked");
    Ok(chunks
        .into_iter()
        .map(|chunk| TextChunk {
            id: uuid::Uuid::now_v7().to_string(),
            entry_id: entry_id.to_string(),
            start_off: chunk.start,
            end_off: chunk.end,
            text: chunk.text,
            tags: tags.to_vec(),
            importance,
        })
        .collect())
}

/// Build the estimator named by `chunking.estimator`.
///
/// `"tokenizer"` loads `tokenizer.json` from the embedding model directory.
pub fn create_estimator(config: &CairnConfig) -> Result<Arc<dyn TokenEstimator>> {
    match config.chunking.estimator.as_str() {
        "heuristic" => Ok(Arc::new(HeuristicEstimator::default())),
        "tokenizer" => {
            let path = crate::config::expand_tilde(&config.embedding.cache_dir).join("tokenizer.json");
            Ok(Arc::new(TokenizerEstimator::from_file(path)?))
        }
        other => Err(CairnError::Validation(format!(
            "unknown token estimator: {other}"
        ))),
    }
}
