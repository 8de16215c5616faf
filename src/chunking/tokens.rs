//! Token-count estimation for chunk sizing and budget packing.

use std::path::Path;

use tokenizers::Tokenizer;

use crate::error::{CairnError, Result};

/// Estimates how many model tokens a piece of text occupies.
///
/// Implementations must be monotone: a longer prefix of the same text never
/// counts fewer tokens than a shorter one. Chunking and budget truncation
/// rely on this.
pub trait TokenEstimator: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Length heuristic: roughly one token per four characters.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicEstimator {
    chars_per_token: usize,
}

impl HeuristicEstimator {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for HeuristicEstimator {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenEstimator for HeuristicEstimator {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }
}

/// Exact counts from a HuggingFace tokenizer, e.g. the embedding model's own.
pub struct TokenizerEstimator {
    tokenizer: Tokenizer,
    fallback: HeuristicEstimator,
}

impl TokenizerEstimator {
    pub fn new(tokenizer: Tokenizer) -> Self {
        Self {
            tokenizer,
            fallback: HeuristicEstimator::default(),
        }
    }

    /// Load a `tokenizer.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            CairnError::Processing(format!(
                "failed to load tokenizer from {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self::new(tokenizer))
    }
}

impl TokenEstimator for TokenizerEstimator {
    fn count(&self, text: &str) -> usize {
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => encoding.len(),
            Err(err) => {
                tracing::error!(error = %err, "tokenizer failed to encode text, using length heuristic");
                self.fallback.count(text)
            }
        }
    }
}
