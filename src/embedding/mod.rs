//! Text-to-vector embedding boundary.
//!
//! Provides the [`EmbeddingProvider`] trait, batch splitting with shape
//! checks ([`embed_in_batches`]), and a local implementation using
//! all-MiniLM-L6-v2 (384 dimensions, L2-normalized). The provider is created
//! via [`create_provider`] from configuration.

pub mod local;

use crate::config::EmbeddingConfig;
use crate::error::{CairnError, Result};

/// Number of dimensions in the embedding vectors (all-MiniLM-L6-v2).
pub const EMBEDDING_DIM: usize = 384;

/// Trait for embedding text into vectors.
///
/// Implementations produce vectors of exactly [`dimensions()`](Self::dimensions)
/// entries, one per input, in input order. All methods are synchronous;
/// callers in async contexts should use `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }

    /// Identifier stored next to every vector, e.g. `"all-MiniLM-L6-v2"`.
    fn model_id(&self) -> &str;
}

/// Embed `texts` in groups of at most `batch_size`, checking each batch's shape.
///
/// # Errors
///
/// [`CairnError::Processing`] if a batch returns the wrong number of vectors
/// or a vector whose length differs from the provider's dimensions.
pub fn embed_in_batches(
    provider: &dyn EmbeddingProvider,
    texts: &[&str],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let dims = provider.dimensions();
    let mut vectors = Vec::with_capacity(texts.len());

    for (batch_index, batch) in texts.chunks(batch_size.max(1)).enumerate() {
        let embedded = provider.embed_batch(batch)?;
        if embedded.len() != batch.len() {
            return Err(CairnError::Processing(format!(
                "embedding batch {batch_index} returned {} vectors for {} inputs",
                embedded.len(),
                batch.len()
            )));
        }
        if let Some(bad) = embedded.iter().find(|v| v.len() != dims) {
            return Err(CairnError::Processing(format!(
                "embedding batch {batch_index} returned a {}-dim vector, expected {dims}",
                bad.len()
            )));
        }
        vectors.extend(embedded);
    }

    tracing::debug!(
        model = provider.model_id(),
        count = vectors.len(),
        "texts embedded"
    );
    Ok(vectors)
}

/// Create an embedding provider from config.
///
/// Currently only `"local"` is supported (ONNX Runtime + all-MiniLM-L6-v2).
/// Returns an error if model files are not found; run `cairn model download` first.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "local" => {
            let provider = local::LocalEmbeddingProvider::new(config)?;
            Ok(Box::new(provider))
        }
        other => Err(CairnError::Validation(format!(
            "unknown embedding provider: {other}. Supported: local"
        ))),
    }
}
