//! Local ONNX Runtime embedding provider.
//!
//! Implements [`EmbeddingProvider`] using the all-MiniLM-L6-v2
//! model via `ort`. Handles tokenization, inference, mean pooling, and L2 normalization.

use std::fmt::Display;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{EmbeddingProvider, EMBEDDING_DIM};
use crate::config::EmbeddingConfig;
use crate::error::{CairnError, Result};

/// Maximum sequence length for all-MiniLM-L6-v2 (trained at 256).
const MAX_SEQ_LEN: usize = 256;

fn processing<E: Display>(context: &'static str) -> impl FnOnce(E) -> CairnError {
    move |e| CairnError::Processing(format!("{context}: {e}"))
}

/// Local ONNX-based embedding provider using all-MiniLM-L6-v2.
pub struct LocalEmbeddingProvider {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    model_id: String,
}

// Safety: Tokenizer is Send+Sync. Session is behind a Mutex, which
// guarantees exclusive access during run().
unsafe impl Send for LocalEmbeddingProvider {}
unsafe impl Sync for LocalEmbeddingProvider {}

impl LocalEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let cache_dir = crate::config::expand_tilde(&config.cache_dir);
        let model_path = cache_dir.join("model.onnx");
        let tokenizer_path = cache_dir.join("tokenizer.json");

        for (what, path) in [("ONNX model", &model_path), ("Tokenizer", &tokenizer_path)] {
            if !path.exists() {
                return Err(CairnError::Processing(format!(
                    "{what} not found at {}. Run `cairn model download` first.",
                    path.display()
                )));
            }
        }

        let session = Session::builder()
            .map_err(processing("failed to create ONNX session"))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(processing("failed to set optimization level"))?
            .with_intra_threads(4)
            .map_err(processing("failed to set intra-op threads"))?
            .commit_from_file(&model_path)
            .map_err(processing("failed to load ONNX model"))?;

        tracing::info!(model = %model_path.display(), "ONNX model loaded");

        let mut tokenizer =
            Tokenizer::from_file(&tokenizer_path).map_err(processing("failed to load tokenizer"))?;

        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(processing("failed to set truncation"))?;

        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        tracing::info!(tokenizer = %tokenizer_path.display(), "tokenizer loaded");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            model_id: config.model.clone(),
        })
    }
}

impl EmbeddingProvider for LocalEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| CairnError::Processing("model returned no embedding".into()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(processing("tokenization failed"))?;

        let batch_size = encodings.len();
        let seq_len = encodings.first().map_or(0, |e| e.get_ids().len());

        let mut input_ids_flat = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask_flat = Vec::with_capacity(batch_size * seq_len);

        for encoding in &encodings {
            input_ids_flat.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention_mask_flat.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }

        let shape = vec![batch_size as i64, seq_len as i64];
        let input_ids_tensor = Tensor::from_array((shape.clone(), input_ids_flat.into_boxed_slice()))
            .map_err(processing("failed to build input_ids tensor"))?;
        let attention_mask_tensor =
            Tensor::from_array((shape.clone(), attention_mask_flat.clone().into_boxed_slice()))
                .map_err(processing("failed to build attention_mask tensor"))?;
        // single segment, so token_type_ids are all zero
        let token_type_ids = vec![0i64; batch_size * seq_len];
        let token_type_ids_tensor = Tensor::from_array((shape, token_type_ids.into_boxed_slice()))
            .map_err(processing("failed to build token_type_ids tensor"))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| CairnError::Processing(format!("session lock poisoned: {e}")))?;

        let outputs = session
            .run(ort::inputs! {
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_ids_tensor,
            })
            .map_err(processing("ONNX inference failed"))?;

        // Output name varies by export; fall back to the first output.
        let token_emb_value = outputs
            .get("token_embeddings")
            .or_else(|| outputs.get("last_hidden_state"))
            .unwrap_or_else(|| &outputs[0]);

        let (shape, data) = token_emb_value
            .try_extract_tensor::<f32>()
            .map_err(processing("failed to extract token_embeddings tensor"))?;

        let dims: &[i64] = &shape;
        if dims.len() != 3 || dims[0] != batch_size as i64 || dims[2] != EMBEDDING_DIM as i64 {
            return Err(CairnError::Processing(format!(
                "unexpected token_embeddings shape: {dims:?}, expected [batch, seq, {EMBEDDING_DIM}]"
            )));
        }
        let hidden_dim = dims[2] as usize;
        let actual_seq_len = dims[1] as usize;

        let mut results = Vec::with_capacity(batch_size);
        for b in 0..batch_size {
            let mask = &attention_mask_flat[b * seq_len..(b + 1) * seq_len];
            let rows = &data[b * actual_seq_len * hidden_dim..(b + 1) * actual_seq_len * hidden_dim];
            results.push(l2_normalize(&mean_pool(rows, mask, hidden_dim)));
        }

        Ok(results)
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Average the token rows whose attention mask is set.
fn mean_pool(rows: &[f32], mask: &[i64], hidden_dim: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; hidden_dim];
    let mut count = 0.0f32;

    for (row, &m) in rows.chunks_exact(hidden_dim).zip(mask) {
        if m > 0 {
            for (acc, x) in sum.iter_mut().zip(row) {
                *acc += x;
            }
            count += 1.0;
        }
    }

    if count > 0.0 {
        sum.iter_mut().for_each(|x| *x /= count);
    }
    sum
}

/// L2-normalize a vector. Returns a zero vector if the input norm is zero.
pub(crate) fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::mmr::cosine_similarity;

    #[test]
    fn l2_normalize_scales_to_unit_length() {
        let normalized = l2_normalize(&[3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_leaves_zero_vector() {
        assert_eq!(l2_normalize(&[0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn mean_pool_ignores_padding() {
        let rows = [1.0, 2.0, 3.0, 4.0, 100.0, 100.0];
        let mask = [1, 1, 0];
        assert_eq!(mean_pool(&rows, &mask, 2), vec![2.0, 3.0]);
    }

    #[test]
    fn missing_model_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = EmbeddingConfig {
            cache_dir: dir.path().to_string_lossy().into_owned(),
            ..EmbeddingConfig::default()
        };
        let err = LocalEmbeddingProvider::new(&config).err().unwrap();
        assert!(err.to_string().contains("cairn model download"));
    }

    fn model_config() -> EmbeddingConfig {
        EmbeddingConfig::default()
    }

    #[test]
    #[ignore] // Requires model files; run with: cargo test -- --ignored
    fn embed_produces_normalized_384_dims() {
        let provider = LocalEmbeddingProvider::new(&model_config()).unwrap();
        let embedding = provider.embed("Hello world").unwrap();
        assert_eq!(embedding.len(), EMBEDDING_DIM);
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4, "L2 norm should be ~1.0, got {norm}");
    }

    #[test]
    #[ignore]
    fn embed_is_deterministic() {
        let provider = LocalEmbeddingProvider::new(&model_config()).unwrap();
        let a = provider.embed("Rust is a systems programming language").unwrap();
        let b = provider.embed("Rust is a systems programming language").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    #[ignore]
    fn similar_texts_score_higher() {
        let provider = LocalEmbeddingProvider::new(&model_config()).unwrap();
        let emb1 = provider.embed("The cat sat on the mat").unwrap();
        let emb2 = provider.embed("A cat was sitting on a mat").unwrap();
        let emb3 = provider.embed("Quantum computing uses qubits").unwrap();

        let similar = cosine_similarity(&emb1, &emb2).unwrap_or(0.0);
        let different = cosine_similarity(&emb1, &emb3).unwrap_or(0.0);
        assert!(similar > 0.7, "similar texts should have high similarity, got {similar}");
        assert!(different < similar);
    }

    #[test]
    #[ignore]
    fn embed_batch_matches_inputs() {
        let provider = LocalEmbeddingProvider::new(&model_config()).unwrap();
        let embeddings = provider
            .embed_batch(&["First sentence", "Second sentence", "Third sentence"])
            .unwrap();
        assert_eq!(embeddings.len(), 3);
        assert!(provider.embed_batch(&[]).unwrap().is_empty());
    }
}
