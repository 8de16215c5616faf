use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::crypto::KdfParams;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CairnConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub queue: QueueConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

/// Argon2id cost parameters used to derive the KEK.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CryptoConfig {
    pub kdf_memory_kib: u32,
    pub kdf_iterations: u32,
    pub kdf_parallelism: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub target_tokens: usize,
    pub overlap_tokens: usize,
    /// "heuristic" (chars / 4) or "tokenizer" (the embedding model's tokenizer.json).
    pub estimator: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
    pub batch_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub max_results: usize,
    pub max_citations: usize,
    pub lambda: f32,
    pub token_budget: usize,
    pub min_snippet_tokens: usize,
    pub time_decay_weight: f32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueueConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub embed_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_cairn_dir()
            .join("notes.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            kdf_memory_kib: 64 * 1024,
            kdf_iterations: 3,
            kdf_parallelism: 1,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: 200,
            overlap_tokens: 30,
            estimator: "heuristic".into(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_cairn_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
            batch_size: 32,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: 8,
            max_citations: 5,
            lambda: 0.7,
            token_budget: 1500,
            min_snippet_tokens: 20,
            time_decay_weight: 0.0,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 4,
            max_retries: 3,
            base_delay_ms: 1000,
            embed_timeout_ms: 30_000,
        }
    }
}

impl CryptoConfig {
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            memory_kib: self.kdf_memory_kib,
            iterations: self.kdf_iterations,
            parallelism: self.kdf_parallelism,
        }
    }
}

impl QueueConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }
}

/// Returns `~/.cairn/`
pub fn default_cairn_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cairn")
}

/// Returns the default config file path: `~/.cairn/config.toml`
pub fn default_config_path() -> PathBuf {
    default_cairn_dir().join("config.toml")
}

impl CairnConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            CairnConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (CAIRN_DB, CAIRN_LOG_LEVEL, CAIRN_MODEL_DIR).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CAIRN_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("CAIRN_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("CAIRN_MODEL_DIR") {
            self.embedding.cache_dir = val;
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.chunking.target_tokens > 0,
            "chunking.target_tokens must be positive"
        );
        anyhow::ensure!(
            self.chunking.overlap_tokens < self.chunking.target_tokens,
            "chunking.overlap_tokens must be smaller than target_tokens"
        );
        anyhow::ensure!(
            matches!(self.chunking.estimator.as_str(), "heuristic" | "tokenizer"),
            "chunking.estimator must be \"heuristic\" or \"tokenizer\" (got \"{}\")",
            self.chunking.estimator
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.retrieval.lambda),
            "retrieval.lambda must be within [0, 1]"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.retrieval.time_decay_weight),
            "retrieval.time_decay_weight must be within [0, 1]"
        );
        anyhow::ensure!(
            self.retrieval.max_citations > 0,
            "retrieval.max_citations must be positive"
        );
        anyhow::ensure!(self.queue.batch_size > 0, "queue.batch_size must be positive");
        anyhow::ensure!(
            self.embedding.batch_size > 0,
            "embedding.batch_size must be positive"
        );
        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
