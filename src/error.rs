//! Error types for Cairn core operations.
//!
//! Library code returns [`Result`]; the CLI wraps these in `anyhow` with
//! additional context. Crypto failures never carry plaintext.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for Cairn operations.
pub type Result<T> = std::result::Result<T, CairnError>;

/// Core error type.
#[derive(Debug, Error)]
pub enum CairnError {
    /// Malformed input sizes or ranges (short passphrase, wrong DEK length, bad offsets).
    #[error("validation error: {0}")]
    Validation(String),

    /// AEAD tag mismatch: wrong key or tampered ciphertext.
    #[error("authentication failed: ciphertext or key is invalid")]
    Authentication,

    /// Randomness or key-derivation failure. Fatal, no fallback.
    #[error("security error: {0}")]
    Security(String),

    /// Chunking or embedding failure. Retryable.
    #[error("processing error: {0}")]
    Processing(String),

    /// An embedding job exhausted its retries.
    #[error("job {job_id} failed after {retries} attempts: {last_error}")]
    QueueTerminal {
        job_id: Uuid,
        retries: u32,
        last_error: String,
    },

    /// SQLite storage error.
    #[error("storage error: {source}")]
    Storage {
        #[from]
        source: rusqlite::Error,
    },

    /// JSON encode/decode error.
    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl CairnError {
    /// Whether a job hitting this error should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Processing(_))
    }
}
