//! Local, citation-preserving retrieval over an encrypted personal note store.
//!
//! Cairn keeps journal entries sealed at rest, splits them into chunks whose
//! offsets can always be checked against the decrypted text, embeds those
//! chunks in the background, and answers questions by assembling a
//! token-bounded context in which every snippet carries a citation back to
//! its entry.
//!
//! # Architecture
//!
//! - **Encryption**: Argon2id derives a key-encryption key from the
//!   passphrase; a random data key, stored only wrapped, seals entries with
//!   AES-256-GCM
//! - **Chunking**: sentence-first splitting with word overlap; offsets are
//!   character positions into the entry
//! - **Embeddings**: local ONNX Runtime with all-MiniLM-L6-v2 (384 dimensions)
//!   behind the [`embedding::EmbeddingProvider`] trait
//! - **Retrieval**: filters, Maximal Marginal Relevance selection, optional
//!   recency decay, then greedy packing into a token budget
//! - **Storage**: SQLite with forward-only migrations
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`crypto`]: Key derivation, key wrapping, authenticated encryption
//! - [`vault`]: Create, unlock and re-key the single local vault
//! - [`chunking`]: Offset-preserving text chunker and token estimators
//! - [`embedding`]: Text-to-vector embedding port and the ONNX provider
//! - [`queue`]: Background chunk-then-embed jobs with retry and backoff
//! - [`retrieval`]: MMR selection, budget packing, citations and prompts
//! - [`db`]: SQLite schema, migrations, health checks and row access
//! - [`error`]: The crate error type

pub mod chunking;
pub mod config;
pub mod crypto;
pub mod db;
pub mod embedding;
pub mod error;
pub mod queue;
pub mod retrieval;
pub mod vault;

pub use error::{CairnError, Result};
