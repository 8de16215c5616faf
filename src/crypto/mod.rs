//! Cryptographic envelope for note content at rest.
//!
//! - **Argon2id** derives a Key-Encryption-Key (KEK) from the passphrase.
//! - **AES-256-GCM** wraps a random Data-Encryption-Key (DEK) under the KEK
//!   and seals entry content under the DEK.
//!
//! ## Security Model
//!
//! - The KEK is never persisted; the DEK is persisted only in wrapped form.
//! - Key material is zeroized on drop and redacted from `Debug` output.
//! - Every seal uses a fresh 96-bit random nonce. Reusing a nonce with the
//!   same key is a caller bug and is not detected.
//! - Decryption is all-or-nothing: a tag mismatch yields
//!   [`CairnError::Authentication`](crate::error::CairnError::Authentication)
//!   and no plaintext.
//!
//! We do NOT defend against a compromised OS or access to an unlocked session.

pub mod envelope;
pub mod keys;

pub use envelope::{
    content_hash, open, open_str, seal, seal_str, unwrap_dek, wrap_dek, EncryptedBlob, WrappedDek,
    NONCE_LEN,
};
pub use keys::{
    derive_kek, generate_dek, generate_salt, verify_passphrase, Dek, DerivedKek, KdfParams, Kek,
    KEY_LEN, MIN_PASSPHRASE_LEN,
};
