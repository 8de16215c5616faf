//! AES-256-GCM key wrapping and content sealing.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use super::keys::{dek_length_error, random_bytes, Dek, Kek, KEY_LEN};
use crate::error::{CairnError, Result};

/// AES-GCM nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Output of every AEAD seal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub cipher: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
}

/// A DEK encrypted under the KEK, with its wrapping nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedDek {
    pub wrapped: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
}

fn cipher_for(key: &[u8; KEY_LEN]) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key)
        .map_err(|e| CairnError::Security(format!("failed to initialize AES-256-GCM: {e}")))
}

fn nonce_from_slice(nonce: &[u8]) -> Result<&Nonce<aes_gcm::aead::consts::U12>> {
    if nonce.len() != NONCE_LEN {
        return Err(CairnError::Validation(format!(
            "nonce must be {NONCE_LEN} bytes (got {})",
            nonce.len()
        )));
    }
    Ok(Nonce::from_slice(nonce))
}

fn encrypt(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_LEN])> {
    let nonce = random_bytes::<NONCE_LEN>()?;
    let cipher = cipher_for(key)?
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CairnError::Security("AES-GCM encryption failed".to_string()))?;
    Ok((cipher, nonce))
}

fn decrypt(key: &[u8; KEY_LEN], cipher: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
    let nonce = nonce_from_slice(nonce)?;
    cipher_for(key)?
        .decrypt(nonce, cipher)
        .map_err(|_| CairnError::Authentication)
}

/// Encrypt a DEK under the KEK with a fresh random nonce.
///
/// # Errors
///
/// [`CairnError::Validation`] with "DEK must be 256 bits (32 bytes)" when
/// `dek` has any other length.
pub fn wrap_dek(kek: &Kek, dek: &[u8]) -> Result<WrappedDek> {
    if dek.len() != KEY_LEN {
        return Err(dek_length_error());
    }
    let (wrapped, nonce) = encrypt(kek.as_bytes(), dek)?;
    Ok(WrappedDek { wrapped, nonce })
}

/// Decrypt a wrapped DEK. Any tag mismatch is [`CairnError::Authentication`].
pub fn unwrap_dek(kek: &Kek, wrapped: &[u8], nonce: &[u8]) -> Result<Dek> {
    let mut plain = decrypt(kek.as_bytes(), wrapped, nonce)?;
    let dek = Dek::from_slice(&plain);
    plain.zeroize();
    dek
}

/// Seal entry content under the DEK.
pub fn seal(dek: &Dek, plaintext: &[u8]) -> Result<EncryptedBlob> {
    let (cipher, nonce) = encrypt(dek.as_bytes(), plaintext)?;
    Ok(EncryptedBlob { cipher, nonce })
}

/// Open sealed content. Returns no plaintext at all on failure.
pub fn open(dek: &Dek, cipher: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
    decrypt(dek.as_bytes(), cipher, nonce)
}

/// UTF-8 variant of [`seal`].
pub fn seal_str(dek: &Dek, plaintext: &str) -> Result<EncryptedBlob> {
    seal(dek, plaintext.as_bytes())
}

/// UTF-8 variant of [`open`]. Invalid UTF-8 is zeroized and rejected.
pub fn open_str(dek: &Dek, cipher: &[u8], nonce: &[u8]) -> Result<String> {
    let plain = open(dek, cipher, nonce)?;
    String::from_utf8(plain).map_err(|e| {
        let mut bytes = e.into_bytes();
        bytes.zeroize();
        CairnError::Validation("decrypted content is not valid UTF-8".to_string())
    })
}

/// Hex SHA-256 of plaintext, stored beside the ciphertext for change detection.
pub fn content_hash(plaintext: &[u8]) -> String {
    hex::encode(Sha256::digest(plaintext))
}
