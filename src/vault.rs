//! Vault session lifecycle.
//!
//! A vault is one persisted [`VaultRecord`] (salt + wrapped DEK). Unlocking it
//! with the passphrase yields a [`Session`] that holds the DEK in memory until
//! it is dropped or [locked](Session::lock).

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::crypto::{self, Dek, EncryptedBlob, KdfParams};
use crate::error::{CairnError, Result};

/// Persisted key material for one user: everything needed to re-derive the
/// KEK and unwrap the DEK, and nothing that reveals either.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    pub id: String,
    pub created_at: String,
    pub kdf_salt: Vec<u8>,
    pub wrapped_dek: Vec<u8>,
    pub dek_nonce: Vec<u8>,
}

/// An unlocked vault. Owns the DEK for the session lifetime.
#[derive(Debug)]
pub struct Session {
    dek: Dek,
}

impl Session {
    /// Seal entry text for storage.
    pub fn seal_entry(&self, text: &str) -> Result<EncryptedBlob> {
        crypto::seal_str(&self.dek, text)
    }

    /// Open a stored entry.
    pub fn open_entry(&self, cipher: &[u8], nonce: &[u8]) -> Result<String> {
        crypto::open_str(&self.dek, cipher, nonce)
    }

    /// End the session. The DEK is zeroized on drop.
    pub fn lock(self) {
        tracing::debug!("vault session locked");
    }
}

/// Create a new vault: fresh salt, fresh DEK wrapped under the derived KEK.
pub fn create(passphrase: &SecretString, params: &KdfParams) -> Result<(VaultRecord, Session)> {
    let derived = crypto::derive_kek(passphrase.expose_secret(), None, params)?;
    let dek = crypto::generate_dek()?;
    let wrapped = crypto::wrap_dek(&derived.kek, dek.as_bytes())?;

    let record = VaultRecord {
        id: uuid::Uuid::now_v7().to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
        kdf_salt: derived.salt.clone(),
        wrapped_dek: wrapped.wrapped,
        dek_nonce: wrapped.nonce.to_vec(),
    };

    tracing::info!(vault_id = %record.id, "vault created");
    Ok((record, Session { dek }))
}

/// Unlock an existing vault.
///
/// A wrong passphrase surfaces as [`CairnError::Authentication`] because the
/// derived KEK fails to unwrap the DEK.
pub fn unlock(record: &VaultRecord, passphrase: &SecretString, params: &KdfParams) -> Result<Session> {
    let derived = match crypto::derive_kek(passphrase.expose_secret(), Some(&record.kdf_salt), params)
    {
        Ok(derived) => derived,
        Err(CairnError::Validation(_)) => return Err(CairnError::Authentication),
        Err(e) => return Err(e),
    };
    let dek = crypto::unwrap_dek(&derived.kek, &record.wrapped_dek, &record.dek_nonce)?;
    tracing::info!(vault_id = %record.id, "vault unlocked");
    Ok(Session { dek })
}

/// Re-wrap the DEK under a new passphrase. Entry ciphertexts stay valid.
pub fn change_passphrase(
    record: &VaultRecord,
    old: &SecretString,
    new: &SecretString,
    params: &KdfParams,
) -> Result<VaultRecord> {
    let session = unlock(record, old, params)?;
    let derived = crypto::derive_kek(new.expose_secret(), None, params)?;
    let wrapped = crypto::wrap_dek(&derived.kek, session.dek.as_bytes())?;

    tracing::info!(vault_id = %record.id, "vault passphrase changed");
    Ok(VaultRecord {
        kdf_salt: derived.salt.clone(),
        wrapped_dek: wrapped.wrapped,
        dek_nonce: wrapped.nonce.to_vec(),
        ..record.clone()
    })
}
