//! Key material and Argon2id key derivation.

use argon2::Argon2;
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::ZeroizeOnDrop;

use crate::error::{CairnError, Result};

/// Length of every key and salt in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Minimum passphrase length in characters.
pub const MIN_PASSPHRASE_LEN: usize = 8;

/// Shortest salt accepted when one is supplied by the caller.
const MIN_SALT_LEN: usize = 16;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism (lanes).
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// Production profile: 64 MiB, 3 passes, 1 lane.
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Minimal cost profile. Only for tests; offers no brute-force resistance.
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Key-Encryption-Key derived from a passphrase. Held only in memory.
#[derive(Clone, ZeroizeOnDrop)]
pub struct Kek {
    key: [u8; KEY_LEN],
}

impl Kek {
    pub(crate) fn from_bytes(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Raw key bytes. Avoid storing or logging this value.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

impl std::fmt::Debug for Kek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kek").field("key", &"[REDACTED]").finish()
    }
}

/// Data-Encryption-Key: the symmetric key that seals entry content.
#[derive(Clone, ZeroizeOnDrop)]
pub struct Dek {
    key: [u8; KEY_LEN],
}

impl Dek {
    /// Build a DEK from raw bytes, rejecting anything that is not 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| dek_length_error())?;
        Ok(Self { key })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

impl std::fmt::Debug for Dek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dek").field("key", &"[REDACTED]").finish()
    }
}

pub(crate) fn dek_length_error() -> CairnError {
    CairnError::Validation("DEK must be 256 bits (32 bytes)".to_string())
}

/// A freshly derived KEK together with the salt that produced it.
#[derive(Debug)]
pub struct DerivedKek {
    pub salt: Vec<u8>,
    pub kek: Kek,
}

/// Fill a fixed-size buffer from the OS CSPRNG.
pub(crate) fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| CairnError::Security(format!("system randomness unavailable: {e}")))?;
    Ok(buf)
}

/// 32 random bytes for a new DEK.
pub fn generate_dek() -> Result<Dek> {
    Ok(Dek {
        key: random_bytes::<KEY_LEN>()?,
    })
}

/// 32 random bytes for a new KDF salt.
pub fn generate_salt() -> Result<[u8; KEY_LEN]> {
    random_bytes::<KEY_LEN>()
}

/// Derive a KEK from a passphrase using Argon2id.
///
/// Generates a fresh random salt when `salt` is `None`. The same passphrase,
/// salt, and parameters always produce the same key.
///
/// # Errors
///
/// - [`CairnError::Validation`] if the passphrase is shorter than
///   [`MIN_PASSPHRASE_LEN`] characters or a supplied salt is under 16 bytes.
/// - [`CairnError::Security`] if the KDF or the RNG fails.
pub fn derive_kek(passphrase: &str, salt: Option<&[u8]>, params: &KdfParams) -> Result<DerivedKek> {
    if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
        return Err(CairnError::Validation(format!(
            "passphrase must be at least {MIN_PASSPHRASE_LEN} characters"
        )));
    }

    let salt = match salt {
        Some(s) if s.len() < MIN_SALT_LEN => {
            return Err(CairnError::Validation(format!(
                "salt must be at least {MIN_SALT_LEN} bytes"
            )));
        }
        Some(s) => s.to_vec(),
        None => generate_salt()?.to_vec(),
    };

    let kek = argon2_derive(passphrase, &salt, params)?;
    Ok(DerivedKek { salt, kek })
}

/// Re-derive a key from `passphrase` and compare it to `expected_key` in constant time.
///
/// A passphrase that is too short can never have produced a key, so it
/// yields `Ok(false)` rather than an error.
pub fn verify_passphrase(
    passphrase: &str,
    salt: &[u8],
    expected_key: &[u8],
    params: &KdfParams,
) -> Result<bool> {
    let derived = match derive_kek(passphrase, Some(salt), params) {
        Ok(derived) => derived,
        Err(CairnError::Validation(_)) => return Ok(false),
        Err(e) => return Err(e),
    };
    Ok(derived.kek.as_bytes().as_slice().ct_eq(expected_key).into())
}

fn argon2_derive(passphrase: &str, salt: &[u8], params: &KdfParams) -> Result<Kek> {
    let argon_params = argon2::Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| CairnError::Security(format!("invalid Argon2 parameters: {e}")))?;

    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon_params,
    );

    let mut key = [0u8; KEY_LEN];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| CairnError::Security(format!("key derivation failed: {e}")))?;

    Ok(Kek::from_bytes(key))
}
