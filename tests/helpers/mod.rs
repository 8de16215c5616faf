#![allow(dead_code)]

use cairn::crypto::KdfParams;
use cairn::db;
use cairn::db::store::{self, EntryRecord};
use cairn::embedding::EmbeddingProvider;
use cairn::vault::{self, Session, VaultRecord};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use secrecy::SecretString;

pub const PASSPHRASE: &str = "correct horse battery";
pub const FAKE_DIMS: usize = 64;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_memory_database().unwrap()
}

/// Create a vault with the cheap KDF profile and persist it.
pub fn test_vault(conn: &Connection) -> (VaultRecord, Session) {
    let params = KdfParams::insecure_fast();
    let (record, session) =
        vault::create(&SecretString::from(PASSPHRASE.to_string()), &params).unwrap();
    store::save_vault(conn, &record, &params).unwrap();
    (record, session)
}

/// Seal and insert an entry. Returns its id.
pub fn insert_entry(
    conn: &Connection,
    session: &Session,
    text: &str,
    occurred_at: DateTime<Utc>,
    tags: &[&str],
) -> String {
    let entry = EntryRecord::seal(
        session,
        text,
        occurred_at,
        tags.iter().map(|t| t.to_string()).collect(),
    )
    .unwrap();
    store::insert_entry(conn, &entry).unwrap();
    entry.id
}

/// Unit vector along axis `seed`.
pub fn axis(seed: usize, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    v[seed % dims] = 1.0;
    v
}

/// `base` nudged on a few axes, re-normalized. High cosine to `base`.
pub fn similar_vector(base: &[f32]) -> Vec<f32> {
    let mut v = base.to_vec();
    for i in 0..3 {
        let len = v.len();
        v[(i * 7 + 1) % len] += 0.05;
    }
    normalize(&mut v);
    v
}

pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Deterministic bag-of-words embedding: each lowercase word hashes to one
/// axis. Texts sharing words are similar; disjoint texts are orthogonal.
pub struct FakeProvider;

impl EmbeddingProvider for FakeProvider {
    fn embed(&self, text: &str) -> cairn::Result<Vec<f32>> {
        let mut v = vec![0.0f32; FAKE_DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
        {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
            v[hash % FAKE_DIMS] += 1.0;
        }
        normalize(&mut v);
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        FAKE_DIMS
    }

    fn model_id(&self) -> &str {
        "fake-bow"
    }
}
